use offmap::tasks::{
    JobSettings, PROGRESS_DONE, PROGRESS_FAILED, TaskKind, TaskStatus, TaskTracker, merge_task_id,
};
use offmap_mbtiles::{CopyDuplicateMode, TileErrorPolicy, index_path, temp_path};
use pretty_assertions::assert_eq;

mod utils;
use utils::{DataDir, PNG, create_archive, poi_tile, tile_count, wait_for};

fn tracker(max_concurrent_jobs: usize) -> TaskTracker {
    TaskTracker::new(JobSettings {
        max_concurrent_jobs,
        page_size: 2,
        on_duplicate: CopyDuplicateMode::Abort,
        on_tile_error: TileErrorPolicy::Skip,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn merge_job_reports_progress() {
    let data = DataDir::new();
    let a = data.tileset("a.mbtiles");
    let b = data.tileset("b.mbtiles");
    create_archive(
        &a,
        &[("format", "png")],
        &[(0, 0, 0, PNG.to_vec()), (1, 0, 0, PNG.to_vec()), (1, 1, 0, PNG.to_vec())],
    )
    .await;
    create_archive(
        &b,
        &[("format", "png")],
        &[(2, 0, 0, PNG.to_vec()), (2, 1, 1, PNG.to_vec())],
    )
    .await;

    let tasks = tracker(2);
    let target = data.tileset("merged.mbtiles");
    let task_id = tasks.submit_merge(vec![a.clone(), b.clone()], target.clone());
    assert_eq!(task_id, merge_task_id(&[b, a]));

    let seen = wait_for(&tasks, &task_id).await;
    assert_eq!(seen.last(), Some(&PROGRESS_DONE));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(tile_count(&target).await, 5);
    assert!(!temp_path(&target).exists());

    let info = tasks.task(&task_id).unwrap();
    assert_eq!(info.kind, TaskKind::Merge);
    assert_eq!(info.status, TaskStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_merge_leaves_nothing_behind() {
    let data = DataDir::new();
    let a = data.tileset("a.mbtiles");
    let b = data.tileset("b.mbtiles");
    create_archive(&a, &[("format", "pbf")], &[(0, 0, 0, poi_tile(&[]))]).await;
    create_archive(&b, &[("format", "png")], &[(0, 0, 0, PNG.to_vec())]).await;

    let tasks = tracker(1);
    let target = data.tileset("merged.mbtiles");
    let task_id = tasks.submit_merge(vec![a, b], target.clone());
    let seen = wait_for(&tasks, &task_id).await;
    assert_eq!(seen.last(), Some(&PROGRESS_FAILED));
    assert_eq!(tasks.task(&task_id).unwrap().status, TaskStatus::Failed);
    assert!(!target.exists());
    assert!(!temp_path(&target).exists());

    let missing = tasks.submit_merge(
        vec![data.tileset("missing.mbtiles")],
        data.tileset("other.mbtiles"),
    );
    assert_eq!(wait_for(&tasks, &missing).await.last(), Some(&PROGRESS_FAILED));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn index_job_builds_the_index_once() {
    let data = DataDir::new();
    let city = data.tileset("city.mbtiles");
    create_archive(
        &city,
        &[("format", "pbf")],
        &[
            (4, 0, 0, poi_tile(&[("Town Hall", 100, 100), ("Museum", 200, 200)])),
            (4, 1, 0, poi_tile(&[("Station", 300, 300)])),
            (4, 2, 0, poi_tile(&[("Harbour", 400, 400)])),
        ],
    )
    .await;

    let tasks = tracker(2);
    let task_id = tasks.submit_index(city.clone());
    let seen = wait_for(&tasks, &task_id).await;
    assert_eq!(seen.last(), Some(&PROGRESS_DONE));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert!(index_path(&city).is_file());
    assert_eq!(tasks.task(&task_id).unwrap().kind, TaskKind::Index);

    let modified = std::fs::metadata(index_path(&city))
        .unwrap()
        .modified()
        .unwrap();
    let again = tasks.submit_index(city.clone());
    assert_eq!(again, task_id);
    assert_eq!(wait_for(&tasks, &again).await.last(), Some(&PROGRESS_DONE));
    let unchanged = std::fs::metadata(index_path(&city))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(modified, unchanged);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raster_archives_complete_without_index() {
    let data = DataDir::new();
    let sat = data.tileset("sat.mbtiles");
    create_archive(&sat, &[("format", "png")], &[(0, 0, 0, PNG.to_vec())]).await;

    let tasks = tracker(1);
    let task_id = tasks.submit_index(sat.clone());
    assert_eq!(wait_for(&tasks, &task_id).await.last(), Some(&PROGRESS_DONE));
    assert!(!index_path(&sat).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_queue_behind_the_concurrency_limit() {
    let data = DataDir::new();
    let mut archives = Vec::new();
    for i in 0..4 {
        let path = data.tileset(&format!("part{i}.mbtiles"));
        create_archive(
            &path,
            &[("format", "pbf")],
            &[(4, i, 0, poi_tile(&[("Kiosk", 10, 10)]))],
        )
        .await;
        archives.push(path);
    }

    let tasks = tracker(1);
    let ids: Vec<String> = archives
        .iter()
        .map(|path| tasks.submit_index(path.clone()))
        .collect();
    let merge_id = tasks.submit_merge(archives.clone(), data.tileset("all.mbtiles"));

    for id in ids.iter().chain([&merge_id]) {
        assert_eq!(wait_for(&tasks, id).await.last(), Some(&PROGRESS_DONE), "{id}");
    }
    for path in &archives {
        assert!(index_path(path).is_file());
    }
    assert_eq!(tile_count(&data.tileset("all.mbtiles")).await, 4);
}

#[tokio::test]
async fn unknown_tasks_have_no_progress() {
    let tasks = tracker(1);
    assert_eq!(tasks.progress("0123456789abcdef0123456789abcdef"), None);
    assert!(tasks.task("nope").is_none());
}
