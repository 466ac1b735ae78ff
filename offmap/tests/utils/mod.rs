#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use geo_types::{Geometry, point};
use geozero::ToMvt as _;
use geozero::mvt::{Message as _, Tile, tile};
use offmap::tasks::{PROGRESS_DONE, PROGRESS_FAILED, TaskTracker};
use offmap_mbtiles::{CopyDuplicateMode, Mbtiles, TileRow, init_mbtiles_schema, insert_tile};
use offmap_tile_utils::encode_gzip;
use sqlx::Connection as _;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A data directory with empty `tilesets/` and `fonts/` subdirectories
pub struct DataDir {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
}

impl DataDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir(root.join("tilesets")).unwrap();
        std::fs::create_dir(root.join("fonts")).unwrap();
        Self { _dir: dir, root }
    }

    pub fn tileset(&self, name: &str) -> PathBuf {
        self.root.join("tilesets").join(name)
    }

    pub fn font(&self, font: &str, range: &str, data: &[u8]) {
        let dir = self.root.join("fonts").join(font);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{range}.pbf")), data).unwrap();
    }
}

/// Create a flat `MBTiles` file, tiles are given as `(z, x, tms_y, data)`
pub async fn create_archive(
    path: &Path,
    metadata: &[(&str, &str)],
    tiles: &[(i64, i64, i64, Vec<u8>)],
) {
    let mbt = Mbtiles::new(path).unwrap();
    let mut conn = mbt.open_or_new().await.unwrap();
    init_mbtiles_schema(&mut conn).await.unwrap();
    for (key, value) in metadata {
        mbt.set_metadata_value(&mut conn, key, value).await.unwrap();
    }
    for (z, x, y, data) in tiles {
        let tile = TileRow {
            zoom_level: *z,
            tile_column: *x,
            tile_row: *y,
            tile_data: Some(data.clone()),
        };
        insert_tile(&mut conn, &tile, CopyDuplicateMode::Abort)
            .await
            .unwrap();
    }
    conn.close().await.unwrap();
}

pub async fn tile_count(path: &Path) -> u64 {
    let mbt = Mbtiles::new(path).unwrap();
    let mut conn = mbt.open_readonly().await.unwrap();
    let count = mbt.tile_count(&mut conn).await.unwrap();
    conn.close().await.unwrap();
    count
}

/// Gzip-compressed vector tile with one `poi` layer of named points in tile extent units
pub fn poi_tile(points: &[(&str, i32, i32)]) -> Vec<u8> {
    let mut values = Vec::new();
    let features = points
        .iter()
        .enumerate()
        .map(|(idx, (name, x, y))| {
            values.push(tile::Value {
                string_value: Some((*name).to_string()),
                ..Default::default()
            });
            let geometry = Geometry::from(point!(x: f64::from(*x), y: f64::from(*y)));
            let mut feature = geometry.to_mvt_unscaled().unwrap();
            feature.tags = vec![0, u32::try_from(idx).unwrap()];
            feature
        })
        .collect();
    let tile = Tile {
        layers: vec![tile::Layer {
            version: 2,
            name: "poi".to_string(),
            features,
            keys: vec!["name".to_string()],
            values,
            extent: Some(4096),
        }],
    };
    encode_gzip(&tile.encode_to_vec()).unwrap()
}

/// Poll a task until it reaches a terminal state and return all observed values
pub async fn wait_for(tracker: &TaskTracker, task_id: &str) -> Vec<i8> {
    let poll = async {
        let mut seen = Vec::new();
        loop {
            let progress = tracker.progress(task_id).unwrap();
            if seen.last() != Some(&progress) {
                seen.push(progress);
            }
            if progress == PROGRESS_DONE || progress == PROGRESS_FAILED {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("task did not finish in time")
}
