use std::path::PathBuf;

use actix_web::error::{ErrorBadRequest, ErrorNotFound};
use actix_web::web::{Data, Json, Path};
use actix_web::{HttpResponse, Result as ActixResult, get, post};
use serde::{Deserialize, Serialize};

use crate::sources::Tilesets;
use crate::tasks::TaskTracker;

/// Body of `POST /api/tilesets/merge`, file names relative to the tilesets directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub sources: Vec<String>,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
}

fn resolve_name(tilesets: &Tilesets, name: &str) -> ActixResult<PathBuf> {
    tilesets
        .resolve_name(name)
        .ok_or_else(|| ErrorBadRequest(format!("Invalid tileset file name '{name}'")))
}

#[post("/api/tilesets/merge")]
#[allow(clippy::unused_async)]
pub async fn post_merge(
    body: Json<MergeRequest>,
    tilesets: Data<Tilesets>,
    tasks: Data<TaskTracker>,
) -> ActixResult<HttpResponse> {
    if body.sources.is_empty() {
        return Err(ErrorBadRequest("At least one source must be given"));
    }
    let sources = body
        .sources
        .iter()
        .map(|name| resolve_name(&tilesets, name))
        .collect::<ActixResult<Vec<_>>>()?;
    let target = resolve_name(&tilesets, &body.target)?;

    let task_id = tasks.submit_merge(sources, target);
    Ok(HttpResponse::Accepted().json(TaskCreated { task_id }))
}

#[get("/api/tasks/{task_id}")]
#[allow(clippy::unused_async)]
pub async fn get_task(
    task_id: Path<String>,
    tasks: Data<TaskTracker>,
) -> ActixResult<HttpResponse> {
    let info = tasks
        .task(&task_id)
        .ok_or_else(|| ErrorNotFound(format!("Task {task_id} does not exist")))?;
    Ok(HttpResponse::Ok().json(info))
}
