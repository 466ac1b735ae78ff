use actix_web::error::{ErrorBadRequest, ErrorNotFound};
use actix_web::web::{Data, Path, Query};
use actix_web::{HttpResponse, Result as ActixResult, get, post};
use offmap_mbtiles::{MbtError, index_path, search_poi, validate_keyword};
use serde::Deserialize;

use crate::sources::Tilesets;
use crate::srv::server::map_internal_error;
use crate::srv::tasks::TaskCreated;
use crate::srv::tiles::{TilesetRequest, get_source};
use crate::tasks::TaskTracker;

#[derive(Deserialize)]
pub struct PoiQuery {
    keywords: String,
}

/// Queue building the point-of-interest index of a tileset.
/// The task completes without changes when the index already exists.
#[post("/api/tilesets/{tileset}/poi-index")]
#[allow(clippy::unused_async)]
pub async fn post_poi_index(
    path: Path<TilesetRequest>,
    tilesets: Data<Tilesets>,
    tasks: Data<TaskTracker>,
) -> ActixResult<HttpResponse> {
    let source = get_source(&tilesets, &path.tileset)?;
    let task_id = tasks.submit_index(source.path);
    Ok(HttpResponse::Accepted().json(TaskCreated { task_id }))
}

#[get("/api/poi/{tileset}")]
pub async fn get_poi(
    path: Path<TilesetRequest>,
    query: Query<PoiQuery>,
    tilesets: Data<Tilesets>,
) -> ActixResult<HttpResponse> {
    let keyword =
        validate_keyword(&query.keywords).map_err(|e| ErrorBadRequest(e.to_string()))?;
    let source = get_source(&tilesets, &path.tileset)?;
    let index = index_path(&source.path);
    let results = search_poi(&index, keyword).await.map_err(|e| match e {
        MbtError::IndexNotFound(_) => {
            ErrorNotFound(format!("Tileset {} has no point-of-interest index yet", source.id))
        }
        e => map_internal_error(e),
    })?;
    Ok(HttpResponse::Ok().json(results))
}
