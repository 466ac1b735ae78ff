use actix_middleware_etag::Etag;
use actix_web::error::{ErrorBadRequest, ErrorNotFound};
use actix_web::http::Uri;
use actix_web::http::header::CONTENT_ENCODING;
use actix_web::middleware::Compress;
use actix_web::web::{Data, Path};
use actix_web::{HttpRequest, HttpResponse, Responder, Result as ActixResult, route};
use offmap_tile_utils::TileCoord;
use serde::Deserialize;
use tracing::trace;

use crate::sources::{TilesetSource, Tilesets};
use crate::srv::server::map_internal_error;

#[derive(Deserialize)]
pub struct TilesetRequest {
    pub tileset: String,
}

#[derive(Deserialize)]
pub struct TileRequest {
    tileset: String,
    z: u8,
    x: u32,
    /// Row, optionally followed by an extension such as `.pbf` or `.png`
    y: String,
}

pub(crate) fn get_source(tilesets: &Tilesets, id: &str) -> ActixResult<TilesetSource> {
    tilesets
        .get(id)
        .ok_or_else(|| ErrorNotFound(format!("Tileset {id} does not exist")))
}

#[route(
    "/api/tilesets",
    method = "GET",
    method = "HEAD",
    wrap = "Compress::default()"
)]
#[allow(clippy::unused_async)]
pub async fn get_catalog(tilesets: Data<Tilesets>) -> impl Responder {
    HttpResponse::Ok().json(tilesets.catalog())
}

#[route(
    "/api/tilesets/{tileset}",
    method = "GET",
    method = "HEAD",
    wrap = "Compress::default()"
)]
#[allow(clippy::unused_async)]
pub async fn get_tilejson(
    req: HttpRequest,
    path: Path<TilesetRequest>,
    tilesets: Data<Tilesets>,
) -> ActixResult<HttpResponse> {
    let source = get_source(&tilesets, &path.tileset)?;

    let info = req.connection_info();
    let tiles_url = Uri::builder()
        .scheme(info.scheme())
        .authority(info.host())
        .path_and_query(format!("{}/{{z}}/{{x}}/{{y}}", req.path()))
        .build()
        .map(|tiles_url| tiles_url.to_string())
        .map_err(|e| ErrorBadRequest(format!("Can't build tiles URL: {e}")))?;

    let mut tilejson = source.tilejson;
    tilejson.tiles = vec![tiles_url];
    Ok(HttpResponse::Ok().json(tilejson))
}

#[route(
    "/api/tilesets/{tileset}/{z}/{x}/{y}",
    method = "GET",
    method = "HEAD",
    wrap = "Etag::default()"
)]
pub async fn get_tile(
    path: Path<TileRequest>,
    tilesets: Data<Tilesets>,
) -> ActixResult<HttpResponse> {
    let source = get_source(&tilesets, &path.tileset)?;
    let y = path.y.split_once('.').map_or(path.y.as_str(), |(y, _)| y);
    let xyz = y
        .parse()
        .ok()
        .and_then(|y| TileCoord::new_checked(path.z, path.x, y))
        .ok_or_else(|| {
            ErrorBadRequest(format!("Invalid tile coordinates {}/{}/{}", path.z, path.x, path.y))
        })?;

    let tile = source
        .pool
        .get_tile(xyz.z, xyz.x, xyz.y)
        .await
        .map_err(map_internal_error)?;

    let Some(data) = tile else {
        trace!("Tile {xyz} of {} does not exist", source.id);
        return Err(ErrorNotFound(format!("Tile {xyz} does not exist")));
    };
    if data.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }

    let mut response = HttpResponse::Ok();
    response.content_type(source.tile_info.format.content_type());
    if let Some(val) = source.tile_info.encoding.content_encoding() {
        response.insert_header((CONTENT_ENCODING, val));
    }
    Ok(response.body(data))
}
