use actix_middleware_etag::Etag;
use actix_web::error::{ErrorBadRequest, ErrorNotFound};
use actix_web::middleware::Compress;
use actix_web::web::{Data, Path};
use actix_web::{HttpResponse, Result as ActixResult, route};
use serde::Deserialize;

use crate::fonts::{FontError, FontStore};
use crate::srv::server::map_internal_error;

#[derive(Deserialize, Debug)]
pub struct FontRequest {
    fontstack: String,
    start: u32,
    end: u32,
}

#[route(
    "/api/fonts/{fontstack}/{start}-{end}.pbf",
    method = "GET",
    wrap = "Etag::default()",
    wrap = "Compress::default()"
)]
pub async fn get_font(
    path: Path<FontRequest>,
    fonts: Data<FontStore>,
) -> ActixResult<HttpResponse> {
    let data = fonts
        .get_font_range(&path.fontstack, path.start, path.end)
        .await
        .map_err(map_font_error)?;
    Ok(HttpResponse::Ok()
        .content_type("application/x-protobuf")
        .body(data))
}

fn map_font_error(e: FontError) -> actix_web::Error {
    match e {
        FontError::FontNotFound(_) => ErrorNotFound(e.to_string()),
        FontError::InvalidFontName(_) | FontError::InvalidFontRange(..) => {
            ErrorBadRequest(e.to_string())
        }
        FontError::IoError(..) => map_internal_error(e),
    }
}
