use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use actix_web::error::ErrorInternalServerError;
use actix_web::http::header::CACHE_CONTROL;
use actix_web::middleware::{Logger, NormalizePath, TrailingSlash};
use actix_web::web::Data;
use actix_web::{App, HttpResponse, HttpServer, Responder, route, web};
use futures::TryFutureExt as _;
use tracing::error;

use crate::config::{KEEP_ALIVE_DEFAULT, LISTEN_ADDRESSES_DEFAULT, ServerState, SrvConfig};
use crate::{OffmapError, OffmapResult};

pub fn map_internal_error<T: std::fmt::Display>(e: T) -> actix_web::Error {
    error!("{e}");
    ErrorInternalServerError(e.to_string())
}

#[route("/", method = "GET", method = "HEAD")]
#[allow(clippy::unused_async)]
async fn get_index() -> &'static str {
    "offmap server is running.\n\n\
    The list of available tilesets is available at http://<host>/api/tilesets\n"
}

/// Return 200 OK if healthy. Used for readiness and liveness checks.
#[route("/health", method = "GET", method = "HEAD")]
#[allow(clippy::unused_async)]
async fn get_health() -> impl Responder {
    HttpResponse::Ok()
        .insert_header((CACHE_CONTROL, "no-cache"))
        .message_body("OK")
}

pub fn router(cfg: &mut web::ServiceConfig) {
    cfg.service(get_index)
        .service(get_health)
        .service(crate::srv::tiles::get_catalog)
        .service(crate::srv::tasks::post_merge)
        .service(crate::srv::tasks::get_task)
        .service(crate::srv::tiles::get_tilejson)
        .service(crate::srv::tiles::get_tile)
        .service(crate::srv::poi::post_poi_index)
        .service(crate::srv::poi::get_poi)
        .service(crate::srv::fonts::get_font);
}

type Server = Pin<Box<dyn Future<Output = OffmapResult<()>>>>;

/// Create a future for an Actix web server together with the listening address.
pub fn new_server(config: SrvConfig, state: ServerState) -> OffmapResult<(Server, String)> {
    let keep_alive = Duration::from_secs(config.keep_alive.unwrap_or(KEEP_ALIVE_DEFAULT));
    let worker_processes = config.worker_processes.unwrap_or_else(num_cpus::get);
    let listen_addresses = config
        .listen_addresses
        .clone()
        .unwrap_or_else(|| LISTEN_ADDRESSES_DEFAULT.to_string());

    let factory = move || {
        App::new()
            .app_data(Data::new(state.tilesets.clone()))
            .app_data(Data::new(state.fonts.clone()))
            .app_data(Data::new(state.tasks.clone()))
            .wrap(Logger::default())
            .wrap(NormalizePath::new(TrailingSlash::MergeOnly))
            .configure(router)
    };

    let server = HttpServer::new(factory)
        .bind(listen_addresses.clone())
        .map_err(|e| OffmapError::BindingError(e, listen_addresses.clone()))?
        .keep_alive(keep_alive)
        .shutdown_timeout(0)
        .workers(worker_processes)
        .run()
        .err_into();

    Ok((Box::pin(server), listen_addresses))
}
