use std::env;

use clap::Parser;
use log::log_enabled;
use offmap::OffmapResult;
use offmap::config::args::Args;
use offmap::config::{Config, read_config};
use offmap::logging::{ensure_mbtiles_log_level_matches, init_tracing};
use offmap::srv::new_server;
use subst::Env;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

async fn start(args: Args) -> OffmapResult<()> {
    info!("Starting offmap v{VERSION}");

    let save_config = args.meta.save_config.clone();
    let mut config = if let Some(ref cfg_filename) = args.meta.config {
        info!("Using {}", cfg_filename.display());
        read_config(cfg_filename, &Env)?
    } else {
        info!("Config file is not specified, using defaults");
        Config::default()
    };

    args.merge_into_config(&mut config);
    config.finalize()?;
    let state = config.resolve().await?;

    if let Some(file_name) = save_config {
        config.save_to_file(file_name.as_path())?;
    } else {
        info!("Use --save-config to save or print the offmap configuration.");
    }

    let fonts = state.fonts.font_names();
    if !fonts.is_empty() {
        info!("Serving {} font(s): {}", fonts.len(), fonts.join(", "));
    }

    let (server, listen_addresses) = new_server(config.srv, state)?;
    info!("offmap has been started on {listen_addresses}.");
    info!("Use http://{listen_addresses}/api/tilesets to get the list of available tilesets.");

    server.await
}

#[tokio::main]
async fn main() {
    let filter = ensure_mbtiles_log_level_matches(env::var("RUST_LOG").ok());
    init_tracing(&filter, env::var("OFFMAP_FORMAT").ok());

    let args = Args::parse();
    if let Err(e) = start(args).await {
        // Ensure the message is printed, even if the logging is disabled
        if log_enabled!(log::Level::Error) {
            error!("{e}");
        } else {
            eprintln!("{e}");
        }
        std::process::exit(1);
    }
}
