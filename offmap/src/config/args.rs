use std::path::PathBuf;

use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;

use crate::config::{Config, DATA_PATH_DEFAULT, KEEP_ALIVE_DEFAULT, LISTEN_ADDRESSES_DEFAULT};

/// Defines the styles used for the CLI help output.
const HELP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Blue.on_default().bold())
    .usage(AnsiColor::Blue.on_default().bold())
    .literal(AnsiColor::White.on_default())
    .placeholder(AnsiColor::Green.on_default());

#[derive(Parser, Debug, PartialEq, Default)]
#[command(
    about,
    version,
    after_help = "Use RUST_LOG environment variable to control logging level, e.g. RUST_LOG=debug or RUST_LOG=offmap=debug. Use OFFMAP_FORMAT to choose the log format (full, compact, bare, pretty, json).",
    styles = HELP_STYLES
)]
pub struct Args {
    #[command(flatten)]
    pub meta: MetaArgs,
    #[command(flatten)]
    pub srv: SrvArgs,
}

// None of these params will be transferred to the config
#[derive(clap::Args, Debug, Clone, PartialEq, Default)]
pub struct MetaArgs {
    /// Path to config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Save resulting config to a file or use "-" to print to stdout.
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone, PartialEq, Default)]
pub struct SrvArgs {
    #[arg(help = format!("Connection keep alive timeout. [DEFAULT: {KEEP_ALIVE_DEFAULT}]"), short, long)]
    pub keep_alive: Option<u64>,
    #[arg(help = format!("The socket address to bind. [DEFAULT: {LISTEN_ADDRESSES_DEFAULT}]"), short, long)]
    pub listen_addresses: Option<String>,
    /// Number of web server workers
    #[arg(short = 'W', long)]
    pub workers: Option<usize>,
    #[arg(help = format!("Directory with the tilesets/ and fonts/ subdirectories. [DEFAULT: {DATA_PATH_DEFAULT}]"), short, long)]
    pub data: Option<PathBuf>,
    /// Maximum number of merge and index jobs running at the same time. [DEFAULT: number of CPUs]
    #[arg(short = 'j', long)]
    pub max_jobs: Option<usize>,
}

impl Args {
    /// Command line values take precedence over the config file
    pub fn merge_into_config(self, config: &mut Config) {
        let srv = self.srv;
        if srv.keep_alive.is_some() {
            config.srv.keep_alive = srv.keep_alive;
        }
        if srv.listen_addresses.is_some() {
            config.srv.listen_addresses = srv.listen_addresses;
        }
        if srv.workers.is_some() {
            config.srv.worker_processes = srv.workers;
        }
        if srv.data.is_some() {
            config.data_path = srv.data;
        }
        if srv.max_jobs.is_some() {
            config.tasks.max_concurrent_jobs = srv.max_jobs;
        }
    }
}
