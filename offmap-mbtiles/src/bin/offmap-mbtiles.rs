use std::path::{Path, PathBuf};

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, Subcommand};
use log::{error, info};
use offmap_mbtiles::{
    MbtResult, Mbtiles, PoiIndexOutcome, PoiIndexer, ProgressReporter, SourceDescriptor,
    TileMerger, index_path, search_poi,
};
use tracing_subscriber::EnvFilter;

/// Defines the styles used for the CLI help output.
const HELP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Blue.on_default().bold())
    .usage(AnsiColor::Blue.on_default().bold())
    .literal(AnsiColor::White.on_default())
    .placeholder(AnsiColor::Green.on_default());

#[derive(Parser, PartialEq, Debug)]
#[command(
    version,
    name = "offmap-mbtiles",
    about = "A utility to merge, inspect and index .mbtiles files",
    after_help = "Use RUST_LOG environment variable to control logging level, e.g. RUST_LOG=debug or RUST_LOG=offmap_mbtiles=debug.",
    styles = HELP_STYLES
)]
pub struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, PartialEq, Debug)]
enum Commands {
    /// Prints all values in the metadata table in a free-style, unstable YAML format
    #[command(name = "meta-all")]
    MetaAll {
        /// `MBTiles` file to read from
        file: PathBuf,
    },
    /// Gets a single value from the `MBTiles` metadata table.
    #[command(name = "meta-get", alias = "get-meta")]
    MetaGetValue {
        /// `MBTiles` file to read a value from
        file: PathBuf,
        /// Value to read
        key: String,
    },
    /// Shows format, zoom range, bounds, tile count and size of a file, as used when planning a merge
    #[command(name = "describe")]
    Describe { file: PathBuf },
    /// Merges several `MBTiles` files with the same tile format into a new file
    #[command(name = "merge")]
    Merge(TileMerger),
    /// Builds the point-of-interest index `<file>.idx` of a vector tiles file
    #[command(name = "poi-index")]
    PoiIndex(PoiIndexer),
    /// Searches the point-of-interest index of a file
    #[command(name = "poi-search")]
    PoiSearch {
        /// `MBTiles` file whose index should be searched
        file: PathBuf,
        /// A single word contained in the point name
        keyword: String,
    },
}

struct LogProgress(&'static str);

impl ProgressReporter for LogProgress {
    fn report(&self, percent: u8) {
        info!("{} {percent}%", self.0);
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("offmap_mbtiles=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();

    if let Err(err) = main_int().await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn main_int() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Commands::MetaAll { file } => {
            meta_print_all(file.as_path()).await?;
        }
        Commands::MetaGetValue { file, key } => {
            meta_get_value(file.as_path(), &key).await?;
        }
        Commands::Describe { file } => {
            let descriptor = SourceDescriptor::read(&file).await?;
            println!("{}", serde_yaml::to_string(&descriptor)?);
        }
        Commands::Merge(merger) => {
            let summary = merger.run(&LogProgress("Merging")).await?;
            println!("{}", serde_yaml::to_string(&summary)?);
        }
        Commands::PoiIndex(indexer) => match indexer.run(&LogProgress("Indexing")).await? {
            PoiIndexOutcome::NotVector(format) => {
                anyhow::bail!(
                    "{} does not contain vector tiles (format: {})",
                    indexer.file.display(),
                    format.as_deref().unwrap_or("unknown")
                );
            }
            PoiIndexOutcome::AlreadyIndexed(index) => {
                println!("{} already exists", index.display());
            }
            PoiIndexOutcome::Built(stats) => {
                println!("{}", serde_yaml::to_string(&stats)?);
            }
        },
        Commands::PoiSearch { file, keyword } => {
            for result in search_poi(&index_path(&file), &keyword).await? {
                match result.coordinate {
                    Some(coord) => println!("{}\t{coord}", result.name),
                    None => println!("{}", result.name),
                }
            }
        }
    }

    Ok(())
}

async fn meta_print_all(file: &Path) -> anyhow::Result<()> {
    let mbt = Mbtiles::new(file)?;
    let mut conn = mbt.open_readonly().await?;
    let metadata = mbt.get_metadata(&mut conn).await?;
    println!("{}", serde_yaml::to_string(&metadata)?);
    Ok(())
}

async fn meta_get_value(file: &Path, key: &str) -> MbtResult<()> {
    let mbt = Mbtiles::new(file)?;
    let mut conn = mbt.open_readonly().await?;
    if let Some(s) = mbt.get_metadata_value(&mut conn, key).await? {
        println!("{s}");
    }
    Ok(())
}
