use std::path::PathBuf;

use offmap_tile_utils::TileCoord;

use crate::mvt::MvtError;

#[derive(thiserror::Error, Debug)]
pub enum MbtError {
    #[error("The source and destination MBTiles files are the same: {}", .0.display())]
    SameSourceAndDestination(PathBuf),

    #[error("At least one source MBTiles file is required for a merge")]
    NoSources,

    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error("IO error {}: {}", .1.display(), .0)]
    IoError(#[source] std::io::Error, PathBuf),

    #[error("MBTile filepath contains unsupported characters: {}", .0.display())]
    UnsupportedCharsInFilepath(PathBuf),

    #[error("Inconsistent tile formats: {first_file} has '{first}', but {other_file} has '{other}'")]
    InconsistentFormats {
        first_file: String,
        first: String,
        other_file: String,
        other: String,
    },

    #[error("Metadata value `{1}` is not set in MBTiles file {0}")]
    MissingMetadata(String, &'static str),

    #[error("Invalid {0} value: {1}")]
    InvalidZoomValue(&'static str, String),

    #[error("Invalid data format for MBTile file {0}")]
    InvalidDataFormat(String),

    #[error("No tiles found")]
    NoTilesFound,

    #[error("Unable to decode tile {1} in MBTiles file {0}: {2}")]
    TileDecodeError(String, TileCoord, #[source] MvtError),

    #[error("POI index {} does not exist", .0.display())]
    IndexNotFound(PathBuf),

    #[error("Invalid search keyword '{0}': a single non-blank word is required")]
    InvalidKeyword(String),
}

pub type MbtResult<T> = Result<T, MbtError>;
