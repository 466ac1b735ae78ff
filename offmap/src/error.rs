use std::io;
use std::path::PathBuf;

use offmap_mbtiles::MbtError;

use crate::config::ConfigFileError;

/// A convenience [`Result`] for the offmap crate.
pub type OffmapResult<T> = Result<T, OffmapError>;

#[derive(thiserror::Error, Debug)]
pub enum OffmapError {
    #[error("Unable to bind to {1}: {0}")]
    BindingError(#[source] io::Error, String),

    #[error("Data directory {0} does not exist or is not a directory")]
    DataPathNotFound(PathBuf),

    #[error("Unable to scan {1}: {0}")]
    DirectoryWalking(#[source] walkdir::Error, PathBuf),

    #[error(transparent)]
    ConfigFileError(#[from] ConfigFileError),

    #[error(transparent)]
    MbtilesError(#[from] MbtError),

    #[error(transparent)]
    WebError(#[from] actix_web::Error),

    #[error(transparent)]
    IoError(#[from] io::Error),
}
