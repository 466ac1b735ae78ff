use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use offmap_mbtiles::{MbtilesPool, Metadata};
use offmap_tile_utils::TileInfo;
use serde::{Deserialize, Serialize};
use tilejson::{Bounds, TileJSON};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{OffmapError, OffmapResult};

pub const MBTILES_EXTENSION: &str = "mbtiles";

/// One opened `.mbtiles` file of the tilesets directory
#[derive(Clone, Debug)]
pub struct TilesetSource {
    pub id: String,
    pub path: PathBuf,
    pub pool: MbtilesPool,
    pub tile_info: TileInfo,
    pub tilejson: TileJSON,
}

impl TilesetSource {
    pub async fn open(id: String, path: PathBuf) -> OffmapResult<Self> {
        let pool = MbtilesPool::open_readonly(&path).await?;
        let Metadata {
            tile_info,
            tilejson,
            ..
        } = pool.get_metadata().await?;
        Ok(Self {
            id,
            path,
            pool,
            tile_info,
            tilejson,
        })
    }
}

#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub minzoom: Option<u8>,
    pub maxzoom: Option<u8>,
    pub bounds: Option<Bounds>,
}

pub type TilesetCatalog = BTreeMap<String, CatalogEntry>;

/// Tilesets served by this instance, keyed by file stem
#[derive(Clone, Debug)]
pub struct Tilesets {
    dir: PathBuf,
    sources: Arc<DashMap<String, TilesetSource>>,
}

impl Tilesets {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            sources: Arc::default(),
        }
    }

    /// Open every `*.mbtiles` file directly inside `dir`.
    ///
    /// Files that cannot be opened are skipped with a warning.
    pub async fn resolve(dir: PathBuf) -> OffmapResult<Self> {
        let tilesets = Self::new(dir);
        if !tilesets.dir.is_dir() {
            warn!(
                "Tilesets directory {} does not exist, no tiles will be served",
                tilesets.dir.display()
            );
            return Ok(tilesets);
        }

        for entry in WalkDir::new(&tilesets.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| OffmapError::DirectoryWalking(e, tilesets.dir.clone()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension() != Some(OsStr::new(MBTILES_EXTENSION))
            {
                continue;
            }
            if let Err(err) = tilesets.add_file(path.to_path_buf()).await {
                warn!("Ignoring tileset {}: {err}", path.display());
            }
        }
        info!(
            "Loaded {} tileset(s) from {}",
            tilesets.sources.len(),
            tilesets.dir.display()
        );
        Ok(tilesets)
    }

    /// Open a file and serve it under its file stem, replacing any previous tileset with that id
    pub async fn add_file(&self, path: PathBuf) -> OffmapResult<String> {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = TilesetSource::open(id.clone(), path).await?;
        info!(
            "Serving tileset {id} ({}) from {}",
            source.tile_info.format,
            source.path.display()
        );
        if let Some(previous) = self.sources.insert(id.clone(), source) {
            previous.pool.close().await;
        }
        Ok(id)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<TilesetSource> {
        self.sources.get(id).map(|s| s.value().clone())
    }

    /// Sorted ids of all loaded tilesets
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Paths of all loaded tilesets, sorted by id
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.ids()
            .iter()
            .filter_map(|id| self.sources.get(id).map(|s| s.path.clone()))
            .collect()
    }

    #[must_use]
    pub fn catalog(&self) -> TilesetCatalog {
        self.sources
            .iter()
            .map(|s| {
                let tj = &s.tilejson;
                let entry = CatalogEntry {
                    content_type: s.tile_info.format.content_type().to_string(),
                    content_encoding: s.tile_info.encoding.content_encoding().map(str::to_string),
                    name: tj.name.clone(),
                    description: tj.description.clone(),
                    minzoom: tj.minzoom,
                    maxzoom: tj.maxzoom,
                    bounds: tj.bounds,
                };
                (s.key().clone(), entry)
            })
            .collect()
    }

    /// Map a file name from a request to a path inside the tilesets directory.
    ///
    /// Only plain file names are accepted, and `.mbtiles` is appended when missing.
    #[must_use]
    pub fn resolve_name(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim();
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return None;
        }
        let path = self.dir.join(name);
        if path.extension() == Some(OsStr::new(MBTILES_EXTENSION)) {
            Some(path)
        } else {
            Some(self.dir.join(format!("{name}.{MBTILES_EXTENSION}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("city.mbtiles", Some("data/tilesets/city.mbtiles"))]
    #[case("city", Some("data/tilesets/city.mbtiles"))]
    #[case(" merged ", Some("data/tilesets/merged.mbtiles"))]
    #[case("v1.2", Some("data/tilesets/v1.2.mbtiles"))]
    #[case("", None)]
    #[case("../secret.mbtiles", None)]
    #[case("nested/city.mbtiles", None)]
    #[case(".hidden", None)]
    #[case("a..b", None)]
    fn names_stay_in_the_tilesets_dir(#[case] name: &str, #[case] expected: Option<&str>) {
        let tilesets = Tilesets::new(PathBuf::from("data/tilesets"));
        assert_eq!(tilesets.resolve_name(name), expected.map(PathBuf::from));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tilesets = Tilesets::resolve(dir.path().join("tilesets")).await.unwrap();
        assert!(tilesets.ids().is_empty());
        assert!(tilesets.catalog().is_empty());
    }
}
