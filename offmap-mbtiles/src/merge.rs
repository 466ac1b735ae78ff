use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
use clap::{Args, ValueEnum};
use enum_display::EnumDisplay;
use itertools::Itertools as _;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use size_format::SizeFormatterBinary;
use sqlx::{Connection as _, SqliteConnection};
use tilejson::Bounds;

use crate::descriptor::union_bounds;
use crate::errors::{MbtError, MbtResult};
use crate::progress::{ProgressReporter, running_percent};
use crate::queries::{create_metadata_table, fetch_tile_page, init_mbtiles_schema, insert_tile};
use crate::{DEFAULT_PAGE_SIZE, MbtType, Mbtiles, SourceDescriptor};

/// What to do when a tile with the same `(zoom_level, tile_column, tile_row)` already exists in the target
#[derive(PartialEq, Eq, Default, Debug, Clone, Copy, EnumDisplay, Serialize, Deserialize)]
#[enum_display(case = "Kebab")]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
pub enum CopyDuplicateMode {
    /// Fail the merge on the first conflicting tile
    #[default]
    Abort,
    /// Replace the existing tile
    Override,
    /// Keep the existing tile
    Ignore,
}

/// Metadata of the merged archive, derived from all sources
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregatedMetadata {
    pub format: String,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub bounds: Option<Bounds>,
    pub total_tiles: u64,
}

fn merge_opt<T>(a: Option<T>, b: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, b) => a.or(b),
    }
}

impl AggregatedMetadata {
    /// Check that all sources share one format and union their zoom ranges and bounds.
    pub fn aggregate(sources: &[SourceDescriptor]) -> MbtResult<Self> {
        let (first, rest) = sources.split_first().ok_or(MbtError::NoSources)?;
        let mut agg = Self {
            format: first.format.clone(),
            min_zoom: first.min_zoom,
            max_zoom: first.max_zoom,
            bounds: first.bounds,
            total_tiles: first.tile_count,
        };

        for src in rest {
            if src.format != first.format {
                return Err(MbtError::InconsistentFormats {
                    first_file: first.path.display().to_string(),
                    first: first.format.clone(),
                    other_file: src.path.display().to_string(),
                    other: src.format.clone(),
                });
            }
            agg.min_zoom = merge_opt(agg.min_zoom, src.min_zoom, Ord::min);
            agg.max_zoom = merge_opt(agg.max_zoom, src.max_zoom, Ord::max);
            agg.bounds = merge_opt(agg.bounds, src.bounds, union_bounds);
            agg.total_tiles += src.tile_count;
        }

        Ok(agg)
    }
}

/// A validated merge: the base file is copied as a whole, the remaining files are streamed into it.
/// Without a base, a new flat file is created and every source is streamed.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergePlan {
    pub base: Option<SourceDescriptor>,
    /// Remaining sources in input order
    pub remaining: Vec<SourceDescriptor>,
    pub aggregated: AggregatedMetadata,
}

impl MergePlan {
    /// Build a plan from already collected descriptors. The largest flat file becomes the base,
    /// the first one wins when several files have the same size.
    pub fn from_descriptors(mut descriptors: Vec<SourceDescriptor>) -> MbtResult<Self> {
        let aggregated = AggregatedMetadata::aggregate(&descriptors)?;
        // max_by_key returns the last maximum, so iterate backwards to keep the first one
        let base_idx = descriptors
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, src)| src.mbt_type == MbtType::Flat)
            .max_by_key(|(_, src)| src.file_size)
            .map(|(idx, _)| idx);
        let base = base_idx.map(|idx| descriptors.remove(idx));
        Ok(Self {
            base,
            remaining: descriptors,
            aggregated,
        })
    }

    /// Tiles already present in the target before any streaming
    #[must_use]
    pub fn base_tiles(&self) -> u64 {
        self.base.as_ref().map_or(0, |base| base.tile_count)
    }

    /// Read all sources and build a plan. Repeated paths are only read once.
    pub async fn read<P: AsRef<Path>>(sources: &[P]) -> MbtResult<Self> {
        let mut descriptors = Vec::with_capacity(sources.len());
        for path in sources.iter().map(AsRef::as_ref).unique() {
            descriptors.push(SourceDescriptor::read(path).await?);
        }
        Self::from_descriptors(descriptors)
    }
}

#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergeSummary {
    pub target: PathBuf,
    pub base: Option<PathBuf>,
    pub streamed_tiles: u64,
    pub metadata: AggregatedMetadata,
}

/// Merge several archives of the same format into a new one.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct TileMerger {
    /// MBTiles file to create, replaced if it exists
    pub target: PathBuf,
    /// MBTiles files to merge, all using the same tile format
    #[cfg_attr(feature = "cli", arg(required = true))]
    pub sources: Vec<PathBuf>,
    /// Specify merge behaviour when tiles with duplicate (zoom_level, tile_column, tile_row) values are found
    #[cfg_attr(feature = "cli", arg(long, value_enum, default_value_t = CopyDuplicateMode::default()))]
    pub on_duplicate: CopyDuplicateMode,
    /// Number of tiles read and written per transaction
    #[cfg_attr(feature = "cli", arg(long, default_value_t = DEFAULT_PAGE_SIZE))]
    pub page_size: usize,
}

/// Path of the file a job writes before publishing it under its final name
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    a == b
        || matches!(
            (a.canonicalize(), b.canonicalize()),
            (Ok(a), Ok(b)) if a == b
        )
}

async fn remove_temp_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("Unable to remove temporary file {}: {err}", path.display());
        }
    }
}

impl TileMerger {
    #[must_use]
    pub fn new(sources: Vec<PathBuf>, target: PathBuf) -> Self {
        Self {
            target,
            sources,
            on_duplicate: CopyDuplicateMode::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Validate the sources, copy the base file, stream all other tiles into the copy,
    /// write the merged metadata and finally rename the copy to the target path.
    /// When no source is a flat file, an empty flat file takes the place of the copy.
    ///
    /// Nothing is created when validation fails, and the temporary file is removed on any later failure.
    pub async fn run(&self, progress: &impl ProgressReporter) -> MbtResult<MergeSummary> {
        if let Some(src) = self.sources.iter().find(|s| is_same_file(s, &self.target)) {
            return Err(MbtError::SameSourceAndDestination(src.clone()));
        }

        let plan = MergePlan::read(&self.sources).await?;
        let tmp = temp_path(&self.target);
        if let Err(err) = Self::prepare_target(&plan, &tmp, &self.target).await {
            remove_temp_file(&tmp).await;
            return Err(err);
        }

        let streamed = match self.stream_into(&plan, &tmp, progress).await {
            Ok(v) => v,
            Err(err) => {
                remove_temp_file(&tmp).await;
                return Err(err);
            }
        };

        if let Err(err) = tokio::fs::rename(&tmp, &self.target).await {
            remove_temp_file(&tmp).await;
            return Err(MbtError::IoError(err, self.target.clone()));
        }
        info!(
            "Merged {} tiles into {}",
            plan.aggregated.total_tiles,
            self.target.display()
        );

        Ok(MergeSummary {
            target: self.target.clone(),
            base: plan.base.map(|base| base.path),
            streamed_tiles: streamed,
            metadata: plan.aggregated,
        })
    }

    /// Copy the base file to `tmp`, or create an empty flat file there with the metadata
    /// of the first source.
    async fn prepare_target(plan: &MergePlan, tmp: &Path, target: &Path) -> MbtResult<()> {
        let sources = plan.remaining.len() + usize::from(plan.base.is_some());
        if let Some(base) = &plan.base {
            info!(
                "Merging {sources} files into {}, using {} ({}) as the base",
                target.display(),
                base.path.display(),
                SizeFormatterBinary::new(base.file_size),
            );
            tokio::fs::copy(&base.path, tmp)
                .await
                .map_err(|e| MbtError::IoError(e, tmp.to_path_buf()))?;
            return Ok(());
        }

        let first = plan.remaining.first().ok_or(MbtError::NoSources)?;
        info!(
            "Merging {sources} files into {}, none of them is a flat file so all tiles are streamed",
            target.display(),
        );
        remove_temp_file(tmp).await;
        let src = Mbtiles::new(&first.path)?;
        let mut src_conn = src.open_readonly().await?;
        let metadata = src.get_metadata_values(&mut src_conn).await?;
        src_conn.close().await?;

        let dst = Mbtiles::new(tmp)?;
        let mut conn = dst.open_or_new().await?;
        init_mbtiles_schema(&mut conn).await?;
        for (key, value) in metadata {
            dst.set_metadata_value(&mut conn, &key, value).await?;
        }
        conn.close().await?;
        Ok(())
    }

    async fn stream_into(
        &self,
        plan: &MergePlan,
        tmp: &Path,
        progress: &impl ProgressReporter,
    ) -> MbtResult<u64> {
        let total = plan.aggregated.total_tiles;
        let mut done = plan.base_tiles();
        progress.report(running_percent(done, total));

        let dst = Mbtiles::new(tmp)?;
        let mut conn = dst.open().await?;
        let mut streamed = 0;
        for src in &plan.remaining {
            streamed += self.stream_source(src, &mut conn).await?;
            done += src.tile_count;
            progress.report(running_percent(done, total));
        }

        let agg = &plan.aggregated;
        create_metadata_table(&mut conn).await?;
        if let Some(bounds) = agg.bounds {
            dst.set_metadata_value(&mut conn, "bounds", bounds).await?;
        }
        if let Some(min_zoom) = agg.min_zoom {
            dst.set_metadata_value(&mut conn, "minzoom", min_zoom).await?;
        }
        if let Some(max_zoom) = agg.max_zoom {
            dst.set_metadata_value(&mut conn, "maxzoom", max_zoom).await?;
        }
        conn.close().await?;

        Ok(streamed)
    }

    async fn stream_source(
        &self,
        src: &SourceDescriptor,
        dst: &mut SqliteConnection,
    ) -> MbtResult<u64> {
        let mbt = Mbtiles::new(&src.path)?;
        debug!("Streaming {} tiles from {mbt}", src.tile_count);
        let mut src_conn = mbt.open_readonly().await?;
        let page_size = self.page_size.max(1);
        let mut offset = 0_u64;
        loop {
            let page = fetch_tile_page(&mut src_conn, page_size, offset).await?;
            if page.is_empty() {
                break;
            }
            let mut tx = dst.begin().await?;
            for tile in &page {
                insert_tile(&mut *tx, tile, self.on_duplicate).await?;
            }
            tx.commit().await?;

            offset += page.len() as u64;
            if page.len() < page_size {
                break;
            }
        }
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn src(name: &str, format: &str, size: u64, tiles: u64) -> SourceDescriptor {
        SourceDescriptor {
            path: PathBuf::from(name),
            format: format.to_string(),
            mbt_type: MbtType::Flat,
            min_zoom: Some(0),
            max_zoom: Some(2),
            bounds: Some(Bounds::new(0.0, 0.0, 1.0, 1.0)),
            tile_count: tiles,
            file_size: size,
        }
    }

    #[test]
    fn largest_file_is_base() {
        let plan = MergePlan::from_descriptors(vec![
            src("a", "pbf", 10, 100),
            src("b", "pbf", 2, 20),
            src("c", "pbf", 5, 50),
        ])
        .unwrap();
        assert_eq!(plan.base.as_ref().unwrap().path, PathBuf::from("a"));
        let rest: Vec<_> = plan.remaining.iter().map(|s| s.path.clone()).collect();
        assert_eq!(rest, vec![PathBuf::from("b"), PathBuf::from("c")]);
        assert_eq!(plan.aggregated.total_tiles, 170);
        assert_eq!(running_percent(plan.base_tiles(), 170), 58);

        let plan = MergePlan::from_descriptors(vec![
            src("a", "pbf", 2, 1),
            src("b", "pbf", 7, 1),
            src("c", "pbf", 7, 1),
        ])
        .unwrap();
        assert_eq!(plan.base.unwrap().path, PathBuf::from("b"));
    }

    #[test]
    fn only_flat_files_are_base() {
        let mut norm = src("a", "pbf", 10, 100);
        norm.mbt_type = MbtType::Normalized { hash_view: false };
        let mut hashed = src("b", "pbf", 8, 100);
        hashed.mbt_type = MbtType::FlatWithHash;

        let plan =
            MergePlan::from_descriptors(vec![norm.clone(), hashed.clone(), src("c", "pbf", 2, 1)])
                .unwrap();
        assert_eq!(plan.base.unwrap().path, PathBuf::from("c"));
        assert_eq!(plan.remaining.len(), 2);

        let plan = MergePlan::from_descriptors(vec![norm, hashed]).unwrap();
        assert_eq!(plan.base, None);
        assert_eq!(plan.base_tiles(), 0);
        assert_eq!(plan.remaining.len(), 2);
    }

    #[test]
    fn aggregate_unions() {
        let mut a = src("a", "png", 1, 3);
        a.min_zoom = Some(2);
        a.max_zoom = Some(5);
        a.bounds = Some(Bounds::new(0.0, 0.0, 1.0, 1.0));
        let mut b = src("b", "png", 1, 4);
        b.min_zoom = Some(0);
        b.max_zoom = Some(3);
        b.bounds = None;
        let mut c = src("c", "png", 1, 5);
        c.bounds = Some(Bounds::new(2.0, 2.0, 3.0, 3.0));

        let agg = AggregatedMetadata::aggregate(&[a, b, c]).unwrap();
        assert_eq!(
            agg,
            AggregatedMetadata {
                format: "png".to_string(),
                min_zoom: Some(0),
                max_zoom: Some(5),
                bounds: Some(Bounds::new(0.0, 0.0, 3.0, 3.0)),
                total_tiles: 12,
            }
        );
    }

    #[test]
    fn aggregate_rejects() {
        assert!(matches!(
            AggregatedMetadata::aggregate(&[]),
            Err(MbtError::NoSources)
        ));
        let err = AggregatedMetadata::aggregate(&[src("a", "pbf", 1, 1), src("b", "png", 1, 1)])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Inconsistent tile formats: a has 'pbf', but b has 'png'"
        );
    }

    #[test]
    fn temp_names() {
        assert_eq!(
            temp_path(Path::new("/data/merged.mbtiles")),
            PathBuf::from("/data/merged.mbtiles.tmp")
        );
        assert_eq!(CopyDuplicateMode::default().to_string(), "abort");
    }
}
