use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr as _;

#[cfg(feature = "cli")]
use clap::{Args, ValueEnum};
use enum_display::EnumDisplay;
use geo_types::{Geometry, Point};
use geozero::ToWkt as _;
use log::{debug, info, warn};
use offmap_tile_utils::{Encoding, Format, TileCoord, TileInfo};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection as _, SqliteConnection};
use wkt::Wkt;

use crate::errors::{MbtError, MbtResult};
use crate::merge::temp_path;
use crate::mvt::{AttrValue, VectorFeature, decode_tile};
use crate::progress::{ProgressReporter, running_percent};
use crate::queries::{TileRow, create_poi_table, fetch_tile_page, find_poi, insert_poi};
use crate::{DEFAULT_PAGE_SIZE, Mbtiles};

/// Maximum number of rows returned by a POI search
pub const POI_SEARCH_LIMIT: u32 = 10;

/// Attribute holding the searchable name of a feature
pub const NAME_ATTRIBUTE: &str = "name";

/// Location of the POI index built for an archive: `<archive>.idx`
#[must_use]
pub fn index_path(archive: &Path) -> PathBuf {
    let mut name = OsString::from(archive.as_os_str());
    name.push(".idx");
    PathBuf::from(name)
}

/// Value of the `geometry_type` column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
    Point = 0,
    Other = 1,
}

impl GeometryType {
    #[must_use]
    pub fn from_db(value: i64) -> Self {
        if value == 0 { Self::Point } else { Self::Other }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoiRecord {
    pub name: String,
    pub geometry: String,
    pub geometry_type: GeometryType,
}

impl PoiRecord {
    /// Only single points with a non-blank string name are indexed
    #[must_use]
    pub fn from_feature(feature: &VectorFeature) -> Option<Self> {
        let Some(geometry @ Geometry::Point(_)) = &feature.geometry else {
            return None;
        };
        let name = feature.get(NAME_ATTRIBUTE).and_then(AttrValue::as_str)?;
        if name.trim().is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            geometry: geometry.to_wkt().ok()?,
            geometry_type: GeometryType::Point,
        })
    }
}

/// How to treat tiles that cannot be decoded while building an index
#[derive(PartialEq, Eq, Default, Debug, Clone, Copy, EnumDisplay, Serialize, Deserialize)]
#[enum_display(case = "Kebab")]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
pub enum TileErrorPolicy {
    /// Log the tile and continue with the next one
    #[default]
    Skip,
    /// Fail the whole build
    Abort,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoiIndexStats {
    pub index: PathBuf,
    pub tiles: u64,
    pub pois: u64,
    pub skipped_tiles: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoiIndexOutcome {
    /// The archive does not contain vector tiles, the value of its `format` metadata is attached
    NotVector(Option<String>),
    /// An index already exists and was left untouched
    AlreadyIndexed(PathBuf),
    Built(PoiIndexStats),
}

/// Build the point-of-interest index of a vector tile archive.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct PoiIndexer {
    /// MBTiles file to index
    pub file: PathBuf,
    /// Number of tiles read per page, and number of buffered points that triggers a write
    #[cfg_attr(feature = "cli", arg(long, default_value_t = DEFAULT_PAGE_SIZE))]
    pub page_size: usize,
    /// What to do with tiles that cannot be decoded
    #[cfg_attr(feature = "cli", arg(long, value_enum, default_value_t = TileErrorPolicy::default()))]
    pub on_tile_error: TileErrorPolicy,
}

#[derive(Default)]
struct BuildStats {
    tiles: u64,
    pois: u64,
    skipped_tiles: u64,
}

impl PoiIndexer {
    #[must_use]
    pub fn new(file: PathBuf) -> Self {
        Self {
            file,
            page_size: DEFAULT_PAGE_SIZE,
            on_tile_error: TileErrorPolicy::default(),
        }
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        index_path(&self.file)
    }

    /// Build `<file>.idx` unless it already exists. The index is written under a temporary
    /// name first, so an existing index file is always complete.
    pub async fn run(&self, progress: &impl ProgressReporter) -> MbtResult<PoiIndexOutcome> {
        let mbt = Mbtiles::new(&self.file)?;
        let mut conn = mbt.open_readonly().await?;

        let format = mbt.get_metadata_value(&mut conn, "format").await?;
        if !format
            .as_deref()
            .and_then(Format::parse)
            .is_some_and(Format::is_vector)
        {
            debug!("Skipping POI index of {mbt}: format {format:?} is not a vector format");
            return Ok(PoiIndexOutcome::NotVector(format));
        }

        let index = self.index_path();
        if tokio::fs::try_exists(&index)
            .await
            .map_err(|e| MbtError::IoError(e, index.clone()))?
        {
            debug!("POI index {} already exists", index.display());
            return Ok(PoiIndexOutcome::AlreadyIndexed(index));
        }

        let tmp = temp_path(&index);
        remove_file_if_exists(&tmp).await?;
        let declared = mbt.get_declared_encoding(&mut conn).await?;
        info!("Building POI index {} of {mbt}", index.display());

        let stats = match self.build(&mbt, &mut conn, declared, &tmp, progress).await {
            Ok(v) => v,
            Err(err) => {
                let _ = remove_file_if_exists(&tmp).await;
                return Err(err);
            }
        };
        if let Err(err) = tokio::fs::rename(&tmp, &index).await {
            let _ = remove_file_if_exists(&tmp).await;
            return Err(MbtError::IoError(err, index));
        }

        info!(
            "Indexed {} points from {} tiles of {mbt}, {} tiles skipped",
            stats.pois, stats.tiles, stats.skipped_tiles
        );
        Ok(PoiIndexOutcome::Built(PoiIndexStats {
            index,
            tiles: stats.tiles,
            pois: stats.pois,
            skipped_tiles: stats.skipped_tiles,
        }))
    }

    async fn build(
        &self,
        mbt: &Mbtiles,
        conn: &mut SqliteConnection,
        declared: Option<Encoding>,
        tmp: &Path,
        progress: &impl ProgressReporter,
    ) -> MbtResult<BuildStats> {
        let total = mbt.tile_count(&mut *conn).await?;
        let idx = Mbtiles::new(tmp)?;
        let mut idx_conn = idx.open_or_new().await?;
        create_poi_table(&mut idx_conn).await?;

        let page_size = self.page_size.max(1);
        let mut stats = BuildStats::default();
        let mut buffer = Vec::new();
        loop {
            let page = fetch_tile_page(&mut *conn, page_size, stats.tiles).await?;
            for tile in &page {
                match extract_tile(mbt, tile, declared) {
                    Ok(pois) => buffer.extend(pois),
                    Err(err) if self.on_tile_error == TileErrorPolicy::Skip => {
                        warn!("{err}");
                        stats.skipped_tiles += 1;
                    }
                    Err(err) => return Err(err),
                }
                if buffer.len() > page_size {
                    stats.pois += flush(&mut idx_conn, &mut buffer).await?;
                }
            }

            stats.tiles += page.len() as u64;
            progress.report(running_percent(stats.tiles, total));
            if page.len() < page_size {
                break;
            }
        }
        stats.pois += flush(&mut idx_conn, &mut buffer).await?;
        idx_conn.close().await?;

        Ok(stats)
    }
}

/// Decode a stored tile and keep its named points. The compression declared by the archive
/// wins over the one detected from the tile bytes.
fn extract_tile(
    mbt: &Mbtiles,
    tile: &TileRow,
    declared: Option<Encoding>,
) -> MbtResult<Vec<PoiRecord>> {
    let Some(data) = tile.tile_data.as_deref() else {
        return Ok(Vec::new());
    };
    let encoding = declared.unwrap_or_else(|| {
        TileInfo::detect(data).map_or(Encoding::Uncompressed, |info| info.encoding)
    });
    match decode_tile(data, encoding) {
        Ok(features) => Ok(extract_pois(&features)),
        Err(err) => {
            let coord = TileCoord {
                z: u8::try_from(tile.zoom_level).unwrap_or_default(),
                x: u32::try_from(tile.tile_column).unwrap_or_default(),
                y: u32::try_from(tile.tile_row).unwrap_or_default(),
            };
            Err(MbtError::TileDecodeError(
                mbt.filepath().to_string(),
                coord,
                err,
            ))
        }
    }
}

#[must_use]
pub fn extract_pois(features: &[VectorFeature]) -> Vec<PoiRecord> {
    features.iter().filter_map(PoiRecord::from_feature).collect()
}

async fn flush(conn: &mut SqliteConnection, buffer: &mut Vec<PoiRecord>) -> MbtResult<u64> {
    if buffer.is_empty() {
        return Ok(0);
    }
    let count = buffer.len() as u64;
    let mut tx = conn.begin().await?;
    for poi in buffer.drain(..) {
        insert_poi(&mut *tx, &poi).await?;
    }
    tx.commit().await?;
    debug!("Stored {count} points");
    Ok(count)
}

async fn remove_file_if_exists(path: &Path) -> MbtResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MbtError::IoError(e, path.to_path_buf())),
    }
}

/// Check a search keyword: it must be a single word. Surrounding whitespace is ignored.
pub fn validate_keyword(keyword: &str) -> MbtResult<&str> {
    let trimmed = keyword.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        Err(MbtError::InvalidKeyword(keyword.to_string()))
    } else {
        Ok(trimmed)
    }
}

/// Turn the stored WKT of a point into `"(x, y)"`
fn point_coordinate(geometry: &str) -> Option<String> {
    let wkt = Wkt::<f64>::from_str(geometry).ok()?;
    let point = Point::try_from(wkt).ok()?;
    Some(format!("({}, {})", point.x(), point.y()))
}

#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiSearchResult {
    pub name: String,
    /// `"(x, y)"` in tile units for points
    pub coordinate: Option<String>,
}

/// Find up to [`POI_SEARCH_LIMIT`] points whose name contains `keyword` (case-sensitive),
/// in the order they were indexed.
pub async fn search_poi(index: &Path, keyword: &str) -> MbtResult<Vec<PoiSearchResult>> {
    let keyword = validate_keyword(keyword)?;
    if !tokio::fs::try_exists(index)
        .await
        .map_err(|e| MbtError::IoError(e, index.to_path_buf()))?
    {
        return Err(MbtError::IndexNotFound(index.to_path_buf()));
    }

    let opt = SqliteConnectOptions::new().filename(index).read_only(true);
    let mut conn = SqliteConnection::connect_with(&opt).await?;
    let rows = find_poi(&mut conn, keyword, POI_SEARCH_LIMIT).await?;

    Ok(rows
        .into_iter()
        .map(|(name, geometry, geometry_type)| PoiSearchResult {
            name,
            coordinate: match GeometryType::from_db(geometry_type) {
                GeometryType::Point => point_coordinate(&geometry),
                GeometryType::Other => None,
            },
        })
        .collect())
}
