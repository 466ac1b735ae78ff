use std::path::{Path, PathBuf};
use std::str::FromStr as _;

use log::{debug, warn};
use serde::Serialize;
use tilejson::Bounds;

use crate::errors::{MbtError, MbtResult};
use crate::queries::compute_min_max_zoom;
use crate::{MbtType, Mbtiles};

/// Read-only summary of an archive, used to plan a merge.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    /// Raw `format` metadata value, compared verbatim between sources
    pub format: String,
    /// Storage layout, only flat files can be copied and written to
    pub mbt_type: MbtType,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub bounds: Option<Bounds>,
    pub tile_count: u64,
    pub file_size: u64,
}

impl SourceDescriptor {
    /// Open the archive read-only and collect its metadata.
    ///
    /// Missing zoom metadata falls back to the zoom range of the stored tiles.
    /// A missing or unparsable `bounds` value leaves the box empty.
    pub async fn read<P: AsRef<Path>>(path: P) -> MbtResult<Self> {
        let mbt = Mbtiles::new(path.as_ref())?;
        let file_size = mbt.file_size().await?;
        let mut conn = mbt.open_readonly().await?;
        let mbt_type = mbt.detect_type(&mut conn).await?;

        let format = mbt
            .get_metadata_value(&mut conn, "format")
            .await?
            .ok_or_else(|| MbtError::MissingMetadata(mbt.filepath().to_string(), "format"))?;

        let mut min_zoom = mbt.get_metadata_zoom_value(&mut conn, "minzoom").await?;
        let mut max_zoom = mbt.get_metadata_zoom_value(&mut conn, "maxzoom").await?;
        if min_zoom.is_none() || max_zoom.is_none() {
            debug!("Computing zoom range of {mbt} from its tiles");
            if let Some((min, max)) = compute_min_max_zoom(&mut conn).await? {
                min_zoom = min_zoom.or(Some(min));
                max_zoom = max_zoom.or(Some(max));
            }
        }

        let bounds = match mbt.get_metadata_value(&mut conn, "bounds").await? {
            Some(value) => match Bounds::from_str(&value) {
                Ok(bounds) => Some(bounds),
                Err(err) => {
                    warn!("Ignoring invalid bounds '{value}' in {mbt}: {err}");
                    None
                }
            },
            None => None,
        };

        let tile_count = mbt.tile_count(&mut conn).await?;

        Ok(Self {
            path: mbt.path(),
            format,
            mbt_type,
            min_zoom,
            max_zoom,
            bounds,
            tile_count,
            file_size,
        })
    }
}

/// Component-wise union of two boxes
#[must_use]
pub fn union_bounds(a: Bounds, b: Bounds) -> Bounds {
    Bounds::new(
        a.left.min(b.left),
        a.bottom.min(b.bottom),
        a.right.max(b.right),
        a.top.max(b.top),
    )
}
