//! `MBTiles` access for offmap.
//!
//! Besides reading tiles and metadata, this crate merges several archives of the
//! same tile format into a single file ([`TileMerger`]) and builds a searchable
//! point-of-interest index next to vector tile archives ([`PoiIndexer`], [`search_poi`]).

mod descriptor;
pub use descriptor::{SourceDescriptor, union_bounds};

mod errors;
pub use errors::{MbtError, MbtResult};

mod mbtiles;
pub use mbtiles::{MbtType, Mbtiles};

mod merge;
pub use merge::{
    AggregatedMetadata, CopyDuplicateMode, MergePlan, MergeSummary, TileMerger, temp_path,
};

mod metadata;
pub use metadata::Metadata;

pub mod mvt;

mod poi;
pub use poi::{
    GeometryType, NAME_ATTRIBUTE, POI_SEARCH_LIMIT, PoiIndexOutcome, PoiIndexStats, PoiIndexer,
    PoiRecord, PoiSearchResult, TileErrorPolicy, extract_pois, index_path, search_poi,
    validate_keyword,
};

mod pool;
pub use pool::MbtilesPool;

mod progress;
pub use progress::{ProgressReporter, RecordedProgress, running_percent};

mod queries;
pub use queries::{
    TileRow, compute_min_max_zoom, create_flat_tables, create_metadata_table, create_poi_table,
    fetch_tile_page, init_mbtiles_schema, insert_poi, insert_tile,
};

/// Number of tiles per read page and per write transaction
pub const DEFAULT_PAGE_SIZE: usize = 5000;
