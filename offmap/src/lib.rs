//! offmap serves tiles, glyph ranges and point-of-interest search from the
//! `MBTiles` archives of a data directory:
//!
//! ```text
//! <data>/tilesets/*.mbtiles       tilesets, each with an optional <name>.mbtiles.idx POI index
//! <data>/fonts/<font>/<range>.pbf pre-built glyph ranges
//! ```
//!
//! Merging archives and building POI indexes run as background tasks, see [`tasks::TaskTracker`].

pub mod config;
pub mod fonts;
pub mod logging;
pub mod sources;
pub mod srv;
pub mod tasks;

mod error;
pub use error::{OffmapError, OffmapResult};
