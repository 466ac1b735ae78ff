#![doc = "Tile format and compression helpers shared by the offmap crates."]

use std::fmt::{Display, Formatter};

use serde::Serialize;

mod decoders;
pub use decoders::{
    DecodeError, decode, decode_brotli, decode_gzip, decode_zlib, decode_zstd, encode_gzip,
};

/// Highest zoom level the `MBTiles` row inversion can handle.
pub const MAX_ZOOM: u8 = 30;

/// Convert a row number between the XYZ and TMS schemes (the operation is its own inverse).
#[must_use]
pub fn invert_y_value(zoom: u8, y: u32) -> u32 {
    (1u32 << zoom) - 1 - y
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Coordinates are only valid when x and y fit into the zoom level grid.
    #[must_use]
    pub fn new_checked(z: u8, x: u32, y: u32) -> Option<Self> {
        if z > MAX_ZOOM {
            return None;
        }
        let side = 1u32 << z;
        (x < side && y < side).then_some(Self { z, x, y })
    }
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Gif,
    Jpeg,
    Json,
    Mvt,
    Png,
    Webp,
}

impl Format {
    /// Parse the value of the `format` key of the `MBTiles` metadata table.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "gif" => Self::Gif,
            "jpg" | "jpeg" => Self::Jpeg,
            "json" => Self::Json,
            "pbf" | "mvt" => Self::Mvt,
            "png" => Self::Png,
            "webp" => Self::Webp,
            _ => None?,
        })
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        match *self {
            Self::Gif => "image/gif",
            Self::Jpeg => "image/jpeg",
            Self::Json => "application/json",
            Self::Mvt => "application/x-protobuf",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// Uncompressed vector tiles have no magic header, so they cannot be recognized from bytes alone.
    #[must_use]
    pub fn is_detectable(self) -> bool {
        !matches!(self, Self::Mvt)
    }

    #[must_use]
    pub fn is_vector(self) -> bool {
        matches!(self, Self::Mvt)
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match *self {
            Self::Gif => "gif",
            Self::Jpeg => "jpeg",
            Self::Json => "json",
            Self::Mvt => "mvt",
            Self::Png => "png",
            Self::Webp => "webp",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Data is not compressed, but it can be
    #[default]
    Uncompressed,
    /// Some formats like JPEG and PNG are already compressed
    Internal,
    Gzip,
    Zlib,
    Brotli,
    Zstd,
}

impl Encoding {
    /// Parse a compression name, as declared in `MBTiles` metadata or an HTTP header
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "none" => Self::Uncompressed,
            "gzip" => Self::Gzip,
            "zlib" | "deflate" => Self::Zlib,
            "brotli" | "br" => Self::Brotli,
            "zstd" => Self::Zstd,
            _ => None?,
        })
    }

    /// Value of the `Content-Encoding` HTTP header, if any
    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        match *self {
            Self::Uncompressed | Self::Internal => None,
            Self::Gzip => Some("gzip"),
            Self::Zlib => Some("deflate"),
            Self::Brotli => Some("br"),
            Self::Zstd => Some("zstd"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TileInfo {
    pub format: Format,
    pub encoding: Encoding,
}

impl TileInfo {
    #[must_use]
    pub fn new(format: Format, encoding: Encoding) -> Self {
        Self { format, encoding }
    }

    /// Try to figure out the format and encoding of the raw tile data
    #[must_use]
    pub fn detect(value: &[u8]) -> Option<Self> {
        Some(match value {
            // Compressed prefixes assume MVT content
            v if v.starts_with(b"\x1f\x8b") => Self::new(Format::Mvt, Encoding::Gzip),
            v if v.starts_with(b"\x78\x9c") || v.starts_with(b"\x78\x01") => {
                Self::new(Format::Mvt, Encoding::Zlib)
            }
            v if v.starts_with(b"\x28\xb5\x2f\xfd") => Self::new(Format::Mvt, Encoding::Zstd),
            v if v.starts_with(b"\x89\x50\x4E\x47\x0D\x0A\x1A\x0A") => Format::Png.into(),
            v if v.starts_with(b"\x47\x49\x46\x38\x39\x61") => Format::Gif.into(),
            v if v.starts_with(b"\xFF\xD8\xFF") => Format::Jpeg.into(),
            v if v.starts_with(b"RIFF") && v.len() >= 12 && &v[8..12] == b"WEBP" => {
                Format::Webp.into()
            }
            v if v.starts_with(b"{") => Format::Json.into(),
            _ => None?,
        })
    }
}

impl From<Format> for TileInfo {
    fn from(format: Format) -> Self {
        Self::new(
            format,
            match format {
                Format::Png | Format::Jpeg | Format::Webp | Format::Gif => Encoding::Internal,
                Format::Mvt | Format::Json => Encoding::Uncompressed,
            },
        )
    }
}

impl Display for TileInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format)?;
        if let Some(encoding) = self.encoding.content_encoding() {
            write!(f, "; encoding={encoding}")?;
        }
        Ok(())
    }
}
