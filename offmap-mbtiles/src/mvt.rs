//! Minimal Mapbox Vector Tile reader.
//!
//! Payloads are parsed with the prost types of `geozero::mvt`. Point geometries are converted
//! to `geo_types` and scaled into a 256 unit tile space; other geometry types are only classified.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use geo_types::{Geometry, MultiPoint, Point};
use geozero::ToGeo as _;
use geozero::mvt::tile::GeomType;
use geozero::mvt::{Message as _, Tile, tile};
use offmap_tile_utils::{DecodeError, Encoding, decode};

/// Size of the tile space decoded coordinates are scaled into
pub const TILE_SIZE: f64 = 256.0;
/// Layer extent assumed when a layer does not declare one
pub const DEFAULT_EXTENT: u32 = 4096;

const CMD_MOVE_TO: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum MvtError {
    #[error(transparent)]
    Decompress(#[from] DecodeError),

    #[error("Invalid vector tile protobuf: {0}")]
    Protobuf(String),

    #[error("Invalid point geometry in layer {0}: {1}")]
    InvalidGeometry(String, String),
}

/// Attribute values as stored in a layer's value table
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    Uint(u64),
    Bool(bool),
}

impl AttrValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl AttrValue {
    fn from_tile_value(value: &tile::Value) -> Option<Self> {
        if let Some(v) = &value.string_value {
            Some(Self::String(v.clone()))
        } else if let Some(v) = value.float_value {
            Some(Self::Float(v))
        } else if let Some(v) = value.double_value {
            Some(Self::Double(v))
        } else if let Some(v) = value.int_value.or(value.sint_value) {
            Some(Self::Int(v))
        } else if let Some(v) = value.uint_value {
            Some(Self::Uint(v))
        } else {
            value.bool_value.map(Self::Bool)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorFeature {
    pub layer: String,
    pub id: Option<u64>,
    pub kind: GeomType,
    /// Point or multi-point in tile units, only decoded for point features
    pub geometry: Option<Geometry<f64>>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl VectorFeature {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}

/// Decompress the payload according to `encoding` and decode all features of all layers.
pub fn decode_tile(data: &[u8], encoding: Encoding) -> Result<Vec<VectorFeature>, MvtError> {
    let data = decode(data, encoding)?;
    let tile = Tile::decode(data.as_slice()).map_err(|e| MvtError::Protobuf(e.to_string()))?;

    let mut features = Vec::new();
    for layer in &tile.layers {
        let extent = layer.extent.filter(|v| *v > 0).unwrap_or(DEFAULT_EXTENT);
        for feature in &layer.features {
            features.push(VectorFeature {
                layer: layer.name.clone(),
                id: feature.id,
                kind: feature.r#type(),
                geometry: decode_points(layer, feature, extent)?,
                attributes: decode_tags(layer, &feature.tags),
            });
        }
    }
    Ok(features)
}

fn decode_tags(layer: &tile::Layer, tags: &[u32]) -> BTreeMap<String, AttrValue> {
    tags.chunks_exact(2)
        .filter_map(|pair| {
            let key = layer.keys.get(usize::try_from(pair[0]).ok()?)?;
            let value = layer.values.get(usize::try_from(pair[1]).ok()?)?;
            AttrValue::from_tile_value(value).map(|v| (key.clone(), v))
        })
        .collect()
}

/// A point geometry must be exactly one `MoveTo` command followed by its parameter pairs.
fn check_point_commands(commands: &[u32]) -> Result<(), String> {
    let Some(&cmd) = commands.first() else {
        return Err("no commands".to_string());
    };
    if cmd & 0x7 != CMD_MOVE_TO {
        return Err("only MoveTo commands are allowed".to_string());
    }
    let count = usize::try_from(cmd >> 3).unwrap_or_default();
    if count == 0 {
        return Err("no coordinates".to_string());
    }
    let params = commands.len() - 1;
    if params != count * 2 {
        return Err(format!("MoveTo of {count} points has {params} parameters"));
    }
    Ok(())
}

fn decode_points(
    layer: &tile::Layer,
    feature: &tile::Feature,
    extent: u32,
) -> Result<Option<Geometry<f64>>, MvtError> {
    if feature.r#type() != GeomType::Point {
        return Ok(None);
    }

    let invalid = |reason| MvtError::InvalidGeometry(layer.name.clone(), reason);
    check_point_commands(&feature.geometry).map_err(invalid)?;
    let geometry = feature.to_geo().map_err(|e| invalid(e.to_string()))?;

    let scale = TILE_SIZE / f64::from(extent);
    let scaled = |p: Point<f64>| Point::new(p.x() * scale, p.y() * scale);
    match geometry {
        Geometry::Point(p) => Ok(Some(Geometry::Point(scaled(p)))),
        Geometry::MultiPoint(points) => Ok(Some(Geometry::MultiPoint(
            points.into_iter().map(scaled).collect::<MultiPoint<f64>>(),
        ))),
        other => Err(invalid(format!("unexpected geometry {other:?}"))),
    }
}
