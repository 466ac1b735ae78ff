use std::fmt::Display;
use std::str::FromStr;

use futures::TryStreamExt as _;
use log::{debug, info, warn};
use offmap_tile_utils::{Encoding, Format, TileInfo};
use serde::ser::SerializeStruct as _;
use serde::{Serialize, Serializer};
use serde_json::Value;
use sqlx::{Row as _, SqliteExecutor, query};
use tilejson::{Bounds, Center, TileJSON, tilejson};

use crate::MbtError::InvalidZoomValue;
use crate::errors::{MbtError, MbtResult};
use crate::Mbtiles;

#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metadata {
    pub id: String,
    #[serde(serialize_with = "serialize_ti")]
    pub tile_info: TileInfo,
    pub layer_type: Option<String>,
    pub tilejson: TileJSON,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_ti<S: Serializer>(ti: &TileInfo, serializer: S) -> Result<S::Ok, S::Error> {
    let mut s = serializer.serialize_struct("TileInfo", 2)?;
    s.serialize_field("format", &ti.format.to_string())?;
    s.serialize_field(
        "encoding",
        ti.encoding.content_encoding().unwrap_or_default(),
    )?;
    s.end()
}

impl Mbtiles {
    fn to_val<V, E: Display>(&self, val: Result<V, E>, title: &str) -> Option<V> {
        match val {
            Ok(v) => Some(v),
            Err(err) => {
                let name = &self.filename();
                warn!("Unable to parse metadata {title} value in {name}: {err}");
                None
            }
        }
    }

    /// Get a single metadata value from the metadata table
    pub async fn get_metadata_value<T>(&self, conn: &mut T, key: &str) -> MbtResult<Option<String>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let row = query("SELECT value FROM metadata WHERE name = ?")
            .bind(key)
            .fetch_optional(conn)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>(0)))
    }

    pub async fn get_metadata_zoom_value<T>(
        &self,
        conn: &mut T,
        zoom_name: &'static str,
    ) -> MbtResult<Option<u8>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        self.get_metadata_value(conn, zoom_name)
            .await?
            .map(|v| v.trim().parse().map_err(|_| InvalidZoomValue(zoom_name, v)))
            .transpose()
    }

    pub async fn set_metadata_value<T, S>(&self, conn: &mut T, key: &str, value: S) -> MbtResult<()>
    where
        S: ToString,
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        query("INSERT OR REPLACE INTO metadata(name, value) VALUES(?, ?)")
            .bind(key)
            .bind(value.to_string())
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Compression of the stored tiles declared by the `compression` metadata value.
    /// Unknown values are logged and ignored.
    pub async fn get_declared_encoding<T>(&self, conn: &mut T) -> MbtResult<Option<Encoding>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        Ok(self
            .get_metadata_value(conn, "compression")
            .await?
            .and_then(|value| self.parse_encoding(&value)))
    }

    fn parse_encoding(&self, value: &str) -> Option<Encoding> {
        let encoding = Encoding::parse(value.trim());
        if encoding.is_none() {
            let file = self.filename();
            warn!("Ignoring unknown compression '{value}' in file {file}");
        }
        encoding
    }

    /// All metadata rows in storage order, used by the CLI
    pub async fn get_metadata_values<T>(&self, conn: &mut T) -> MbtResult<Vec<(String, String)>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let rows = query("SELECT name, value FROM metadata WHERE value IS NOT NULL")
            .fetch_all(conn)
            .await?;
        Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    pub async fn get_metadata<T>(&self, conn: &mut T) -> MbtResult<Metadata>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let query = query("SELECT name, value FROM metadata WHERE value IS NOT ''");
        let mut rows = query.fetch(&mut *conn);

        let mut tj = tilejson! { tiles: vec![] };
        let mut layer_type: Option<String> = None;

        while let Some(row) = rows.try_next().await? {
            let (Some(name), Some(value)) = (
                row.get::<Option<String>, _>(0),
                row.get::<Option<String>, _>(1),
            ) else {
                continue;
            };
            match name.as_ref() {
                "name" => tj.name = Some(value),
                "version" => tj.version = Some(value),
                "bounds" => tj.bounds = self.to_val(Bounds::from_str(value.as_str()), &name),
                "center" => tj.center = self.to_val(Center::from_str(value.as_str()), &name),
                "minzoom" => tj.minzoom = self.to_val(value.trim().parse(), &name),
                "maxzoom" => tj.maxzoom = self.to_val(value.trim().parse(), &name),
                "description" => tj.description = Some(value),
                "attribution" => tj.attribution = Some(value),
                "type" => layer_type = Some(value),
                "legend" => tj.legend = Some(value),
                "template" => tj.template = Some(value),
                "json" => {
                    if let Some(Value::Object(mut obj)) =
                        self.to_val(serde_json::from_str::<Value>(&value), &name)
                    {
                        if let Some(layers) = obj.remove("vector_layers") {
                            tj.vector_layers = self.to_val(serde_json::from_value(layers), &name);
                        }
                    }
                }
                "format" | "generator" => {
                    tj.other.insert(name, Value::String(value));
                }
                "scheme" => {
                    if value != "tms" {
                        let file = &self.filename();
                        warn!(
                            "File {file} has an unexpected metadata value {name}='{value}'. Only 'tms' is supported. Ignoring."
                        );
                    }
                }
                _ => {
                    let file = &self.filename();
                    debug!("{file} has an unrecognized metadata value {name}={value}");
                    tj.other.insert(name, Value::String(value));
                }
            }
        }

        // Need to drop rows in order to re-borrow connection reference as mutable
        drop(rows);

        Ok(Metadata {
            id: self.filename().to_string(),
            tile_info: self.detect_format(&tj, &mut *conn).await?,
            tilejson: tj,
            layer_type,
        })
    }

    /// Combine the first stored tile with the `format` and `compression` metadata values
    /// to find the tile format.
    pub async fn detect_format<T>(&self, tilejson: &TileJSON, conn: &mut T) -> MbtResult<TileInfo>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let row = query("SELECT tile_data FROM tiles WHERE tile_data IS NOT NULL LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
        let mut tile_info = row
            .and_then(|r| r.get::<Option<Vec<u8>>, _>(0))
            .and_then(|data| TileInfo::detect(&data));

        if let Some(Value::String(fmt)) = tilejson.other.get("format") {
            let file = self.filename();
            match (tile_info, Format::parse(fmt)) {
                (_, None) => {
                    warn!("Unknown format value in metadata: {fmt}");
                }
                (None, Some(fmt)) => {
                    if fmt.is_detectable() {
                        warn!(
                            "Metadata table sets detectable '{fmt}' tile format, but it could not be verified for file {file}"
                        );
                    } else {
                        info!("Using '{fmt}' tile format from metadata table in file {file}");
                    }
                    tile_info = Some(fmt.into());
                }
                (Some(info), Some(fmt)) if info.format == fmt => {
                    debug!(
                        "Detected tile format {info} matches metadata.format '{fmt}' in file {file}"
                    );
                }
                (Some(info), _) => {
                    warn!(
                        "Found inconsistency: metadata.format='{fmt}', but tiles were detected as {info:?} in file {file}. Tiles will be returned as {info:?}."
                    );
                }
            }
        }

        if let (Some(info), Some(Value::String(value))) =
            (tile_info.as_mut(), tilejson.other.get("compression"))
        {
            if let Some(encoding) = self.parse_encoding(value) {
                if info.encoding == Encoding::Uncompressed {
                    info.encoding = encoding;
                } else if info.encoding != encoding {
                    warn!(
                        "Found inconsistency: metadata.compression='{value}', but tiles were detected as {info} in file {}",
                        self.filename()
                    );
                }
            }
        }

        tile_info.ok_or(MbtError::NoTilesFound)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::Executor as _;

    use super::*;
    use crate::mbtiles::tests::open;
    use crate::queries::init_mbtiles_schema;

    #[actix_rt::test]
    async fn metadata_set_key() -> MbtResult<()> {
        let (mut conn, mbt) = open("file:metadata_set_key_mem_db?mode=memory&cache=shared").await?;

        conn.execute("CREATE TABLE metadata (name text NOT NULL PRIMARY KEY, value text);")
            .await?;

        mbt.set_metadata_value(&mut conn, "bounds", "0.0, 0.0, 0.0, 0.0")
            .await?;
        assert_eq!(
            mbt.get_metadata_value(&mut conn, "bounds").await?.unwrap(),
            "0.0, 0.0, 0.0, 0.0"
        );

        mbt.set_metadata_value(&mut conn, "bounds", "-180,-85,180,85")
            .await?;
        assert_eq!(
            mbt.get_metadata_value(&mut conn, "bounds").await?.unwrap(),
            "-180,-85,180,85"
        );

        assert_eq!(mbt.get_metadata_value(&mut conn, "").await?, None);
        Ok(())
    }

    #[actix_rt::test]
    async fn zoom_values() -> MbtResult<()> {
        let (mut conn, mbt) = open("file:metadata_zoom_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        mbt.set_metadata_value(&mut conn, "minzoom", 3).await?;
        mbt.set_metadata_value(&mut conn, "maxzoom", "many").await?;

        assert_eq!(mbt.get_metadata_zoom_value(&mut conn, "minzoom").await?, Some(3));
        assert!(matches!(
            mbt.get_metadata_zoom_value(&mut conn, "maxzoom").await,
            Err(InvalidZoomValue("maxzoom", v)) if v == "many"
        ));
        Ok(())
    }

    #[actix_rt::test]
    async fn metadata_vector() -> MbtResult<()> {
        let (mut conn, mbt) = open("file:metadata_vector_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        conn.execute(
            r#"INSERT INTO metadata VALUES
                ('name', 'Cities'),
                ('format', 'pbf'),
                ('minzoom', '0'),
                ('maxzoom', '6'),
                ('bounds', '-123.12,-37.81,174.76,59.35'),
                ('type', 'overlay'),
                ('json', '{"vector_layers":[{"id":"poi","fields":{"name":"String"}}]}');
               INSERT INTO tiles VALUES (0, 0, 0, cast('not detectable' as blob));"#,
        )
        .await?;

        let metadata = mbt.get_metadata(&mut conn).await?;
        assert_eq!(metadata.id, "metadata_vector_mem_db?mode=memory&cache=shared");
        assert_eq!(metadata.tile_info, TileInfo::new(Format::Mvt, Encoding::Uncompressed));
        assert_eq!(metadata.layer_type.as_deref(), Some("overlay"));
        let tj = metadata.tilejson;
        assert_eq!(tj.name.as_deref(), Some("Cities"));
        assert_eq!(tj.minzoom, Some(0));
        assert_eq!(tj.maxzoom, Some(6));
        assert_eq!(tj.bounds, Some(Bounds::new(-123.12, -37.81, 174.76, 59.35)));
        assert_eq!(tj.vector_layers.map(|v| v.len()), Some(1));
        Ok(())
    }

    #[actix_rt::test]
    async fn detected_format_wins() -> MbtResult<()> {
        let (mut conn, mbt) = open("file:metadata_detect_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        assert!(matches!(
            mbt.get_metadata(&mut conn).await,
            Err(MbtError::NoTilesFound)
        ));

        conn.execute(
            "INSERT INTO metadata VALUES ('format', 'jpg');
             INSERT INTO tiles VALUES (0, 0, 0, x'89504E470D0A1A0A0000');",
        )
        .await?;
        let metadata = mbt.get_metadata(&mut conn).await?;
        assert_eq!(metadata.tile_info, Format::Png.into());
        Ok(())
    }

    #[actix_rt::test]
    async fn declared_compression() -> MbtResult<()> {
        let (mut conn, mbt) =
            open("file:metadata_compression_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        assert_eq!(mbt.get_declared_encoding(&mut conn).await?, None);
        conn.execute(
            "INSERT INTO metadata VALUES ('format', 'pbf'), ('compression', 'br');
             INSERT INTO tiles VALUES (0, 0, 0, x'1b0a00f8');",
        )
        .await?;

        assert_eq!(
            mbt.get_declared_encoding(&mut conn).await?,
            Some(Encoding::Brotli)
        );
        let metadata = mbt.get_metadata(&mut conn).await?;
        assert_eq!(metadata.tile_info, TileInfo::new(Format::Mvt, Encoding::Brotli));

        mbt.set_metadata_value(&mut conn, "compression", "lzma").await?;
        assert_eq!(mbt.get_declared_encoding(&mut conn).await?, None);
        let metadata = mbt.get_metadata(&mut conn).await?;
        assert_eq!(metadata.tile_info, TileInfo::new(Format::Mvt, Encoding::Uncompressed));
        Ok(())
    }
}
