use std::ffi::OsStr;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use enum_display::EnumDisplay;
use log::debug;
use offmap_tile_utils::invert_y_value;
use serde::Serialize;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection as _, Row as _, SqliteConnection, SqliteExecutor, query};

use crate::errors::{MbtError, MbtResult};
use crate::queries::{
    has_tiles_with_hash, is_flat_tables_type, is_flat_with_hash_tables_type,
    is_normalized_tables_type,
};

/// Storage layout of the tiles inside an `MBTiles` file.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EnumDisplay, Serialize)]
#[enum_display(case = "Kebab")]
#[serde(rename_all = "kebab-case")]
pub enum MbtType {
    /// A single `tiles` table
    Flat,
    /// A `tiles_with_hash` table exposed through a `tiles` view
    FlatWithHash,
    /// Deduplicated `map` + `images` tables joined by a `tiles` view
    Normalized { hash_view: bool },
}

#[derive(Clone, Debug)]
pub struct Mbtiles {
    filepath: String,
    filename: String,
}

impl Display for Mbtiles {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.filepath)
    }
}

impl Mbtiles {
    pub fn new<P: AsRef<Path>>(filepath: P) -> MbtResult<Self> {
        let path = filepath.as_ref();
        Ok(Self {
            filepath: path
                .to_str()
                .ok_or_else(|| MbtError::UnsupportedCharsInFilepath(path.to_path_buf()))?
                .to_string(),
            filename: path
                .file_stem()
                .unwrap_or_else(|| OsStr::new("unknown"))
                .to_string_lossy()
                .to_string(),
        })
    }

    pub async fn open(&self) -> MbtResult<SqliteConnection> {
        debug!("Opening w/ defaults {self}");
        let opt = SqliteConnectOptions::new().filename(self.filepath());
        Ok(SqliteConnection::connect_with(&opt).await?)
    }

    pub async fn open_or_new(&self) -> MbtResult<SqliteConnection> {
        debug!("Opening or creating {self}");
        let opt = SqliteConnectOptions::new()
            .filename(self.filepath())
            .create_if_missing(true);
        Ok(SqliteConnection::connect_with(&opt).await?)
    }

    pub async fn open_readonly(&self) -> MbtResult<SqliteConnection> {
        debug!("Opening as readonly {self}");
        let opt = SqliteConnectOptions::new()
            .filename(self.filepath())
            .read_only(true);
        Ok(SqliteConnection::connect_with(&opt).await?)
    }

    #[must_use]
    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.filepath)
    }

    /// File name without the extension, used as the tileset id
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Size of the file on disk in bytes
    pub async fn file_size(&self) -> MbtResult<u64> {
        let meta = tokio::fs::metadata(self.filepath())
            .await
            .map_err(|e| MbtError::IoError(e, self.path()))?;
        Ok(meta.len())
    }

    /// Get a tile by its XYZ coordinates. The row is inverted to the TMS scheme used by `MBTiles`.
    pub async fn get_tile<T>(
        &self,
        conn: &mut T,
        z: u8,
        x: u32,
        y: u32,
    ) -> MbtResult<Option<Vec<u8>>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let y = invert_y_value(z, y);
        let row = query(
            "SELECT tile_data FROM tiles WHERE zoom_level = ? AND tile_column = ? AND tile_row = ?",
        )
        .bind(z)
        .bind(x)
        .bind(y)
        .fetch_optional(conn)
        .await?;
        Ok(row.and_then(|r| r.get::<Option<Vec<u8>>, _>(0)))
    }

    /// Number of rows in the `tiles` table or view
    pub async fn tile_count<T>(&self, conn: &mut T) -> MbtResult<u64>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let count: i64 = query("SELECT COUNT(*) FROM tiles")
            .fetch_one(conn)
            .await?
            .get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub async fn detect_type<T>(&self, conn: &mut T) -> MbtResult<MbtType>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        debug!("Detecting MBTiles type for {self}");
        if is_normalized_tables_type(&mut *conn).await? {
            Ok(MbtType::Normalized {
                hash_view: has_tiles_with_hash(&mut *conn).await?,
            })
        } else if is_flat_with_hash_tables_type(&mut *conn).await? {
            Ok(MbtType::FlatWithHash)
        } else if is_flat_tables_type(&mut *conn).await? {
            Ok(MbtType::Flat)
        } else {
            Err(MbtError::InvalidDataFormat(self.filepath().to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use sqlx::Executor as _;

    use super::*;
    use crate::queries::init_mbtiles_schema;

    pub async fn open(filepath: &str) -> MbtResult<(SqliteConnection, Mbtiles)> {
        let mbt = Mbtiles::new(filepath)?;
        mbt.open().await.map(|conn| (conn, mbt))
    }

    #[test]
    fn names() {
        let mbt = Mbtiles::new("/data/tilesets/world.mbtiles").unwrap();
        assert_eq!(mbt.filepath(), "/data/tilesets/world.mbtiles");
        assert_eq!(mbt.filename(), "world");
        assert_eq!(mbt.to_string(), "/data/tilesets/world.mbtiles");
    }

    const FLAT_WITH_HASH: &str = "
        CREATE TABLE tiles_with_hash (zoom_level integer NOT NULL, tile_column integer NOT NULL,
            tile_row integer NOT NULL, tile_data blob, tile_hash text,
            PRIMARY KEY(zoom_level, tile_column, tile_row));
        CREATE VIEW tiles AS
            SELECT zoom_level, tile_column, tile_row, tile_data FROM tiles_with_hash;";

    const NORMALIZED: &str = "
        CREATE TABLE map (zoom_level integer NOT NULL, tile_column integer NOT NULL,
            tile_row integer NOT NULL, tile_id text,
            PRIMARY KEY(zoom_level, tile_column, tile_row));
        CREATE TABLE images (tile_id text NOT NULL PRIMARY KEY, tile_data blob);
        CREATE VIEW tiles AS
            SELECT map.zoom_level AS zoom_level, map.tile_column AS tile_column,
                   map.tile_row AS tile_row, images.tile_data AS tile_data
            FROM map JOIN images ON images.tile_id = map.tile_id;";

    #[actix_rt::test]
    async fn detect_schemas() -> MbtResult<()> {
        let (mut conn, mbt) = open("file:detect_flat_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        assert_eq!(mbt.detect_type(&mut conn).await?, MbtType::Flat);

        for (name, sql, typ) in [
            ("flat_hash", FLAT_WITH_HASH, MbtType::FlatWithHash),
            ("norm", NORMALIZED, MbtType::Normalized { hash_view: false }),
        ] {
            let (mut conn, mbt) =
                open(&format!("file:detect_{name}_mem_db?mode=memory&cache=shared")).await?;
            conn.execute(sql).await?;
            assert_eq!(mbt.detect_type(&mut conn).await?, typ);
            assert_eq!(mbt.tile_count(&mut conn).await?, 0);
        }

        let (mut conn, mbt) = open("file:detect_bad_mem_db?mode=memory&cache=shared").await?;
        conn.execute("CREATE TABLE something (a integer);").await?;
        assert!(matches!(
            mbt.detect_type(&mut conn).await,
            Err(MbtError::InvalidDataFormat(_))
        ));
        Ok(())
    }

    #[actix_rt::test]
    async fn tiles_are_addressed_in_xyz() -> MbtResult<()> {
        let (mut conn, mbt) = open("file:xyz_tiles_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        conn.execute(
            "INSERT INTO tiles VALUES (2, 1, 0, cast('bottom' as blob)), (2, 1, 3, cast('top' as blob));",
        )
        .await?;

        assert_eq!(mbt.get_tile(&mut conn, 2, 1, 0).await?.unwrap(), b"top");
        assert_eq!(mbt.get_tile(&mut conn, 2, 1, 3).await?.unwrap(), b"bottom");
        assert_eq!(mbt.get_tile(&mut conn, 2, 2, 2).await?, None);
        assert_eq!(mbt.tile_count(&mut conn).await?, 2);
        Ok(())
    }
}
