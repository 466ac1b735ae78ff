use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::errors::MbtResult;
use crate::{Mbtiles, Metadata};

/// Connection pool for concurrent read access to an `MBTiles` file.
///
/// The HTTP layer keeps one pool per loaded tileset. Cloning is cheap and all
/// clones share the same connections.
///
/// ```
/// use offmap_mbtiles::MbtilesPool;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = MbtilesPool::open_readonly("world.mbtiles").await?;
/// let metadata = pool.get_metadata().await?;
/// println!("Format: {}", metadata.tile_info.format);
///
/// if let Some(tile) = pool.get_tile(4, 5, 6).await? {
///     println!("Tile size: {} bytes", tile.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MbtilesPool {
    mbtiles: Mbtiles,
    pool: Pool<Sqlite>,
}

impl MbtilesPool {
    pub async fn open_readonly<P: AsRef<Path>>(filepath: P) -> MbtResult<Self> {
        let mbtiles = Mbtiles::new(filepath)?;
        let opt = SqliteConnectOptions::new()
            .filename(mbtiles.filepath())
            .read_only(true);
        let pool = SqlitePool::connect_with(opt).await?;
        Ok(Self { mbtiles, pool })
    }

    #[must_use]
    pub fn mbtiles(&self) -> &Mbtiles {
        &self.mbtiles
    }

    pub async fn get_metadata(&self) -> MbtResult<Metadata> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles.get_metadata(&mut *conn).await
    }

    /// Get a tile by its XYZ coordinates, see [`Mbtiles::get_tile`].
    pub async fn get_tile(&self, z: u8, x: u32, y: u32) -> MbtResult<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles.get_tile(&mut *conn, z, x, y).await
    }

    /// Close all connections, e.g. before the file is replaced by a merge.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
