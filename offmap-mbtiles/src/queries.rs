use log::debug;
use offmap_tile_utils::MAX_ZOOM;
use sqlx::{Executor as _, Row as _, SqliteExecutor, query};

use crate::MbtError::InvalidZoomValue;
use crate::errors::MbtResult;
use crate::merge::CopyDuplicateMode;
use crate::poi::PoiRecord;

/// One row of the `tiles` table, in TMS coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRow {
    pub zoom_level: i64,
    pub tile_column: i64,
    pub tile_row: i64,
    pub tile_data: Option<Vec<u8>>,
}

async fn is_valid<T>(conn: &mut T, sql: &str) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let row = query(sql).fetch_one(conn).await?;
    Ok(row.get::<Option<i64>, _>(0).unwrap_or_default() == 1)
}

pub async fn is_normalized_tables_type<T>(conn: &mut T) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    is_valid(
        conn,
        "SELECT (
             -- Has a 'map' table
             SELECT COUNT(*) = 1
             FROM sqlite_master
             WHERE name = 'map'
                 AND type = 'table'
             --
         ) AND (
             -- 'map' table's columns and their types are as expected:
             -- 4 columns (zoom_level, tile_column, tile_row, tile_id).
             -- The order is not important
             SELECT COUNT(*) = 4
             FROM pragma_table_info('map')
             WHERE ((name = 'zoom_level' AND type = 'INTEGER')
                 OR (name = 'tile_column' AND type = 'INTEGER')
                 OR (name = 'tile_row' AND type = 'INTEGER')
                 OR (name = 'tile_id' AND type = 'TEXT'))
             --
         ) AND (
             -- Has a 'images' table
             SELECT COUNT(*) = 1
             FROM sqlite_master
             WHERE name = 'images'
                 AND type = 'table'
             --
         ) AND (
             -- 'images' table's columns and their types are as expected:
             -- 2 columns (tile_id, tile_data).
             SELECT COUNT(*) = 2
             FROM pragma_table_info('images')
             WHERE ((name = 'tile_id' AND type = 'TEXT')
                 OR (name = 'tile_data' AND type = 'BLOB'))
             --
         ) AS is_valid;",
    )
    .await
}

/// Check if `MBTiles` has a table or a view named `tiles_with_hash` with needed fields
pub async fn has_tiles_with_hash<T>(conn: &mut T) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    is_valid(
        conn,
        "SELECT (
           -- 5 columns (zoom_level, tile_column, tile_row, tile_data, tile_hash).
           SELECT COUNT(*) = 5
           FROM pragma_table_info('tiles_with_hash')
           WHERE ((name = 'zoom_level' AND type = 'INTEGER')
               OR (name = 'tile_column' AND type = 'INTEGER')
               OR (name = 'tile_row' AND type = 'INTEGER')
               OR (name = 'tile_data' AND type = 'BLOB')
               OR (name = 'tile_hash' AND type = 'TEXT'))
       ) AS is_valid;",
    )
    .await
}

pub async fn is_flat_with_hash_tables_type<T>(conn: &mut T) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let has_table = is_valid(
        &mut *conn,
        "SELECT (
           SELECT COUNT(*) = 1
           FROM sqlite_master
           WHERE name = 'tiles_with_hash'
               AND type = 'table'
       ) AS is_valid;",
    )
    .await?;

    Ok(has_table && has_tiles_with_hash(&mut *conn).await?)
}

pub async fn is_flat_tables_type<T>(conn: &mut T) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    is_valid(
        conn,
        "SELECT (
             -- Has a 'tiles' table
             SELECT COUNT(*) = 1
             FROM sqlite_master
             WHERE name = 'tiles'
                 AND type = 'table'
             --
         ) AND (
             -- 4 columns (zoom_level, tile_column, tile_row, tile_data).
             SELECT COUNT(*) = 4
             FROM pragma_table_info('tiles')
             WHERE ((name = 'zoom_level' AND type = 'INTEGER')
                 OR (name = 'tile_column' AND type = 'INTEGER')
                 OR (name = 'tile_row' AND type = 'INTEGER')
                 OR (name = 'tile_data' AND type = 'BLOB'))
             --
         ) AS is_valid;",
    )
    .await
}

pub async fn create_metadata_table<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating metadata table if it doesn't already exist");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
             name text NOT NULL PRIMARY KEY,
             value text);",
    )
    .await?;

    Ok(())
}

pub async fn create_flat_tables<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating if needed flat table: tiles(z,x,y,data)");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tiles (
             zoom_level integer NOT NULL,
             tile_column integer NOT NULL,
             tile_row integer NOT NULL,
             tile_data blob,
             PRIMARY KEY(zoom_level, tile_column, tile_row));",
    )
    .await?;

    Ok(())
}

/// Create an empty flat `MBTiles` schema: the metadata table and a single `tiles` table
pub async fn init_mbtiles_schema<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    create_metadata_table(&mut *conn).await?;
    create_flat_tables(&mut *conn).await
}

fn validate_zoom(zoom: Option<i64>, zoom_name: &'static str) -> MbtResult<Option<u8>> {
    if let Some(zoom) = zoom {
        let z = u8::try_from(zoom).ok().filter(|v| *v <= MAX_ZOOM);
        if z.is_none() {
            Err(InvalidZoomValue(zoom_name, zoom.to_string()))
        } else {
            Ok(z)
        }
    } else {
        Ok(None)
    }
}

/// Compute min and max zoom levels from the `tiles` table
pub async fn compute_min_max_zoom<T>(conn: &mut T) -> MbtResult<Option<(u8, u8)>>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let info = query(
        "
SELECT min(zoom_level) AS min_zoom,
       max(zoom_level) AS max_zoom
FROM tiles;",
    )
    .fetch_one(conn)
    .await?;

    let min_zoom = validate_zoom(info.get("min_zoom"), "zoom_level")?;
    let max_zoom = validate_zoom(info.get("max_zoom"), "zoom_level")?;

    match (min_zoom, max_zoom) {
        (Some(min_zoom), Some(max_zoom)) => Ok(Some((min_zoom, max_zoom))),
        _ => Ok(None),
    }
}

/// Read one page of tiles in key order
pub async fn fetch_tile_page<T>(conn: &mut T, limit: usize, offset: u64) -> MbtResult<Vec<TileRow>>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let rows = query(
        "SELECT zoom_level, tile_column, tile_row, tile_data
         FROM tiles
         ORDER BY zoom_level, tile_column, tile_row
         LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TileRow {
            zoom_level: row.get(0),
            tile_column: row.get(1),
            tile_row: row.get(2),
            tile_data: row.get(3),
        })
        .collect())
}

/// Insert a single tile into a flat `tiles` table
pub async fn insert_tile<T>(conn: &mut T, tile: &TileRow, on_dupe: CopyDuplicateMode) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let sql = match on_dupe {
        CopyDuplicateMode::Abort => "INSERT",
        CopyDuplicateMode::Override => "INSERT OR REPLACE",
        CopyDuplicateMode::Ignore => "INSERT OR IGNORE",
    };
    query(&format!(
        "{sql} INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?, ?, ?, ?)"
    ))
    .bind(tile.zoom_level)
    .bind(tile.tile_column)
    .bind(tile.tile_row)
    .bind(tile.tile_data.as_deref())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn create_poi_table<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating if needed POI table: poi(id,name,geometry,geometry_type)");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS poi (
             id integer PRIMARY KEY AUTOINCREMENT,
             name text NOT NULL,
             geometry text NOT NULL,
             geometry_type integer NOT NULL);",
    )
    .await?;

    Ok(())
}

pub async fn insert_poi<T>(conn: &mut T, poi: &PoiRecord) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    query("INSERT INTO poi (name, geometry, geometry_type) VALUES (?, ?, ?)")
        .bind(&poi.name)
        .bind(&poi.geometry)
        .bind(poi.geometry_type as i64)
        .execute(conn)
        .await?;
    Ok(())
}

/// Rows of `poi` whose name contains the keyword, in insertion order
pub async fn find_poi<T>(
    conn: &mut T,
    keyword: &str,
    limit: u32,
) -> MbtResult<Vec<(String, String, i64)>>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let rows = query(
        "SELECT name, geometry, geometry_type
         FROM poi
         WHERE instr(name, ?) > 0
         ORDER BY id
         LIMIT ?",
    )
    .bind(keyword)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get(0), row.get(1), row.get(2)))
        .collect())
}

#[cfg(test)]
mod tests {
    use sqlx::Executor as _;

    use super::*;
    use crate::mbtiles::tests::open;

    #[actix_rt::test]
    async fn zoom_range_from_tiles() -> MbtResult<()> {
        let (mut conn, _) = open("file:zoom_range_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        assert_eq!(compute_min_max_zoom(&mut conn).await?, None);

        conn.execute(
            "INSERT INTO tiles VALUES (3, 0, 0, cast('a' as blob)), (7, 1, 1, cast('b' as blob));",
        )
        .await?;
        assert_eq!(compute_min_max_zoom(&mut conn).await?, Some((3, 7)));

        conn.execute("INSERT INTO tiles VALUES (42, 0, 0, cast('c' as blob));")
            .await?;
        assert!(compute_min_max_zoom(&mut conn).await.is_err());
        Ok(())
    }

    #[actix_rt::test]
    async fn paged_reads_follow_key_order() -> MbtResult<()> {
        let (mut conn, _) = open("file:paged_reads_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        conn.execute(
            "INSERT INTO tiles VALUES
                (1, 1, 1, cast('d' as blob)),
                (0, 0, 0, cast('a' as blob)),
                (1, 0, 1, cast('c' as blob)),
                (1, 0, 0, cast('b' as blob));",
        )
        .await?;

        let first = fetch_tile_page(&mut conn, 3, 0).await?;
        let keys: Vec<_> = first
            .iter()
            .map(|t| (t.zoom_level, t.tile_column, t.tile_row))
            .collect();
        assert_eq!(keys, vec![(0, 0, 0), (1, 0, 0), (1, 0, 1)]);

        let second = fetch_tile_page(&mut conn, 3, 3).await?;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tile_data.as_deref(), Some(b"d".as_slice()));
        assert!(fetch_tile_page(&mut conn, 3, 4).await?.is_empty());
        Ok(())
    }

    #[actix_rt::test]
    async fn duplicate_modes() -> MbtResult<()> {
        let (mut conn, _) = open("file:duplicate_modes_mem_db?mode=memory&cache=shared").await?;
        init_mbtiles_schema(&mut conn).await?;
        let tile = |data: &[u8]| TileRow {
            zoom_level: 0,
            tile_column: 0,
            tile_row: 0,
            tile_data: Some(data.to_vec()),
        };

        insert_tile(&mut conn, &tile(b"first"), CopyDuplicateMode::Abort).await?;
        assert!(
            insert_tile(&mut conn, &tile(b"second"), CopyDuplicateMode::Abort)
                .await
                .is_err()
        );
        insert_tile(&mut conn, &tile(b"second"), CopyDuplicateMode::Ignore).await?;
        assert_eq!(fetch_tile_page(&mut conn, 10, 0).await?, vec![tile(b"first")]);
        insert_tile(&mut conn, &tile(b"third"), CopyDuplicateMode::Override).await?;
        assert_eq!(fetch_tile_page(&mut conn, 10, 0).await?, vec![tile(b"third")]);
        Ok(())
    }
}
