use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row, ToSql};

use crate::error::AppError;
use crate::models::media::{
    Block, DirInfo, MediaHash, MediaKind, MediaRecord, MediaWithRelations, NewMedia, Thumbnail,
};
use crate::models::search::{DirectoryCount, SearchHit, SearchOptions};

const MEDIA_COLUMNS: &str = "m.id, m.hash, m.kind, m.mime, m.timestamp, m.width, m.height, \
     m.dominant_colour, m.perceptual_hash, m.blurhash, m.processed";

fn media_from_row(row: &Row<'_>) -> Result<MediaRecord, rusqlite::Error> {
    let hash: String = row.get(1)?;
    let kind: String = row.get(2)?;
    Ok(MediaRecord {
        id: row.get(0)?,
        hash: MediaHash::from(hash),
        kind: kind
            .parse::<MediaKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        mime: row.get(3)?,
        timestamp: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        dominant_colour: row.get(7)?,
        perceptual_hash: row.get(8)?,
        blurhash: row.get(9)?,
        processed: row.get(10)?,
    })
}

fn dir_info_from_row(row: &Row<'_>) -> Result<DirInfo, rusqlite::Error> {
    Ok(DirInfo {
        media_id: row.get(0)?,
        directory_alias: row.get(1)?,
        file_name: row.get(2)?,
    })
}

pub fn get_dir_info(
    conn: &Connection,
    directory_alias: &str,
    file_name: &str,
) -> Result<Option<DirInfo>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT media_id, directory_alias, file_name
         FROM dir_infos WHERE directory_alias = ?1 AND file_name = ?2 LIMIT 1",
    )?;

    let info = stmt
        .query_row(params![directory_alias, file_name], dir_info_from_row)
        .optional()?;

    Ok(info)
}

pub fn get_dir_info_by_media_hash(
    conn: &Connection,
    hash: &MediaHash,
) -> Result<Option<DirInfo>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT d.media_id, d.directory_alias, d.file_name
         FROM dir_infos d JOIN medias m ON m.id = d.media_id
         WHERE m.hash = ?1 ORDER BY d.id LIMIT 1",
    )?;

    let info = stmt
        .query_row(params![hash.as_str()], dir_info_from_row)
        .optional()?;

    Ok(info)
}

pub fn get_media_by_hash(
    conn: &Connection,
    hash: &MediaHash,
) -> Result<Option<MediaRecord>, AppError> {
    let sql = format!("SELECT {MEDIA_COLUMNS} FROM medias m WHERE m.hash = ?1 LIMIT 1");
    let mut stmt = conn.prepare(&sql)?;
    let media = stmt
        .query_row(params![hash.as_str()], media_from_row)
        .optional()?;
    Ok(media)
}

/// Returns the record id for `media.hash` and whether this call created it.
pub fn create_media_if_absent(
    conn: &Connection,
    media: &NewMedia,
) -> Result<(i64, bool), AppError> {
    let inserted = conn.execute(
        "INSERT INTO medias (hash, kind, mime, timestamp, width, height,
                             dominant_colour, perceptual_hash, blurhash, processed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)
         ON CONFLICT(hash) DO NOTHING",
        params![
            media.hash.as_str(),
            media.kind.to_string(),
            media.mime,
            media.timestamp,
            media.width,
            media.height,
            media.dominant_colour,
            media.perceptual_hash,
            media.blurhash,
        ],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM medias WHERE hash = ?1",
        params![media.hash.as_str()],
        |row| row.get(0),
    )?;
    Ok((id, inserted > 0))
}

/// Returns `false` when the `(directory_alias, file_name)` location was already known.
pub fn create_dir_info_if_absent(conn: &Connection, info: &DirInfo) -> Result<bool, AppError> {
    let inserted = conn.execute(
        "INSERT INTO dir_infos (media_id, directory_alias, file_name)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(directory_alias, file_name) DO NOTHING",
        params![info.media_id, info.directory_alias, info.file_name],
    )?;
    Ok(inserted > 0)
}

pub fn create_blocks(conn: &Connection, blocks: &[Block]) -> Result<usize, AppError> {
    if blocks.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    insert_blocks(&tx, blocks)?;
    tx.commit()?;
    Ok(blocks.len())
}

fn insert_blocks(conn: &Connection, blocks: &[Block]) -> Result<(), AppError> {
    let mut insert_block = conn.prepare(
        "INSERT INTO blocks (media_id, idx, min_x, min_y, max_x, max_y, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut insert_fts = conn.prepare("INSERT INTO blocks_fts (body, media_id) VALUES (?1, ?2)")?;
    for block in blocks {
        insert_block.execute(params![
            block.media_id,
            block.index,
            block.min_x,
            block.min_y,
            block.max_x,
            block.max_y,
            block.body,
        ])?;
        insert_fts.execute(params![block.body, block.media_id])?;
    }
    Ok(())
}

/// Writes the enrichment output of one record and marks it processed. Either
/// all of it lands or none of it does.
pub fn complete_enrichment(
    conn: &Connection,
    media_id: i64,
    thumbnail: &Thumbnail,
    blocks: &[Block],
) -> Result<(), AppError> {
    let tx = conn.unchecked_transaction()?;
    create_thumbnail(&tx, thumbnail)?;
    insert_blocks(&tx, blocks)?;
    set_media_processed(&tx, media_id)?;
    tx.commit()?;
    Ok(())
}

pub fn get_blocks(conn: &Connection, media_id: i64) -> Result<Vec<Block>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT media_id, idx, min_x, min_y, max_x, max_y, body
         FROM blocks WHERE media_id = ?1 ORDER BY idx ASC",
    )?;

    let blocks = stmt
        .query_map(params![media_id], |row| {
            Ok(Block {
                media_id: row.get(0)?,
                index: row.get(1)?,
                min_x: row.get(2)?,
                min_y: row.get(3)?,
                max_x: row.get(4)?,
                max_y: row.get(5)?,
                body: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(blocks)
}

pub fn create_thumbnail(conn: &Connection, thumbnail: &Thumbnail) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO thumbnails (media_id, mime, width, height, timestamp, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            thumbnail.media_id,
            thumbnail.mime,
            thumbnail.width,
            thumbnail.height,
            thumbnail.timestamp,
            thumbnail.data,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_thumbnail_by_media_hash(
    conn: &Connection,
    hash: &MediaHash,
) -> Result<Option<Thumbnail>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT t.media_id, t.mime, t.width, t.height, t.timestamp, t.data
         FROM thumbnails t JOIN medias m ON m.id = t.media_id
         WHERE m.hash = ?1 LIMIT 1",
    )?;

    let thumbnail = stmt
        .query_row(params![hash.as_str()], |row| {
            Ok(Thumbnail {
                media_id: row.get(0)?,
                mime: row.get(1)?,
                width: row.get(2)?,
                height: row.get(3)?,
                timestamp: row.get(4)?,
                data: row.get(5)?,
            })
        })
        .optional()?;

    Ok(thumbnail)
}

pub fn set_media_processed(conn: &Connection, media_id: i64) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE medias SET processed = 1 WHERE id = ?1",
        params![media_id],
    )?;
    Ok(count)
}

pub fn get_directories_for_media(
    conn: &Connection,
    media_id: i64,
) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT directory_alias FROM dir_infos
         WHERE media_id = ?1 ORDER BY directory_alias ASC",
    )?;
    let aliases = stmt
        .query_map(params![media_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(aliases)
}

pub fn get_media_with_relations(
    conn: &Connection,
    hash: &MediaHash,
) -> Result<Option<MediaWithRelations>, AppError> {
    let Some(media) = get_media_by_hash(conn, hash)? else {
        return Ok(None);
    };
    let blocks = get_blocks(conn, media.id)?;
    let directories = get_directories_for_media(conn, media.id)?;
    Ok(Some(MediaWithRelations {
        media,
        blocks,
        directories,
    }))
}

pub fn count_directories(conn: &Connection) -> Result<Vec<DirectoryCount>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT directory_alias, COUNT(1) FROM dir_infos
         GROUP BY directory_alias ORDER BY directory_alias ASC",
    )?;
    let counts = stmt
        .query_map([], |row| {
            Ok(DirectoryCount {
                directory_alias: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

/// `fts_query` is an FTS5 match expression; when present only media with a
/// matching block are returned and `similarity` is the negated best rank.
pub fn search_medias(
    conn: &Connection,
    options: &SearchOptions,
    fts_query: Option<&str>,
) -> Result<Vec<SearchHit>, AppError> {
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    let mut sql = format!("SELECT {MEDIA_COLUMNS}, ");

    match fts_query {
        Some(query) => {
            sql.push_str(
                "s.score AS similarity FROM medias m
                 JOIN (SELECT CAST(media_id AS INTEGER) AS media_id, -MIN(rank) AS score
                       FROM blocks_fts WHERE blocks_fts MATCH ? GROUP BY media_id) s
                 ON s.media_id = m.id",
            );
            args.push(Box::new(query.to_string()));
        }
        None => sql.push_str("0.0 AS similarity FROM medias m"),
    }

    sql.push_str(" WHERE 1 = 1");
    if let Some(directory) = &options.directory {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM dir_infos d \
             WHERE d.media_id = m.id AND d.directory_alias = ?)",
        );
        args.push(Box::new(directory.clone()));
    }
    if let Some(kind) = options.kind {
        sql.push_str(" AND m.kind = ?");
        args.push(Box::new(kind.to_string()));
    }
    if let Some(from) = options.date_from {
        sql.push_str(" AND m.timestamp >= ?");
        args.push(Box::new(from));
    }
    if let Some(to) = options.date_to {
        sql.push_str(" AND m.timestamp <= ?");
        args.push(Box::new(to));
    }

    let order = options.sort_order.keyword();
    sql.push_str(&format!(
        " ORDER BY {} {order}, m.id {order} LIMIT ? OFFSET ?",
        options.sort_field.column()
    ));
    args.push(Box::new(options.limit));
    args.push(Box::new(options.offset));

    let mut stmt = conn.prepare(&sql)?;
    let hits = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok(SearchHit {
                media: media_from_row(row)?,
                similarity: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(hits)
}

// Needed for rusqlite optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
