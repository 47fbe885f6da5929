pub mod migrations;
pub mod repository;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;
use crate::models::media::{
    Block, DirInfo, MediaHash, MediaRecord, MediaWithRelations, NewMedia, Thumbnail,
};
use crate::models::search::{DirectoryCount, SearchHit, SearchOptions};

/// Shared handle to the media database. Every call takes the connection lock
/// for its whole duration, so create-if-absent writes never interleave.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_dir_info(
        &self,
        directory_alias: &str,
        file_name: &str,
    ) -> Result<Option<DirInfo>, AppError> {
        repository::get_dir_info(&self.lock(), directory_alias, file_name)
    }

    pub fn get_dir_info_by_media_hash(
        &self,
        hash: &MediaHash,
    ) -> Result<Option<DirInfo>, AppError> {
        repository::get_dir_info_by_media_hash(&self.lock(), hash)
    }

    pub fn get_media_by_hash(&self, hash: &MediaHash) -> Result<Option<MediaRecord>, AppError> {
        repository::get_media_by_hash(&self.lock(), hash)
    }

    pub fn create_media_if_absent(&self, media: &NewMedia) -> Result<(i64, bool), AppError> {
        repository::create_media_if_absent(&self.lock(), media)
    }

    pub fn create_dir_info_if_absent(&self, info: &DirInfo) -> Result<bool, AppError> {
        repository::create_dir_info_if_absent(&self.lock(), info)
    }

    pub fn create_blocks(&self, blocks: &[Block]) -> Result<usize, AppError> {
        repository::create_blocks(&self.lock(), blocks)
    }

    pub fn create_thumbnail(&self, thumbnail: &Thumbnail) -> Result<i64, AppError> {
        repository::create_thumbnail(&self.lock(), thumbnail)
    }

    pub fn set_media_processed(&self, media_id: i64) -> Result<usize, AppError> {
        repository::set_media_processed(&self.lock(), media_id)
    }

    pub fn complete_enrichment(
        &self,
        media_id: i64,
        thumbnail: &Thumbnail,
        blocks: &[Block],
    ) -> Result<(), AppError> {
        repository::complete_enrichment(&self.lock(), media_id, thumbnail, blocks)
    }

    pub fn count_directories(&self) -> Result<Vec<DirectoryCount>, AppError> {
        repository::count_directories(&self.lock())
    }

    pub fn search_medias(
        &self,
        options: &SearchOptions,
        fts_query: Option<&str>,
    ) -> Result<Vec<SearchHit>, AppError> {
        repository::search_medias(&self.lock(), options, fts_query)
    }

    pub fn get_media_with_relations(
        &self,
        hash: &MediaHash,
    ) -> Result<Option<MediaWithRelations>, AppError> {
        repository::get_media_with_relations(&self.lock(), hash)
    }

    pub fn get_thumbnail_by_media_hash(
        &self,
        hash: &MediaHash,
    ) -> Result<Option<Thumbnail>, AppError> {
        repository::get_thumbnail_by_media_hash(&self.lock(), hash)
    }
}
