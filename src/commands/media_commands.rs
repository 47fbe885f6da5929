use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::AppError;
use crate::models::media::{MediaHash, MediaWithRelations, Thumbnail};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryInfo {
    pub directory_alias: String,
    pub count: i64,
    pub is_uploads: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub id: MediaHash,
}

#[derive(Debug, Clone, Serialize)]
pub struct About {
    pub version: &'static str,
    pub directories: BTreeMap<String, String>,
    pub settings_subscribers: usize,
}

pub fn get_media(state: &AppState, hash: &str) -> Result<MediaWithRelations, AppError> {
    let hash = MediaHash::from(hash);
    state
        .store
        .get_media_with_relations(&hash)?
        .ok_or_else(|| AppError::NotFound(format!("media {hash}")))
}

pub fn get_thumbnail(state: &AppState, hash: &str) -> Result<Thumbnail, AppError> {
    let hash = MediaHash::from(hash);
    state
        .store
        .get_thumbnail_by_media_hash(&hash)?
        .ok_or_else(|| AppError::NotFound(format!("thumbnail for {hash}")))
}

/// Location on disk of one copy of the media.
pub fn raw_media_path(state: &AppState, hash: &str) -> Result<PathBuf, AppError> {
    let hash = MediaHash::from(hash);
    let info = state
        .store
        .get_dir_info_by_media_hash(&hash)?
        .ok_or_else(|| AppError::NotFound(format!("media {hash}")))?;
    let dir = state
        .settings
        .directories
        .get(&info.directory_alias)
        .ok_or_else(|| AppError::NotFound(format!("directory {:?}", info.directory_alias)))?;
    Ok(dir.join(info.file_name))
}

pub fn directories(state: &AppState) -> Result<Vec<DirectoryInfo>, AppError> {
    let counts = state.store.count_directories()?;
    Ok(counts
        .into_iter()
        .map(|count| DirectoryInfo {
            is_uploads: count.directory_alias == state.settings.uploads_alias,
            directory_alias: count.directory_alias,
            count: count.count,
        })
        .collect())
}

pub fn upload(state: &AppState, raw: &[u8]) -> Result<UploadResponse, AppError> {
    let upload = state.importer.upload(raw)?;
    Ok(UploadResponse { id: upload.hash })
}

pub fn about(state: &AppState) -> About {
    About {
        version: env!("CARGO_PKG_VERSION"),
        directories: state
            .settings
            .directories
            .iter()
            .map(|(alias, path)| (alias.to_string(), path.display().to_string()))
            .collect(),
        settings_subscribers: state.notifier.settings_subscribers(),
    }
}
