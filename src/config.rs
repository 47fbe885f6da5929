use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;

use crate::error::AppError;
use crate::media_dirs::Directories;
use crate::services::media_service::ImageCodec;

const ENV_PREFIX: &str = "SNAPSHELF";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub directories: BTreeMap<String, PathBuf>,
    pub uploads_alias: String,
    pub thumbnail_width: u32,
    pub thumbnail_mime: String,
    pub import_workers: usize,
    pub queue_capacity: usize,
    pub scan_on_start: bool,
    pub api_key: Option<String>,
    pub ocr_language: String,
    pub tessdata_dir: Option<String>,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub directories: Directories,
    pub uploads_alias: String,
    pub thumbnail_width: u32,
    pub thumbnail_codec: ImageCodec,
    pub import_workers: usize,
    pub queue_capacity: usize,
    pub scan_on_start: bool,
    pub api_key: String,
    pub ocr_language: String,
    pub tessdata_dir: Option<String>,
}

impl AppConfig {
    /// Reads the optional TOML file, then `SNAPSHELF_*` environment variables.
    /// Nested keys use `__`, e.g. `SNAPSHELF_DIRECTORIES__PHONE=/srv/phone`.
    pub fn load(file: Option<&Path>) -> Result<AppConfig, AppError> {
        Self::load_with_env(file, None)
    }

    fn load_with_env(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<AppConfig, AppError> {
        let mut builder = Config::builder()
            .set_default("uploads_alias", "uploads")?
            .set_default("thumbnail_width", 315)?
            .set_default("thumbnail_mime", "image/png")?
            .set_default("import_workers", 1)?
            .set_default("queue_capacity", 64)?
            .set_default("scan_on_start", true)?
            .set_default("ocr_language", "eng")?;

        builder = match file {
            Some(path) => builder.add_source(ConfigFile::from(path).required(true)),
            None => builder.add_source(ConfigFile::with_name("snapshelf").required(false)),
        };

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(settings.try_deserialize::<AppConfig>()?)
    }

    pub fn validate(self) -> Result<Settings, AppError> {
        let directories: BTreeMap<String, PathBuf> = self
            .directories
            .into_iter()
            .map(|(alias, path)| (alias.to_lowercase(), path))
            .collect();
        let uploads_alias = self.uploads_alias.to_lowercase();

        if !directories.contains_key(&uploads_alias) {
            return Err(AppError::InvalidInput(format!(
                "uploads alias {uploads_alias:?} is not a configured directory"
            )));
        }
        for (alias, path) in &directories {
            if !path.is_dir() {
                return Err(AppError::InvalidInput(format!(
                    "directory {alias:?} at {} is not a directory",
                    path.display()
                )));
            }
        }
        if self.import_workers == 0 {
            return Err(AppError::InvalidInput(
                "import_workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::InvalidInput(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.thumbnail_width == 0 {
            return Err(AppError::InvalidInput(
                "thumbnail_width must be at least 1".to_string(),
            ));
        }
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AppError::InvalidInput("api_key must be set to a non-empty value".to_string())
            })?;
        let thumbnail_codec = ImageCodec::from_mime(&self.thumbnail_mime).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "unsupported thumbnail mime {:?}",
                self.thumbnail_mime
            ))
        })?;

        Ok(Settings {
            db_path: self.db_path.unwrap_or_else(default_db_path),
            directories: Directories::new(directories),
            uploads_alias,
            thumbnail_width: self.thumbnail_width,
            thumbnail_codec,
            import_workers: self.import_workers,
            queue_capacity: self.queue_capacity,
            scan_on_start: self.scan_on_start,
            api_key,
            ocr_language: self.ocr_language,
            tessdata_dir: self.tessdata_dir,
        })
    }
}

fn default_db_path() -> PathBuf {
    ::directories::ProjectDirs::from("dev", "snapshelf", "snapshelf")
        .map(|dirs| dirs.data_dir().join("snapshelf.db"))
        .unwrap_or_else(|| PathBuf::from("snapshelf.db"))
}
