use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Video error: {0}")]
    Video(String),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("already running")]
    AlreadyRunning,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorised")]
    Unauthorized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    General(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
