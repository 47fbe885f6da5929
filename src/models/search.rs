use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::media::{MediaKind, MediaRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Timestamp,
    Similarity,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            Self::Timestamp => "m.timestamp",
            Self::Similarity => "similarity",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(Self::Timestamp),
            "similarity" => Ok(Self::Similarity),
            _ => Err(format!("invalid sort field {s:?} provided")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("invalid sort order {s:?} provided")),
        }
    }
}

/// Validated search request handed to the repository.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub body: Option<String>,
    pub directory: Option<String>,
    pub kind: Option<MediaKind>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            body: None,
            directory: None,
            kind: None,
            date_from: None,
            date_to: None,
            limit: 40,
            offset: 0,
            sort_field: SortField::Timestamp,
            sort_order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub media: MediaRecord,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCount {
    pub directory_alias: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SortRequest {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub order: String,
}

/// Search payload as received from clients. Empty strings mean "not set".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub media: String,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub sort: SortRequest,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}
