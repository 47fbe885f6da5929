use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content identifier: xxHash64 of the normalised media bytes as 16 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaHash(String);

impl MediaHash {
    pub fn from_u64(sum: u64) -> Self {
        Self(format!("{sum:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MediaHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MediaHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            _ => Err(format!("unknown media kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: i64,
    pub hash: MediaHash,
    pub kind: MediaKind,
    pub mime: String,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub dominant_colour: String,
    pub perceptual_hash: String,
    pub blurhash: String,
    pub processed: bool,
}

/// Insert payload for a record that has not been enriched yet.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub hash: MediaHash,
    pub kind: MediaKind,
    pub mime: String,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub dominant_colour: String,
    pub perceptual_hash: String,
    pub blurhash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    pub media_id: i64,
    pub directory_alias: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub media_id: i64,
    pub index: i64,
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thumbnail {
    pub media_id: i64,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaWithRelations {
    #[serde(flatten)]
    pub media: MediaRecord,
    pub blocks: Vec<Block>,
    pub directories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_fixed_width_lowercase_hex() {
        assert_eq!(MediaHash::from_u64(0xABC).as_str(), "0000000000000abc");
        assert_eq!(MediaHash::from_u64(u64::MAX).as_str(), "ffffffffffffffff");
    }

    #[test]
    fn media_kind_round_trips_through_strings() {
        for kind in [MediaKind::Image, MediaKind::Video] {
            assert_eq!(kind.to_string().parse::<MediaKind>().unwrap(), kind);
        }
        assert!("audio".parse::<MediaKind>().is_err());
    }
}
