use leptess::{capi, LepTess};

use crate::error::AppError;
use crate::models::media::Block;
use crate::services::imagery_service::Rect;

const DEFAULT_LANGUAGE: &str = "eng";

/// One recognised text region in the coordinate space of the image that was
/// handed to the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub rect: Rect,
    pub text: String,
}

pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, encoded: &[u8]) -> Result<Vec<RawBlock>, AppError>;
}

/// Tesseract through leptess. Each text line becomes one block.
#[derive(Debug, Clone)]
pub struct LeptessOcr {
    data_path: Option<String>,
    language: String,
}

impl LeptessOcr {
    pub fn new(data_path: Option<String>, language: impl Into<String>) -> Self {
        Self {
            data_path,
            language: language.into(),
        }
    }
}

impl Default for LeptessOcr {
    fn default() -> Self {
        Self::new(None, DEFAULT_LANGUAGE)
    }
}

impl TextExtractor for LeptessOcr {
    fn extract_text(&self, encoded: &[u8]) -> Result<Vec<RawBlock>, AppError> {
        let mut lt = LepTess::new(self.data_path.as_deref(), &self.language)
            .map_err(|e| AppError::Ocr(format!("init failed: {e}")))?;
        lt.set_image_from_mem(encoded)
            .map_err(|e| AppError::Ocr(format!("set_image failed: {e}")))?;

        let Some(boxes) = lt.get_component_boxes(capi::TessPageIteratorLevel_RIL_TEXTLINE, true)
        else {
            return Ok(Vec::new());
        };

        let mut blocks = Vec::new();
        for b in &boxes {
            let geometry = b.get_geometry();
            lt.set_rectangle_from_box(&b);
            let text = lt
                .get_utf8_text()
                .map_err(|e| AppError::Ocr(format!("get_utf8_text failed: {e}")))?;
            let (x, y) = (i64::from(geometry.x), i64::from(geometry.y));
            blocks.push(RawBlock {
                rect: Rect::new(x, y, x + i64::from(geometry.w), y + i64::from(geometry.h)),
                text: text.trim().to_string(),
            });
        }

        Ok(blocks)
    }
}

/// Converts extractor output for an image scaled up by `factor` into stored
/// blocks. Each block keeps its extractor position as index; whitespace-only
/// text is dropped.
pub fn to_blocks(media_id: i64, raw: Vec<RawBlock>, factor: u32) -> Vec<Block> {
    raw.into_iter()
        .enumerate()
        .filter(|(_, block)| !block.text.trim().is_empty())
        .map(|(index, block)| {
            let rect = block.rect.scale_down(factor);
            Block {
                media_id,
                index: index as i64,
                min_x: rect.min_x,
                min_y: rect.min_y,
                max_x: rect.max_x,
                max_y: rect.max_y,
                body: block.text,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::imagery_service::SCALE_FACTOR;

    #[test]
    fn test_to_blocks_scales_and_drops_blank_text() {
        let raw = vec![
            RawBlock {
                rect: Rect::new(30, 60, 331, 92),
                text: "Hello".to_string(),
            },
            RawBlock {
                rect: Rect::new(0, 0, 9, 9),
                text: "  \n\t".to_string(),
            },
            RawBlock {
                rect: Rect::new(3, 6, 9, 12),
                text: "world".to_string(),
            },
        ];

        let blocks = to_blocks(7, raw, SCALE_FACTOR);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 0);
        let first = &blocks[0];
        assert_eq!(
            (first.min_x, first.min_y, first.max_x, first.max_y),
            (10, 20, 110, 30)
        );
        assert_eq!(blocks[1].index, 2);
        assert_eq!(blocks[1].body, "world");
        assert_eq!((blocks[1].min_x, blocks[1].max_y), (1, 4));
        assert!(blocks.iter().all(|b| b.media_id == 7));
    }

    #[test]
    fn test_missing_language_data_is_ocr_error() {
        let ocr = LeptessOcr::new(Some("/nonexistent/tessdata".to_string()), "eng");
        let err = ocr.extract_text(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, AppError::Ocr(_)));
    }

    #[test]
    fn test_default_language_is_english() {
        let ocr = LeptessOcr::default();
        assert_eq!(ocr.language, "eng");
        assert!(ocr.data_path.is_none());
    }
}
