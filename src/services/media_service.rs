use std::hash::Hasher;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::OnceLock;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::scaling::context::Context as ScalingContext;
use ffmpeg_next::util::frame::video::Video as VideoFrame;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use tracing::debug;
use twox_hash::XxHash64;

use crate::error::AppError;
use crate::models::media::{MediaHash, MediaKind};
use crate::services::imagery_service;

/// Output codec for thumbnails and OCR input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCodec {
    Png,
    Jpeg,
}

impl ImageCodec {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(Self::Png),
            "image/jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Produces a still frame for a video so it can be enriched like an image.
pub trait FrameGrabber: Send + Sync {
    fn first_frame(&self, raw: &[u8]) -> Result<DynamicImage, AppError>;
}

/// Decodes the first video frame with libavcodec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegFrames;

fn ensure_ffmpeg_initialized() -> Result<(), AppError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| AppError::Video(format!("init: {e}")))
}

impl FrameGrabber for FfmpegFrames {
    fn first_frame(&self, raw: &[u8]) -> Result<DynamicImage, AppError> {
        ensure_ffmpeg_initialized()?;

        // libavformat opens inputs by path
        let mut file = tempfile::Builder::new().prefix("snapshelf-").tempfile()?;
        file.write_all(raw)?;
        file.flush()?;
        decode_first_frame(file.path())
    }
}

fn video_error(step: &'static str) -> impl Fn(ffmpeg::Error) -> AppError {
    move |e| AppError::Video(format!("{step}: {e}"))
}

fn decode_first_frame(path: &Path) -> Result<DynamicImage, AppError> {
    let mut input_ctx = ffmpeg::format::input(path).map_err(video_error("open input"))?;

    let (stream_index, codec_params) = {
        let stream = input_ctx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| AppError::Video("no video stream found".to_string()))?;
        (stream.index(), stream.parameters())
    };

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(codec_params)
        .map_err(video_error("codec context"))?
        .decoder()
        .video()
        .map_err(video_error("video decoder"))?;

    let mut scaler = ScalingContext::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::flag::Flags::BILINEAR,
    )
    .map_err(video_error("scaler"))?;

    let mut decoded = VideoFrame::empty();
    for (stream, packet) in input_ctx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if let Err(e) = decoder.send_packet(&packet) {
            debug!("skipping video packet: {e}");
            continue;
        }
        if decoder.receive_frame(&mut decoded).is_ok() {
            return frame_to_image(&mut scaler, &decoded);
        }
    }

    // Short clips may only yield a frame once the decoder is drained
    decoder.send_eof().map_err(video_error("flush decoder"))?;
    if decoder.receive_frame(&mut decoded).is_ok() {
        return frame_to_image(&mut scaler, &decoded);
    }

    Err(AppError::Video("no frame could be decoded".to_string()))
}

fn frame_to_image(
    scaler: &mut ScalingContext,
    frame: &VideoFrame,
) -> Result<DynamicImage, AppError> {
    let mut rgb = VideoFrame::empty();
    scaler.run(frame, &mut rgb).map_err(video_error("scale frame"))?;

    let width = rgb.width();
    let height = rgb.height();
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_len = width as usize * 3;

    let pixels = if stride == row_len {
        data[..row_len * height as usize].to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            pixels.extend_from_slice(&data[start..start + row_len]);
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| AppError::Video(format!("frame buffer does not fit {width}x{height}")))
}

#[derive(Debug)]
pub struct ImageMedia {
    mime: &'static str,
    hash: MediaHash,
    image: DynamicImage,
}

#[derive(Debug)]
pub struct VideoMedia {
    mime: &'static str,
    hash: MediaHash,
    frame: DynamicImage,
}

/// Decoded media. Images carry their pixels, videos a representative frame.
#[derive(Debug)]
pub enum Media {
    Image(ImageMedia),
    Video(VideoMedia),
}

impl Media {
    pub fn kind(&self) -> MediaKind {
        match self {
            Media::Image(_) => MediaKind::Image,
            Media::Video(_) => MediaKind::Video,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Media::Image(m) => m.mime,
            Media::Video(m) => m.mime,
        }
    }

    pub fn hash(&self) -> &MediaHash {
        match self {
            Media::Image(m) => &m.hash,
            Media::Video(m) => &m.hash,
        }
    }

    /// File extension used when persisting an upload, e.g. `png` for `image/png`.
    pub fn extension(&self) -> &'static str {
        let mime = self.mime();
        mime.split_once('/').map(|(_, ext)| ext).unwrap_or(mime)
    }

    pub fn image(&self) -> &DynamicImage {
        match self {
            Media::Image(m) => &m.image,
            Media::Video(m) => &m.frame,
        }
    }

    pub fn thumbnail(&self, width: u32) -> DynamicImage {
        imagery_service::resize_to_width(self.image(), width)
    }
}

pub fn hash_bytes(bytes: &[u8]) -> MediaHash {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    MediaHash::from_u64(hasher.finish())
}

/// Hash over the decoded pixels so re-encodes of the same image share an identity.
fn hash_image(img: &DynamicImage) -> MediaHash {
    let (width, height) = img.dimensions();
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&width.to_le_bytes());
    hasher.write(&height.to_le_bytes());
    hasher.write(img.to_rgba8().as_raw());
    MediaHash::from_u64(hasher.finish())
}

fn image_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

fn sniff_video(raw: &[u8]) -> Option<&'static str> {
    if raw.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if raw.len() >= 8 && &raw[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    if raw.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || raw.starts_with(&[0x00, 0x00, 0x01, 0xB3]) {
        return Some("video/mpeg");
    }
    None
}

/// Classifies `raw` by content, decodes it and computes its hash.
pub fn decode(raw: &[u8], frames: &dyn FrameGrabber) -> Result<Media, AppError> {
    if let Ok(format) = image::guess_format(raw) {
        if let Some(mime) = image_mime(format) {
            let image = image::load_from_memory_with_format(raw, format)?;
            let hash = hash_image(&image);
            return Ok(Media::Image(ImageMedia { mime, hash, image }));
        }
    }

    if let Some(mime) = sniff_video(raw) {
        let frame = frames.first_frame(raw)?;
        return Ok(Media::Video(VideoMedia {
            mime,
            hash: hash_bytes(raw),
            frame,
        }));
    }

    Err(AppError::UnsupportedMedia(
        "content is not a supported image or video".to_string(),
    ))
}

pub fn encode(img: &DynamicImage, codec: ImageCodec) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    match codec {
        ImageCodec::Jpeg => {
            DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut buf, codec.format())?
        }
        ImageCodec::Png => img.write_to(&mut buf, codec.format())?,
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    pub(crate) struct StillFrames;

    impl FrameGrabber for StillFrames {
        fn first_frame(&self, _raw: &[u8]) -> Result<DynamicImage, AppError> {
            let frame = RgbImage::from_pixel(32, 18, Rgb([10, 20, 30]));
            Ok(DynamicImage::ImageRgb8(frame))
        }
    }

    pub(crate) fn png_bytes(seed: u8) -> Vec<u8> {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([seed, x as u8 * 6, y as u8 * 8]));
        encode(&DynamicImage::ImageRgb8(img), ImageCodec::Png).unwrap()
    }

    #[test]
    fn test_hash_bytes_format() {
        let hash = hash_bytes(b"");
        assert_eq!(hash.as_str(), "ef46db3751d8e999");
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }

    #[test]
    fn test_decode_png() {
        let media = decode(&png_bytes(1), &StillFrames).unwrap();
        assert_eq!(media.kind(), MediaKind::Image);
        assert_eq!(media.mime(), "image/png");
        assert_eq!(media.extension(), "png");
        assert_eq!(media.image().dimensions(), (40, 30));
        assert_eq!(media.hash().as_str().len(), 16);
        assert!(format!("{media:?}").starts_with("Image(ImageMedia"));
    }

    #[test]
    fn test_same_pixels_share_hash_across_encodings() {
        let png = decode(&png_bytes(7), &StillFrames).unwrap();
        let reencoded = encode(png.image(), ImageCodec::Png).unwrap();
        let again = decode(&reencoded, &StillFrames).unwrap();
        assert_eq!(png.hash(), again.hash());

        let other = decode(&png_bytes(8), &StillFrames).unwrap();
        assert_ne!(png.hash(), other.hash());
    }

    #[test]
    fn test_decode_video_uses_frame_grabber() {
        let mut raw = vec![0x00, 0x00, 0x00, 0x18];
        raw.extend_from_slice(b"ftypmp42");
        raw.extend_from_slice(&[0u8; 32]);

        let media = decode(&raw, &StillFrames).unwrap();
        assert_eq!(media.kind(), MediaKind::Video);
        assert_eq!(media.mime(), "video/mp4");
        assert_eq!(media.extension(), "mp4");
        assert_eq!(media.hash(), &hash_bytes(&raw));
        assert_eq!(media.thumbnail(16).dimensions(), (16, 9));
    }

    #[test]
    fn test_decode_rejects_unknown_content() {
        let err = decode(b"plain text, not media", &StillFrames).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedMedia(_)));
    }

    #[test]
    fn test_ffmpeg_rejects_corrupt_video() {
        let mut raw = vec![0x00, 0x00, 0x00, 0x18];
        raw.extend_from_slice(b"ftypmp42");
        raw.extend_from_slice(&[0xAB; 64]);

        let err = decode(&raw, &FfmpegFrames).unwrap_err();
        assert!(matches!(err, AppError::Video(_)));
    }

    #[test]
    fn test_codec_from_mime() {
        assert_eq!(ImageCodec::from_mime("image/png"), Some(ImageCodec::Png));
        assert_eq!(ImageCodec::from_mime("image/jpeg"), Some(ImageCodec::Jpeg));
        assert_eq!(ImageCodec::from_mime("image/gif"), None);
    }
}
