use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, SecondsFormat, Utc};
use image::GenericImageView;
use tracing::{error, info};

use crate::data::Store;
use crate::error::AppError;
use crate::media_dirs::Directories;
use crate::models::media::{Block, DirInfo, MediaHash, NewMedia, Thumbnail};
use crate::services::imagery_service::{self, SCALE_FACTOR};
use crate::services::media_service::{self, FfmpegFrames, FrameGrabber, ImageCodec, Media};
use crate::services::ocr_service::{self, LeptessOcr, TextExtractor};
use crate::services::scan_service::ScanJob;
use crate::services::timestamp_service::guess_file_created;
use crate::state::{ProgressListener, StatusTracker};

pub type MediaListener = Box<dyn Fn(&MediaHash) + Send + Sync>;

const DEFAULT_THUMBNAIL_WIDTH: u32 = 315;
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Turns media files into stored, searchable records. Owns the import
/// status and the job queue consumed by the worker pool.
pub struct Importer {
    pub(crate) store: Arc<Store>,
    pub(crate) directories: Directories,
    pub(crate) uploads_alias: String,
    thumbnail_width: u32,
    thumbnail_codec: ImageCodec,
    extractor: Arc<dyn TextExtractor>,
    frames: Arc<dyn FrameGrabber>,
    media_listeners: Vec<MediaListener>,
    pub(crate) status: StatusTracker,
    pub(crate) queue_tx: SyncSender<ScanJob>,
    pub(crate) queue_rx: Arc<Mutex<Receiver<ScanJob>>>,
}

pub struct ImporterBuilder {
    store: Arc<Store>,
    directories: Directories,
    uploads_alias: String,
    thumbnail_width: u32,
    thumbnail_codec: ImageCodec,
    extractor: Arc<dyn TextExtractor>,
    frames: Arc<dyn FrameGrabber>,
    queue_capacity: usize,
    media_listeners: Vec<MediaListener>,
    progress_listeners: Vec<ProgressListener>,
}

impl ImporterBuilder {
    pub fn new(
        store: Arc<Store>,
        directories: Directories,
        uploads_alias: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directories,
            uploads_alias: uploads_alias.into(),
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            thumbnail_codec: ImageCodec::Png,
            extractor: Arc::new(LeptessOcr::default()),
            frames: Arc::new(FfmpegFrames),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            media_listeners: Vec::new(),
            progress_listeners: Vec::new(),
        }
    }

    pub fn thumbnail_width(mut self, width: u32) -> Self {
        self.thumbnail_width = width;
        self
    }

    pub fn thumbnail_codec(mut self, codec: ImageCodec) -> Self {
        self.thumbnail_codec = codec;
        self
    }

    pub fn text_extractor(mut self, extractor: impl TextExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn frame_grabber(mut self, frames: impl FrameGrabber + 'static) -> Self {
        self.frames = Arc::new(frames);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Called with the hash whenever a media record or one of its locations changes.
    pub fn on_media(mut self, listener: impl Fn(&MediaHash) + Send + Sync + 'static) -> Self {
        self.media_listeners.push(Box::new(listener));
        self
    }

    /// Called when import progress changes, at most once per second.
    pub fn on_progress(mut self, listener: impl Fn() + Send + Sync + 'static) -> Self {
        self.progress_listeners.push(Box::new(listener));
        self
    }

    pub fn build(self) -> Arc<Importer> {
        let (queue_tx, queue_rx) = mpsc::sync_channel(self.queue_capacity);
        Arc::new(Importer {
            store: self.store,
            directories: self.directories,
            uploads_alias: self.uploads_alias,
            thumbnail_width: self.thumbnail_width,
            thumbnail_codec: self.thumbnail_codec,
            extractor: self.extractor,
            frames: self.frames,
            media_listeners: self.media_listeners,
            status: StatusTracker::new(self.progress_listeners),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
        })
    }
}

/// Result of accepting an upload. The import itself continues on `task`.
pub struct Upload {
    pub hash: MediaHash,
    pub file_name: String,
    pub task: JoinHandle<()>,
}

impl Importer {
    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    fn notify_media(&self, hash: &MediaHash) {
        for listener in &self.media_listeners {
            listener(hash);
        }
    }

    /// Imports one file found in a configured directory. Returns `Ok(None)`
    /// when this location was imported before.
    pub fn import_media_from_file(
        &self,
        dir_alias: &str,
        dir: &Path,
        file_name: &str,
        mod_time: DateTime<Utc>,
    ) -> Result<Option<MediaHash>, AppError> {
        if self.store.get_dir_info(dir_alias, file_name)?.is_some() {
            return Ok(None);
        }

        info!(alias = dir_alias, file_name, "importing new item");

        let raw = std::fs::read(dir.join(file_name))?;
        let media = media_service::decode(&raw, self.frames.as_ref())?;
        let timestamp = guess_file_created(file_name, mod_time);

        self.import_media(&media, dir_alias, file_name, timestamp)?;
        Ok(Some(media.hash().clone()))
    }

    /// Records `media` at `dir_alias/file_name`. Content seen for the first
    /// time is enriched with a thumbnail and text blocks, then marked processed.
    pub fn import_media(
        &self,
        media: &Media,
        dir_alias: &str,
        file_name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let hash = media.hash();

        let (media_id, created) = match self.store.get_media_by_hash(hash)? {
            Some(existing) => (existing.id, false),
            None => {
                let image = media.image();
                let (width, height) = image.dimensions();
                self.store.create_media_if_absent(&NewMedia {
                    hash: hash.clone(),
                    kind: media.kind(),
                    mime: media.mime().to_string(),
                    timestamp,
                    width,
                    height,
                    dominant_colour: imagery_service::dominant_colour(image),
                    perceptual_hash: imagery_service::perceptual_hash(image),
                    blurhash: imagery_service::blurhash(image)?,
                })?
            }
        };

        self.store.create_dir_info_if_absent(&DirInfo {
            media_id,
            directory_alias: dir_alias.to_string(),
            file_name: file_name.to_string(),
        })?;
        self.notify_media(hash);

        if !created {
            return Ok(());
        }

        let thumbnail = self.make_thumbnail(media_id, media)?;
        let blocks = self.extract_blocks(media_id, media)?;
        self.store.complete_enrichment(media_id, &thumbnail, &blocks)?;
        self.notify_media(hash);
        Ok(())
    }

    fn make_thumbnail(&self, media_id: i64, media: &Media) -> Result<Thumbnail, AppError> {
        let thumbnail = media.thumbnail(self.thumbnail_width);
        let (width, height) = thumbnail.dimensions();
        let data = media_service::encode(&thumbnail, self.thumbnail_codec)?;
        Ok(Thumbnail {
            media_id,
            mime: self.thumbnail_codec.mime().to_string(),
            width,
            height,
            timestamp: Utc::now(),
            data,
        })
    }

    fn extract_blocks(&self, media_id: i64, media: &Media) -> Result<Vec<Block>, AppError> {
        let prepared = imagery_service::scale_factor(
            &imagery_service::greyscale(media.image()),
            SCALE_FACTOR,
        );
        let encoded = media_service::encode(&prepared, ImageCodec::Png)?;
        let raw = self.extractor.extract_text(&encoded)?;
        Ok(ocr_service::to_blocks(media_id, raw, SCALE_FACTOR))
    }

    /// Stores uploaded bytes in the uploads directory and imports them in the
    /// background. Decoding happens up front so bad uploads fail immediately.
    pub fn upload(self: &Arc<Self>, raw: &[u8]) -> Result<Upload, AppError> {
        let media = media_service::decode(raw, self.frames.as_ref())?;
        let dir = self.directories.get(&self.uploads_alias).ok_or_else(|| {
            AppError::NotFound(format!("uploads directory {:?}", self.uploads_alias))
        })?;

        let timestamp = Utc::now();
        let file_name = format!(
            "{}.{}",
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            media.extension()
        );

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(dir.join(&file_name))?;
        file.write_all(raw)?;
        file.sync_all()?;

        let hash = media.hash().clone();
        let importer = Arc::clone(self);
        let alias = self.uploads_alias.clone();
        let task_name = file_name.clone();
        let task = std::thread::spawn(move || {
            if let Err(e) = importer.import_media(&media, &alias, &task_name, timestamp) {
                error!(file_name = %task_name, "importing upload: {e}");
            }
        });

        Ok(Upload {
            hash,
            file_name,
            task,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::imagery_service::Rect;
    use crate::services::media_service::tests::{png_bytes, StillFrames};
    use crate::services::ocr_service::RawBlock;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns one fixed block per call and counts how often it ran.
    pub(crate) struct CountingExtractor {
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl TextExtractor for CountingExtractor {
        fn extract_text(&self, _encoded: &[u8]) -> Result<Vec<RawBlock>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                RawBlock {
                    rect: Rect::new(30, 60, 91, 95),
                    text: "invoice total".to_string(),
                },
                RawBlock {
                    rect: Rect::new(0, 0, 3, 3),
                    text: "   ".to_string(),
                },
            ])
        }
    }

    struct FailingExtractor;

    impl TextExtractor for FailingExtractor {
        fn extract_text(&self, _encoded: &[u8]) -> Result<Vec<RawBlock>, AppError> {
            Err(AppError::Ocr("engine unavailable".to_string()))
        }
    }

    pub(crate) struct Fixture {
        pub(crate) _tmp: tempfile::TempDir,
        pub(crate) root: PathBuf,
        pub(crate) store: Arc<Store>,
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) media_events: Arc<Mutex<Vec<MediaHash>>>,
    }

    impl Fixture {
        pub(crate) fn dir(&self, alias: &str) -> PathBuf {
            self.root.join(alias)
        }

        pub(crate) fn directories(&self) -> Directories {
            Directories::new(
                ["phone", "laptop", "uploads"]
                    .into_iter()
                    .map(|alias| (alias.to_string(), self.dir(alias)))
                    .collect::<BTreeMap<_, _>>(),
            )
        }

        pub(crate) fn builder(&self) -> ImporterBuilder {
            let events = self.media_events.clone();
            ImporterBuilder::new(self.store.clone(), self.directories(), "uploads")
                .thumbnail_width(20)
                .frame_grabber(StillFrames)
                .text_extractor(CountingExtractor {
                    calls: self.calls.clone(),
                })
                .on_media(move |hash| {
                    events
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .push(hash.clone());
                })
        }
    }

    pub(crate) fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        for alias in ["phone", "laptop", "uploads"] {
            std::fs::create_dir_all(root.join(alias)).unwrap();
        }
        Fixture {
            _tmp: tmp,
            root,
            store: Arc::new(Store::open_in_memory().unwrap()),
            calls: Arc::new(AtomicUsize::new(0)),
            media_events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn count(store: &Store, table: &str) -> i64 {
        store
            .lock()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_import_enriches_new_media() {
        let fx = fixture();
        let importer = fx.builder().build();
        let name = "IMG_20190405_134142.png";
        std::fs::write(fx.dir("phone").join(name), png_bytes(1)).unwrap();

        let hash = importer
            .import_media_from_file("phone", &fx.dir("phone"), name, Utc::now())
            .unwrap()
            .unwrap();

        let full = fx.store.get_media_with_relations(&hash).unwrap().unwrap();
        assert!(full.media.processed);
        assert_eq!(full.media.width, 40);
        assert_eq!(full.media.height, 30);
        assert_eq!(full.media.timestamp.to_rfc3339(), "2019-04-05T13:41:42+00:00");
        assert_eq!(full.directories, vec!["phone".to_string()]);
        assert_eq!(full.blocks.len(), 1);
        assert_eq!(full.blocks[0].index, 0);
        let block = &full.blocks[0];
        assert_eq!(
            (block.min_x, block.min_y, block.max_x, block.max_y),
            (10, 20, 30, 31)
        );
        assert_eq!(full.media.blurhash.len(), 28);

        let thumb = fx.store.get_thumbnail_by_media_hash(&hash).unwrap().unwrap();
        assert_eq!((thumb.width, thumb.height), (20, 15));
        assert_eq!(thumb.mime, "image/png");

        // seen, then processed
        assert_eq!(fx.media_events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_dedup_by_path() {
        let fx = fixture();
        let importer = fx.builder().build();
        std::fs::write(fx.dir("phone").join("a.png"), png_bytes(1)).unwrap();

        let first = importer
            .import_media_from_file("phone", &fx.dir("phone"), "a.png", Utc::now())
            .unwrap();
        assert!(first.is_some());

        let second = importer
            .import_media_from_file("phone", &fx.dir("phone"), "a.png", Utc::now())
            .unwrap();
        assert!(second.is_none());

        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&fx.store, "dir_infos"), 1);
    }

    #[test]
    fn test_dedup_by_content() {
        let fx = fixture();
        let importer = fx.builder().build();
        std::fs::write(fx.dir("phone").join("a.png"), png_bytes(3)).unwrap();
        std::fs::write(fx.dir("laptop").join("copy.png"), png_bytes(3)).unwrap();

        let a = importer
            .import_media_from_file("phone", &fx.dir("phone"), "a.png", Utc::now())
            .unwrap()
            .unwrap();
        let b = importer
            .import_media_from_file("laptop", &fx.dir("laptop"), "copy.png", Utc::now())
            .unwrap()
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&fx.store, "medias"), 1);
        assert_eq!(count(&fx.store, "dir_infos"), 2);
        assert_eq!(count(&fx.store, "thumbnails"), 1);
        // two for the new media, one for the extra location
        assert_eq!(fx.media_events.lock().unwrap().len(), 3);

        let full = fx.store.get_media_with_relations(&a).unwrap().unwrap();
        assert_eq!(full.directories, vec!["laptop".to_string(), "phone".to_string()]);
    }

    #[test]
    fn test_failed_enrichment_is_not_retried() {
        let fx = fixture();
        let importer = ImporterBuilder::new(fx.store.clone(), fx.directories(), "uploads")
            .frame_grabber(StillFrames)
            .text_extractor(FailingExtractor)
            .build();
        std::fs::write(fx.dir("phone").join("a.png"), png_bytes(4)).unwrap();

        let err = importer
            .import_media_from_file("phone", &fx.dir("phone"), "a.png", Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::Ocr(_)));

        let hash = media_service::decode(&png_bytes(4), &StillFrames).unwrap().hash().clone();
        let record = fx.store.get_media_by_hash(&hash).unwrap().unwrap();
        assert!(!record.processed);
        assert_eq!(count(&fx.store, "blocks"), 0);
        assert_eq!(count(&fx.store, "thumbnails"), 0);

        let again = importer
            .import_media_from_file("phone", &fx.dir("phone"), "a.png", Utc::now())
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_unsupported_file_is_rejected() {
        let fx = fixture();
        let importer = fx.builder().build();
        std::fs::write(fx.dir("phone").join("notes.txt"), "hello").unwrap();

        let err = importer
            .import_media_from_file("phone", &fx.dir("phone"), "notes.txt", Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedMedia(_)));
        assert_eq!(count(&fx.store, "dir_infos"), 0);
    }

    #[test]
    fn test_upload_writes_file_and_imports() {
        let fx = fixture();
        let importer = fx.builder().build();

        let upload = importer.upload(&png_bytes(9)).unwrap();
        assert!(upload.file_name.ends_with("Z.png"));
        upload.task.join().unwrap();

        let stored = fx.dir("uploads").join(&upload.file_name);
        assert_eq!(std::fs::read(&stored).unwrap(), png_bytes(9));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&stored).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let info = fx.store.get_dir_info("uploads", &upload.file_name).unwrap().unwrap();
        let full = fx.store.get_media_with_relations(&upload.hash).unwrap().unwrap();
        assert_eq!(info.media_id, full.media.id);
        assert!(full.media.processed);
    }

    #[test]
    fn test_upload_rejects_undecodable_bytes() {
        let fx = fixture();
        let importer = fx.builder().build();

        assert!(importer.upload(b"definitely not media").is_err());
        assert_eq!(std::fs::read_dir(fx.dir("uploads")).unwrap().count(), 0);
    }
}
