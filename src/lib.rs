pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod media_dirs;
pub mod models;
pub mod services;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commands::import_commands;
use crate::config::{AppConfig, Settings};
use crate::data::Store;
use crate::models::media::MediaHash;
use crate::services::import_service::ImporterBuilder;
use crate::services::media_service::FfmpegFrames;
use crate::services::notify_service::{Notifier, StaticToken};
use crate::services::ocr_service::LeptessOcr;
use crate::services::throttle_service::throttle;
use crate::state::AppState;

const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(500);
const PROGRESS_MAX_INTERVAL: Duration = Duration::from_secs(2);

pub fn run() -> anyhow::Result<()> {
    logging::init();

    let config_path = std::env::var_os("SNAPSHELF_CONFIG").map(PathBuf::from);
    let settings = AppConfig::load(config_path.as_deref())
        .context("loading config")?
        .validate()
        .context("validating config")?;
    let store = Store::open(&settings.db_path)
        .with_context(|| format!("opening database {}", settings.db_path.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(serve(settings, Arc::new(store)))
}

async fn serve(settings: Settings, store: Arc<Store>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel::<()>();
    let (media_tx, media_rx) = mpsc::unbounded_channel::<MediaHash>();

    let importer = ImporterBuilder::new(
        store.clone(),
        settings.directories.clone(),
        settings.uploads_alias.clone(),
    )
    .thumbnail_width(settings.thumbnail_width)
    .thumbnail_codec(settings.thumbnail_codec)
    .text_extractor(LeptessOcr::new(
        settings.tessdata_dir.clone(),
        settings.ocr_language.clone(),
    ))
    .frame_grabber(FfmpegFrames)
    .queue_capacity(settings.queue_capacity)
    .on_progress(move || {
        let _ = progress_tx.send(());
    })
    .on_media(move |hash| {
        let _ = media_tx.send(hash.clone());
    })
    .build();

    let notifier = Arc::new(Notifier::new(Arc::new(StaticToken::new(
        settings.api_key.as_str(),
    ))));

    let workers = importer.start_workers(settings.import_workers, cancel.clone());
    let watcher = {
        let importer = importer.clone();
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            if let Err(e) = importer.watch_updates(&cancel) {
                error!("error starting watcher: {e}");
            }
        })
    };

    let progress = throttle(
        progress_rx,
        PROGRESS_MIN_INTERVAL,
        PROGRESS_MAX_INTERVAL,
        cancel.clone(),
    );
    let settings_fanout = tokio::spawn(
        notifier
            .clone()
            .run_settings_fanout(progress, cancel.clone()),
    );
    let media_fanout = tokio::spawn(notifier.clone().run_media_fanout(media_rx, cancel.clone()));

    let state = AppState {
        store,
        importer,
        notifier,
        settings,
        cancel: cancel.clone(),
    };

    info!(
        directories = state.settings.directories.len(),
        workers = state.settings.import_workers,
        "snapshelf started"
    );
    if state.settings.scan_on_start {
        if let Err(e) = import_commands::start_import(&state) {
            warn!("initial import not started: {e}");
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    cancel.cancel();

    let _ = settings_fanout.await;
    let _ = media_fanout.await;
    tokio::task::spawn_blocking(move || {
        for worker in workers {
            let _ = worker.join();
        }
        let _ = watcher.join();
    })
    .await
    .context("joining import threads")?;

    Ok(())
}
