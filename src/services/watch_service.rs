use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::services::import_service::Importer;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const TEMP_EXTENSION: &str = "tmp";

/// Paths in `event` that may be newly published media files.
fn published_paths(event: &Event) -> &[std::path::PathBuf] {
    match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => &event.paths,
        // paths are [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.split_last() {
            Some((_, [])) | None => &event.paths,
            Some((last, _)) => std::slice::from_ref(last),
        },
        _ => &[],
    }
}

impl Importer {
    /// Imports files as they appear in the configured directories, except the
    /// uploads directory, until `cancel` fires. Individual failures are logged.
    pub fn watch_updates(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(tx)?;

        for (alias, dir) in self.directories.iter() {
            if alias == self.uploads_alias {
                continue;
            }
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            info!(alias, dir = %dir.display(), "watching directory");
        }

        while !cancel.is_cancelled() {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    for path in published_paths(&event) {
                        self.import_watched_path(path);
                    }
                }
                Ok(Err(e)) => warn!("watcher error: {e}"),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("watcher stopped");
        Ok(())
    }

    fn import_watched_path(&self, path: &Path) {
        if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION) {
            return;
        }
        if !path.is_file() {
            return;
        }
        let file_name = path.file_name().and_then(|n| n.to_str());
        let (Some(dir), Some(file_name)) = (path.parent(), file_name) else {
            return;
        };
        let Some(alias) = self.directories.alias_for(dir) else {
            warn!(path = %path.display(), "event outside configured directories");
            return;
        };

        match self.import_media_from_file(alias, dir, file_name, Utc::now()) {
            Ok(Some(hash)) => info!(alias, file_name, %hash, "imported from watcher"),
            Ok(None) => {}
            Err(e) => error!(alias, file_name, "importing from watcher: {e}"),
        }
    }
}
