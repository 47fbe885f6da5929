use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::services::import_service::Importer;
use crate::state::StatusTracker;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(20);

/// A file found by the scanner, waiting to be imported.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub dir_alias: String,
    pub dir: PathBuf,
    pub file_name: String,
    pub mod_time: DateTime<Utc>,
}

/// Queue entry. `done` is dropped once the job has been handled, which is
/// how the scanner learns the run is complete.
pub struct ScanJob {
    pub file: MediaFile,
    done: mpsc::Sender<()>,
}

struct RunGuard<'a>(&'a StatusTracker);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_run();
    }
}

impl Importer {
    /// Spawns `count` worker threads draining the job queue until `cancel` fires.
    pub fn start_workers(
        self: &Arc<Self>,
        count: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let importer = Arc::clone(self);
                let cancel = cancel.clone();
                std::thread::spawn(move || importer.run_worker(worker, &cancel))
            })
            .collect()
    }

    fn run_worker(&self, worker: usize, cancel: &CancellationToken) {
        debug!(worker, "import worker started");
        while !cancel.is_cancelled() {
            let next = {
                let queue = self
                    .queue_rx
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue.recv_timeout(POLL_INTERVAL)
            };
            match next {
                Ok(job) => self.process_job(job),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(worker, "import worker stopped");
    }

    fn process_job(&self, job: ScanJob) {
        let file = &job.file;
        let result =
            self.import_media_from_file(&file.dir_alias, &file.dir, &file.file_name, file.mod_time);

        self.status.update(|status| {
            status.count_processed += 1;
            match &result {
                Ok(Some(hash)) => status.last_hash = Some(hash.clone()),
                Ok(None) => {}
                Err(e) => status.add_error(format!("{}/{}: {e}", file.dir_alias, file.file_name)),
            }
        });
        if let Err(e) = &result {
            warn!(alias = %file.dir_alias, file_name = %file.file_name, "import failed: {e}");
        }
        drop(job.done);
    }

    /// Lists the regular files directly inside each configured directory.
    /// Listing failures are recorded and the remaining entries still scanned.
    fn enumerate_media_files(&self) -> Vec<MediaFile> {
        let mut files = Vec::new();
        for (alias, dir) in self.directories.iter() {
            let walker = walkdir::WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        self.status
                            .update(|s| s.add_error(format!("listing {alias}: {e}")));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().to_string();
                let modified = entry
                    .metadata()
                    .map_err(std::io::Error::from)
                    .and_then(|meta| meta.modified());
                let mod_time = match modified {
                    Ok(modified) => DateTime::<Utc>::from(modified),
                    Err(e) => {
                        self.status
                            .update(|s| s.add_error(format!("{alias}/{file_name}: {e}")));
                        continue;
                    }
                };
                files.push(MediaFile {
                    dir_alias: alias.to_string(),
                    dir: dir.to_path_buf(),
                    file_name,
                    mod_time,
                });
            }
        }
        files
    }

    /// Imports every file in the configured directories through the worker
    /// pool and returns once all of them have been handled. Only one scan
    /// runs at a time.
    pub fn scan_directories(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        if !self.status.begin_run() {
            return Err(AppError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.status);

        let files = self.enumerate_media_files();
        info!(total = files.len(), "starting directory scan");
        self.status.update(|s| s.count_total = files.len());

        let (done_tx, done_rx) = mpsc::channel::<()>();
        'files: for file in files {
            let mut job = ScanJob {
                file,
                done: done_tx.clone(),
            };
            loop {
                if cancel.is_cancelled() {
                    break 'files;
                }
                match self.queue_tx.try_send(job) {
                    Ok(()) => break,
                    Err(TrySendError::Full(returned)) => {
                        job = returned;
                        std::thread::sleep(ENQUEUE_BACKOFF);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(AppError::General("import queue closed".to_string()));
                    }
                }
            }
        }
        drop(done_tx);

        // every sender lives in a job; disconnection means all jobs finished
        loop {
            match done_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => break,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }

        let report = self.status.snapshot();
        info!(
            processed = report.count_processed,
            errors = report.errors.len(),
            "directory scan finished"
        );
        Ok(())
    }
}
