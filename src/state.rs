use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::data::Store;
use crate::models::media::MediaHash;
use crate::services::import_service::Importer;
use crate::services::notify_service::Notifier;

pub const MAX_STATUS_ERRORS: usize = 20;
const NOTIFY_INTERVAL: Duration = Duration::from_secs(1);

pub type ProgressListener = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Status {
    pub running: bool,
    pub count_total: usize,
    pub count_processed: usize,
    pub last_hash: Option<MediaHash>,
    pub errors: VecDeque<StatusError>,
    last_notify: Option<Instant>,
}

impl Status {
    /// Appends to the error ring, evicting the oldest entry once full.
    pub fn add_error(&mut self, message: impl Into<String>) {
        if self.errors.len() >= MAX_STATUS_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(StatusError {
            time: Utc::now(),
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub count_total: usize,
    pub count_processed: usize,
    pub last_hash: Option<MediaHash>,
    pub errors: Vec<StatusError>,
}

impl From<&Status> for StatusReport {
    fn from(status: &Status) -> Self {
        Self {
            running: status.running,
            count_total: status.count_total,
            count_processed: status.count_processed,
            last_hash: status.last_hash.clone(),
            errors: status.errors.iter().cloned().collect(),
        }
    }
}

/// Import progress shared between the scanner and its workers. Every change
/// goes through `update`; listeners fire at most once per second.
pub struct StatusTracker {
    status: RwLock<Status>,
    listeners: Vec<ProgressListener>,
}

impl StatusTracker {
    pub fn new(listeners: Vec<ProgressListener>) -> Self {
        Self {
            status: RwLock::new(Status::default()),
            listeners,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Status> {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Status> {
        self.status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        let (result, due) = {
            let mut status = self.write();
            let result = f(&mut status);
            let due = status
                .last_notify
                .map_or(true, |at| at.elapsed() >= NOTIFY_INTERVAL);
            if due {
                status.last_notify = Some(Instant::now());
            }
            (result, due)
        };

        if due {
            for listener in &self.listeners {
                listener();
            }
        }
        result
    }

    /// Marks a run as started and clears the previous run's counters.
    /// Returns `false`, leaving the status untouched, when a run is already
    /// in progress.
    pub fn begin_run(&self) -> bool {
        {
            let status = self.read();
            if status.running {
                return false;
            }
        }
        self.update(|status| {
            if status.running {
                return false;
            }
            status.running = true;
            status.count_total = 0;
            status.count_processed = 0;
            status.last_hash = None;
            status.errors.clear();
            true
        })
    }

    /// Ends a run; listeners always hear about the final state.
    pub fn finish_run(&self) {
        self.update(|status| {
            status.last_notify = None;
            status.running = false;
        });
    }

    pub fn is_running(&self) -> bool {
        self.read().running
    }

    pub fn snapshot(&self) -> StatusReport {
        StatusReport::from(&*self.read())
    }
}

/// Handles shared by the command layer.
pub struct AppState {
    pub store: Arc<Store>,
    pub importer: Arc<Importer>,
    pub notifier: Arc<Notifier>,
    pub settings: Settings,
    pub cancel: CancellationToken,
}
