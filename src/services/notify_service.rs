use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AppError;
use crate::models::media::MediaHash;

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

/// Accepts exactly one configured key. A blank key accepts nothing.
pub struct StaticToken {
    key: String,
}

impl StaticToken {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl TokenVerifier for StaticToken {
    fn verify(&self, token: &str) -> bool {
        !self.key.trim().is_empty() && self.key == token
    }
}

/// Registry of live-update subscribers. Subscribers receive `()` pings and
/// re-fetch whatever they are showing.
pub struct Notifier {
    settings: Mutex<Vec<UnboundedSender<()>>>,
    media: Mutex<HashMap<MediaHash, Vec<UnboundedSender<()>>>>,
    verifier: Arc<dyn TokenVerifier>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pings every sender, dropping the ones whose receiver has gone away.
fn ping_all(subscribers: &mut Vec<UnboundedSender<()>>) -> usize {
    subscribers.retain(|tx| tx.send(()).is_ok());
    subscribers.len()
}

impl Notifier {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            settings: Mutex::new(Vec::new()),
            media: Mutex::new(HashMap::new()),
            verifier,
        }
    }

    /// Subscribes to import progress. Requires a valid token.
    pub fn subscribe_settings(&self, token: &str) -> Result<UnboundedReceiver<()>, AppError> {
        if !self.verifier.verify(token) {
            return Err(AppError::Unauthorized);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.settings).push(tx);
        Ok(rx)
    }

    /// Subscribes to changes of one media item.
    pub fn subscribe_media(&self, hash: &MediaHash) -> UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.media).entry(hash.clone()).or_default().push(tx);
        rx
    }

    pub fn ping_settings(&self) -> usize {
        ping_all(&mut lock(&self.settings))
    }

    pub fn ping_media(&self, hash: &MediaHash) -> usize {
        let mut media = lock(&self.media);
        let Some(subscribers) = media.get_mut(hash) else {
            return 0;
        };
        let delivered = ping_all(subscribers);
        if delivered == 0 {
            media.remove(hash);
        }
        delivered
    }

    pub fn settings_subscribers(&self) -> usize {
        let mut settings = lock(&self.settings);
        settings.retain(|tx| !tx.is_closed());
        settings.len()
    }

    /// Forwards throttled progress events to settings subscribers.
    pub async fn run_settings_fanout(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(()) => {
                        let delivered = self.ping_settings();
                        debug!(delivered, "sent progress update");
                    }
                    None => break,
                },
            }
        }
    }

    /// Forwards media change events to the subscribers of each hash.
    pub async fn run_media_fanout(
        self: Arc<Self>,
        mut updates: UnboundedReceiver<MediaHash>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(hash) => {
                        let delivered = self.ping_media(&hash);
                        debug!(%hash, delivered, "sent media update");
                    }
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(key: &str) -> Arc<Notifier> {
        Arc::new(Notifier::new(Arc::new(StaticToken::new(key))))
    }

    #[test]
    fn test_settings_subscription_requires_token() {
        let notifier = notifier("secret");
        assert!(matches!(
            notifier.subscribe_settings("wrong"),
            Err(AppError::Unauthorized)
        ));

        let mut rx = notifier.subscribe_settings("secret").unwrap();
        assert_eq!(notifier.ping_settings(), 1);
        assert_eq!(rx.try_recv(), Ok(()));
    }

    #[test]
    fn test_blank_key_rejects_every_token() {
        let notifier = notifier("");
        for token in ["", " ", "secret"] {
            assert!(matches!(
                notifier.subscribe_settings(token),
                Err(AppError::Unauthorized)
            ));
        }
        assert_eq!(notifier.settings_subscribers(), 0);
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let notifier = notifier("secret");
        let keep = notifier.subscribe_settings("secret").unwrap();
        let gone = notifier.subscribe_settings("secret").unwrap();
        drop(gone);

        assert_eq!(notifier.settings_subscribers(), 1);
        assert_eq!(notifier.ping_settings(), 1);
        drop(keep);
        assert_eq!(notifier.ping_settings(), 0);
    }

    #[test]
    fn test_media_pings_reach_only_that_hash() {
        let notifier = notifier("secret");
        let a = MediaHash::from("aaaaaaaaaaaaaaaa");
        let b = MediaHash::from("bbbbbbbbbbbbbbbb");
        let mut rx_a = notifier.subscribe_media(&a);
        let mut rx_b = notifier.subscribe_media(&b);

        assert_eq!(notifier.ping_media(&a), 1);
        assert_eq!(rx_a.try_recv(), Ok(()));
        assert!(rx_b.try_recv().is_err());

        drop(rx_b);
        assert_eq!(notifier.ping_media(&b), 0);
        assert_eq!(notifier.ping_media(&MediaHash::from("cccccccccccccccc")), 0);
    }

    #[tokio::test]
    async fn test_media_fanout_forwards_until_input_closes() {
        let notifier = notifier("secret");
        let hash = MediaHash::from("aaaaaaaaaaaaaaaa");
        let mut rx = notifier.subscribe_media(&hash);

        let (tx, updates) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            notifier
                .clone()
                .run_media_fanout(updates, CancellationToken::new()),
        );

        tx.send(hash.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(()));

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_fanout_stops_on_cancel() {
        let notifier = notifier("secret");
        let mut rx = notifier.subscribe_settings("secret").unwrap();

        let (tx, updates) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(notifier.clone().run_settings_fanout(updates, cancel.clone()));

        tx.send(()).await.unwrap();
        assert_eq!(rx.recv().await, Some(()));

        cancel.cancel();
        task.await.unwrap();
    }
}
