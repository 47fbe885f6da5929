use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Rate-limits `input`: nothing is forwarded sooner than `min` after the last
/// forward, and a forward is attempted at least every `max` even when the
/// input is quiet. The output holds one value; while it is full new values are
/// dropped, so a slow consumer sees the latest state instead of a backlog.
pub fn throttle<T>(
    mut input: mpsc::UnboundedReceiver<T>,
    min: Duration,
    max: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<T>
where
    T: Clone + Default + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + max, max);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_forward: Option<Instant> = None;
        let mut latest = T::default();

        loop {
            let value = tokio::select! {
                _ = cancel.cancelled() => break,
                received = input.recv() => match received {
                    Some(value) => {
                        latest = value.clone();
                        value
                    }
                    None => break,
                },
                _ = ticker.tick() => latest.clone(),
            };

            let now = Instant::now();
            if last_forward.is_some_and(|at| now.duration_since(at) < min) {
                continue;
            }
            match tx.try_send(value) {
                Ok(()) => last_forward = Some(now),
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => break,
            }
        }

        tracing::debug!("throttle stopped");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const FLOOR: Duration = Duration::from_millis(500);
    const CEILING: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_held_to_floor_and_ceiling() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let cancel = CancellationToken::new();
        let mut out = throttle(rx, FLOOR, CEILING, cancel.clone());

        let start = Instant::now();
        for i in 0..100 {
            tx.send(i).unwrap();
            sleep(Duration::from_millis(1)).await;
        }

        // only the first event of the burst passes the floor
        assert_eq!(out.recv().await, Some(0));
        assert!(out.try_recv().is_err());

        // the ceiling forwards the most recent value without new input
        let next = out.recv().await;
        assert_eq!(next, Some(99));
        assert!(start.elapsed() <= CEILING + Duration::from_millis(10));

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_events_all_pass() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let cancel = CancellationToken::new();
        let mut out = throttle(rx, FLOOR, CEILING, cancel.clone());

        for i in 0..3 {
            tx.send(i).unwrap();
            assert_eq!(out.recv().await, Some(i));
            sleep(Duration::from_millis(600)).await;
        }

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_ends_output() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut out = throttle(rx, FLOOR, CEILING, CancellationToken::new());

        drop(tx);
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_output() {
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let cancel = CancellationToken::new();
        let mut out = throttle(rx, FLOOR, CEILING, cancel.clone());

        cancel.cancel();
        assert_eq!(out.recv().await, None);
    }
}
