//! Collapse bursts of events into one callback.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{WatchHandler, invoke};
use super::types::WatchEvent;

/// Fires the handler once per quiet period.
///
/// Every pushed event restarts the delay window; when the window elapses
/// without a new event the handler runs once with the last event of the
/// burst.
#[derive(Debug)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<WatchEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn the debounce task. Must be called from within a tokio runtime.
    pub fn spawn(delay: Duration, handler: WatchHandler) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut pending: Option<WatchEvent> = None;
            let mut burst = 0usize;
            let mut deadline = Instant::now();
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(event) => {
                            deadline = Instant::now() + delay;
                            burst += 1;
                            pending = Some(event);
                        }
                        None => break,
                    },
                    () = tokio::time::sleep_until(deadline), if pending.is_some() => {
                        if let Some(event) = pending.take() {
                            tracing::debug!(
                                path = %event.path.display(),
                                events = burst,
                                "debounce window elapsed"
                            );
                            burst = 0;
                            invoke(&handler, event).await;
                        }
                    }
                }
            }
        });

        Self { tx, cancel, task }
    }

    /// Queue an event, restarting the window.
    pub fn push(&self, event: WatchEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("debouncer already stopped, dropping event");
        }
    }

    /// Stop the task, discarding any pending event.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            tracing::error!("debounce task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::{WatchEventType, handler};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use parking_lot::Mutex;

    fn recording() -> (WatchHandler, Arc<AtomicUsize>, Arc<Mutex<Vec<(Instant, WatchEvent)>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (calls.clone(), seen.clone());
        let h = handler(move |event| {
            let (c, s) = (c.clone(), s.clone());
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                s.lock().push((Instant::now(), event));
                Ok(())
            }
        });
        (h, calls, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_call() {
        let (h, calls, seen) = recording();
        let debouncer = Debouncer::spawn(Duration::from_millis(300), h);

        let mut last = Instant::now();
        for i in 0..5 {
            let mut event = WatchEvent::new(WatchEventType::Modify, "/scripts/a.xml");
            if i == 4 {
                event.event_type = WatchEventType::Delete;
            }
            debouncer.push(event);
            last = Instant::now();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (fired_at, event) = seen.lock()[0].clone();
        assert_eq!(event.event_type, WatchEventType::Delete);
        let lag = fired_at.duration_since(last);
        assert!(lag >= Duration::from_millis(300), "fired after {lag:?}");
        assert!(lag < Duration::from_millis(350), "fired after {lag:?}");

        debouncer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn separated_bursts_fire_separately() {
        let (h, calls, _) = recording();
        let debouncer = Debouncer::spawn(Duration::from_millis(100), h);

        debouncer.push(WatchEvent::new(WatchEventType::Create, "/a"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.push(WatchEvent::new(WatchEventType::Modify, "/a"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        debouncer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_event() {
        let (h, calls, _) = recording();
        let debouncer = Debouncer::spawn(Duration::from_millis(100), h);
        debouncer.push(WatchEvent::new(WatchEventType::Modify, "/a"));
        debouncer.shutdown().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
