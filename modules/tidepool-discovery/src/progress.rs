//! Live-progress broadcasting.
//!
//! One bus per run. Producers never block: the channel is bounded and a slow
//! subscriber simply lags and loses the oldest events. Observability loss is
//! acceptable here — nothing downstream derives state from the stream.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tidepool_common::ProgressEvent;

/// Bounded event buffer per subscriber; laggards drop the oldest.
const CHANNEL_CAPACITY: usize = 256;
/// Heartbeat cadence while a run is live.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            heartbeat: Mutex::new(None),
        }
    }

    /// Subscribe to the live stream. Dropping the receiver unregisters the
    /// subscriber; the producer is unaffected either way.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Send failure only means nobody is listening.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Start the periodic heartbeat task. Idempotent — a second call replaces
    /// the previous task.
    pub fn start_heartbeat(&self) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let _ = tx.send(ProgressEvent::Heartbeat {});
            }
        });
        let mut guard = self.heartbeat.lock().expect("heartbeat lock");
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().expect("heartbeat lock").take() {
            handle.abort();
        }
    }
}

impl Drop for ProgressBus {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ProgressEvent::Found { count: 3 });
        match rx.recv().await.unwrap() {
            ProgressEvent::Found { count } => assert_eq!(count, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = ProgressBus::new();
        bus.publish(ProgressEvent::Complete { done: 10 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_unregisters() {
        let bus = ProgressBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        bus.publish(ProgressEvent::Heartbeat {});
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_producer() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe();

        // Overflow the per-subscriber buffer without ever awaiting the producer.
        for i in 0..(CHANNEL_CAPACITY as u64 + 50) {
            bus.publish(ProgressEvent::Found { count: i });
        }

        // The laggard sees a Lagged error, then the surviving tail.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 50),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
    }
}
