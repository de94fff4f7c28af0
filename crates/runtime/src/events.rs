//! Event Bus — one bounded, ordered channel of [`Event`] per session.
//!
//! Generalises the reference turn loop's `mpsc::channel::<TurnEvent>(64)`
//! from a single concrete event enum into the full [`Event`] union, and
//! adds the drain-on-disconnect behaviour and heartbeat ticker the
//! per-request channel never needed (it had exactly one consumer for its
//! whole lifetime).

use std::sync::Arc;
use std::time::{Duration, Instant};

use ag_domain::event::Event;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Producer handle for a session's event channel.
///
/// Sends never block the Agent Loop on a slow or absent subscriber: once
/// the receiver is dropped, `send` becomes a no-op for every event except
/// [`Event::Error`] and [`Event::Done`], which are logged so the failure
/// is at least visible.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    last_send: Arc<Mutex<Instant>>,
}

impl EventBus {
    /// Create a bus with the given channel capacity, returning the
    /// producer handle and the subscriber's receiver.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, last_send: Arc::new(Mutex::new(Instant::now())) }, rx)
    }

    pub async fn send(&self, event: Event) {
        *self.last_send.lock() = Instant::now();
        if self.tx.send(event.clone()).await.is_err() {
            if matches!(event, Event::Error { .. } | Event::Done { .. }) {
                tracing::warn!(session_id = event.session_id(), "event bus has no subscriber for terminal event");
            }
        }
    }

    /// Spawn a heartbeat ticker that emits [`Event::Heartbeat`] only once
    /// `interval` has passed since the producer's last send — a producer
    /// that is actively streaming text deltas never sees a heartbeat.
    pub fn spawn_heartbeat(&self, session_id: String, interval: Duration) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; discard it
            loop {
                ticker.tick().await;
                let silence = Instant::now().duration_since(*bus.last_send.lock());
                if silence >= interval {
                    bus.send(Event::Heartbeat { session_id: session_id.clone(), at: now() }).await;
                }
            }
        })
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (bus, mut rx) = EventBus::new(8);
        bus.send(Event::IterationStarted { session_id: "s1".into(), iteration: 1 }).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), "s1");
    }

    #[tokio::test]
    async fn send_after_drop_does_not_panic() {
        let (bus, rx) = EventBus::new(8);
        drop(rx);
        bus.send(Event::Done { session_id: "s1".into(), final_text: "done".into() }).await;
    }

    #[tokio::test]
    async fn heartbeat_fires_after_interval() {
        let (bus, mut rx) = EventBus::new(8);
        let handle = bus.spawn_heartbeat("s1".into(), Duration::from_millis(20));
        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, Event::Heartbeat { .. }));
        handle.abort();
    }
}
