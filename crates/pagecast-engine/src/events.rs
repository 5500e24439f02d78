//! Render event fan-out.

use tokio::sync::mpsc;
use tracing::{debug, error};

use pagecast_models::RenderEvent;

/// Bounded render event channel.
///
/// Emission never blocks a render: a full or abandoned channel drops the
/// event and logs it instead. Terminal events matter most, so the
/// capacity should comfortably exceed the progress cadence.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: mpsc::Sender<RenderEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RenderEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Emit an event without blocking.
    ///
    /// A dropped terminal event still lands in the logs so a failed
    /// render is never silent.
    pub fn emit(&self, event: RenderEvent) {
        let terminal = event.is_terminal();
        if let Err(e) = self.tx.try_send(event) {
            if terminal {
                error!(error = %e, "Terminal render event had no subscriber");
            } else {
                debug!(error = %e, "Render event dropped");
            }
        }
    }

    /// Sender handle for components that emit their own events.
    pub fn sender(&self) -> mpsc::Sender<RenderEvent> {
        self.tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let (events, mut rx) = EventChannel::new(8);
        events.emit(RenderEvent::progress(10.0, 3, 30));
        events.emit(RenderEvent::completed("/out.mp4", 1000.0));

        assert!(matches!(
            rx.recv().await,
            Some(RenderEvent::Progress { .. })
        ));
        let done = rx.recv().await.unwrap();
        assert!(done.is_terminal());
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (events, mut rx) = EventChannel::new(1);
        events.emit(RenderEvent::progress(1.0, 1, 100));
        // does not block or panic
        events.emit(RenderEvent::progress(2.0, 2, 100));

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_tolerated() {
        let (events, rx) = EventChannel::new(4);
        drop(rx);
        events.emit(RenderEvent::error("nobody listening"));
    }
}
