//! Session event bus.
//!
//! Producers push typed events; the sync coordinator's consumers and the
//! external session monitor subscribe. Delivery is FIFO per producer.
//! Publishing with no subscribers is a no-op, and a subscriber that falls
//! more than the channel capacity behind observes a `Lagged` error rather
//! than slowing the producers down.

use crate::environment::NetworkClass;
use crate::model::{QualityTier, RenderDirective, SentenceRef};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Events produced during a reading session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The timeline position moved forward.
    PositionChanged { sentence: SentenceRef, offset_ms: u64 },

    /// Narration of a sentence began.
    SentenceStarted { sentence: SentenceRef },

    /// Narration of a sentence finished.
    SentenceEnded { sentence: SentenceRef },

    /// A non-seek position update went backwards and was ignored.
    PositionRejected { current: u64, attempted: u64 },

    /// The timeline jumped; lookahead work for `from`'s window is superseded.
    Seeked { from: Option<SentenceRef>, to: SentenceRef },

    /// A generated scene entered the cache.
    SceneReady { sentence: SentenceRef, tier: QualityTier },

    /// Generation for a sentence gave up; it will always degrade.
    PermanentMiss { sentence: SentenceRef, reason: String },

    /// A late scene became visible, or a missed sentence ended without one.
    SyncDrift { sentence: SentenceRef, drift_ms: i64 },

    /// A directive was sent to the renderer.
    Render(RenderDirective),

    /// The quality ceiling or network class changed.
    QualityChanged { tier: QualityTier, network: NetworkClass },
}

/// Internal pub/sub bus for session events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. No-op if there are no subscribers.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Create a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Create a new subscriber as a stream.
    pub fn stream(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::SentenceStarted {
            sentence: SentenceRef::at(3),
        });

        match rx.try_recv().unwrap() {
            SessionEvent::SentenceStarted { sentence } => assert_eq!(sentence.seq, 3),
            other => panic!("expected SentenceStarted, got {other:?}"),
        }
    }

    #[test]
    fn test_no_subscribers_no_panic() {
        let bus = EventBus::new(16);
        bus.publish(SessionEvent::PositionRejected {
            current: 4,
            attempted: 2,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_fifo_per_producer() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        for seq in 0..5 {
            bus.publish(SessionEvent::SentenceEnded {
                sentence: SentenceRef::at(seq),
            });
        }
        for expected in 0..5 {
            match rx.try_recv().unwrap() {
                SessionEvent::SentenceEnded { sentence } => assert_eq!(sentence.seq, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_stream_subscriber() {
        let bus = EventBus::new(4);
        let mut stream = bus.stream();
        bus.publish(SessionEvent::SceneReady {
            sentence: SentenceRef::at(1),
            tier: QualityTier::Draft,
        });

        let event = stream.next().await.unwrap().unwrap();
        assert!(matches!(event, SessionEvent::SceneReady { .. }));
    }
}
