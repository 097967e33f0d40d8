//! Timeline clock: the authoritative "what must be on screen now".
//!
//! Fed by TTS position callbacks. Positions move forward monotonically
//! within a sentence and strictly forward across sentences; anything else is
//! rejected unless explicitly tagged as a seek.

use crate::events::{EventBus, SessionEvent};
use crate::model::SentenceRef;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// Errors from timeline updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error(
        "Out of order position: at #{current_seq}+{current_offset_ms}ms, got #{attempted_seq}+{attempted_offset_ms}ms"
    )]
    OutOfOrderPosition {
        current_seq: u64,
        current_offset_ms: u64,
        attempted_seq: u64,
        attempted_offset_ms: u64,
    },
}

/// A position update from the TTS engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub sentence: SentenceRef,
    pub offset_ms: u64,
    /// Tagged seeks may move backwards.
    pub seek: bool,
}

impl PositionUpdate {
    pub fn new(sentence: SentenceRef, offset_ms: u64) -> Self {
        Self {
            sentence,
            offset_ms,
            seek: false,
        }
    }

    pub fn seek(sentence: SentenceRef, offset_ms: u64) -> Self {
        Self {
            sentence,
            offset_ms,
            seek: true,
        }
    }
}

/// Current timeline position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub sentence: SentenceRef,
    pub offset_ms: u64,
    /// When narration of the current sentence began.
    pub sentence_started_at: Instant,
}

/// What an accepted update changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionChange {
    /// Same sentence, later offset.
    Advanced { sentence: SentenceRef, offset_ms: u64 },
    /// Moved forward onto a new sentence.
    SentenceChanged { from: Option<SentenceRef>, to: SentenceRef },
    /// Jumped to an arbitrary sentence.
    Seeked { from: Option<SentenceRef>, to: SentenceRef },
}

impl PositionChange {
    /// The sentence the timeline is on after the change.
    pub fn sentence(&self) -> &SentenceRef {
        match self {
            PositionChange::Advanced { sentence, .. } => sentence,
            PositionChange::SentenceChanged { to, .. } | PositionChange::Seeked { to, .. } => to,
        }
    }
}

/// Single-writer timeline clock for one session.
pub struct TimelineClock {
    position: Option<Position>,
    events: EventBus,
}

impl TimelineClock {
    pub fn new(events: EventBus) -> Self {
        Self {
            position: None,
            events,
        }
    }

    /// Current position, if narration has started.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Current sentence.
    pub fn current(&self) -> Option<&SentenceRef> {
        self.position.as_ref().map(|p| &p.sentence)
    }

    /// Apply a TTS position update.
    pub fn apply(&mut self, update: PositionUpdate) -> Result<PositionChange, TimelineError> {
        if update.seek {
            return Ok(self.seek_to(update.sentence, update.offset_ms));
        }
        self.advance(update.sentence, update.offset_ms)
    }

    /// Move forward to `sentence` at `offset_ms`.
    pub fn advance(&mut self, sentence: SentenceRef, offset_ms: u64) -> Result<PositionChange, TimelineError> {
        let now = Instant::now();

        let change = match &mut self.position {
            None => {
                self.position = Some(Position {
                    sentence: sentence.clone(),
                    offset_ms,
                    sentence_started_at: started_at(now, offset_ms),
                });
                PositionChange::SentenceChanged { from: None, to: sentence }
            }
            Some(current) => {
                let regression = sentence.seq < current.sentence.seq
                    || (sentence.seq == current.sentence.seq && offset_ms < current.offset_ms);
                if regression {
                    let err = TimelineError::OutOfOrderPosition {
                        current_seq: current.sentence.seq,
                        current_offset_ms: current.offset_ms,
                        attempted_seq: sentence.seq,
                        attempted_offset_ms: offset_ms,
                    };
                    warn!(error = %err, "rejected position update");
                    self.events.publish(SessionEvent::PositionRejected {
                        current: current.sentence.seq,
                        attempted: sentence.seq,
                    });
                    return Err(err);
                }

                if sentence.seq == current.sentence.seq {
                    current.offset_ms = offset_ms;
                    PositionChange::Advanced { sentence, offset_ms }
                } else {
                    let from = std::mem::replace(&mut current.sentence, sentence.clone());
                    current.offset_ms = offset_ms;
                    current.sentence_started_at = started_at(now, offset_ms);
                    PositionChange::SentenceChanged {
                        from: Some(from),
                        to: sentence,
                    }
                }
            }
        };

        self.events.publish(SessionEvent::PositionChanged {
            sentence: change.sentence().clone(),
            offset_ms,
        });
        Ok(change)
    }

    /// Reset the position unconditionally.
    ///
    /// Publishes `Seeked`, which tells lookahead consumers that work for the
    /// previous window is superseded.
    pub fn seek(&mut self, target: SentenceRef) -> PositionChange {
        self.seek_to(target, 0)
    }

    fn seek_to(&mut self, target: SentenceRef, offset_ms: u64) -> PositionChange {
        let now = Instant::now();
        let from = self.position.take().map(|p| p.sentence);
        self.position = Some(Position {
            sentence: target.clone(),
            offset_ms,
            sentence_started_at: started_at(now, offset_ms),
        });

        self.events.publish(SessionEvent::Seeked {
            from: from.clone(),
            to: target.clone(),
        });
        self.events.publish(SessionEvent::PositionChanged {
            sentence: target.clone(),
            offset_ms,
        });
        PositionChange::Seeked { from, to: target }
    }
}

fn started_at(now: Instant, offset_ms: u64) -> Instant {
    now.checked_sub(Duration::from_millis(offset_ms)).unwrap_or(now)
}
