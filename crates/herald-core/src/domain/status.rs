//! Envelope status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status of an envelope.
///
/// State transitions:
/// - Unsent -> Delivering            (dispatcher published it)
/// - Delivering -> Sent | Failed     (deliverer committed / provider rejected)
/// - Failed -> Delivering            (re-dispatched by a later sweep)
/// - Failed -> Sent                  (a queued copy was delivered after all)
///
/// Nothing moves back to `Unsent`, and `Sent` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    /// Created, waiting for its schedule.
    #[default]
    Unsent,

    /// Published to the queue, not yet handled by a deliverer.
    Delivering,

    /// Committed to the provider.
    Sent,

    /// The provider rejected the message.
    Failed,
}

impl EnvelopeStatus {
    pub const ALL: [EnvelopeStatus; 4] = [
        EnvelopeStatus::Unsent,
        EnvelopeStatus::Delivering,
        EnvelopeStatus::Sent,
        EnvelopeStatus::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EnvelopeStatus::Sent)
    }

    /// May a sweep pick this envelope up (once its schedule has elapsed)?
    pub fn is_dispatch_eligible(self) -> bool {
        matches!(self, EnvelopeStatus::Unsent | EnvelopeStatus::Failed)
    }

    /// May a deliverer attempt a send when this is the persisted status?
    pub fn is_delivery_eligible(self) -> bool {
        matches!(self, EnvelopeStatus::Delivering | EnvelopeStatus::Failed)
    }

    pub fn can_transition_to(self, next: EnvelopeStatus) -> bool {
        use EnvelopeStatus::*;
        matches!(
            (self, next),
            (Unsent, Delivering)
                | (Delivering, Sent)
                | (Delivering, Failed)
                | (Failed, Delivering)
                | (Failed, Sent)
        )
    }

    /// Status writes a store accepts: the lifecycle transitions, plus SENT →
    /// FAILED for a deliverer retracting its own commit-to-send claim after
    /// the provider refused the message.
    pub fn accepts_write(self, next: EnvelopeStatus) -> bool {
        self.can_transition_to(next)
            || (self == EnvelopeStatus::Sent && next == EnvelopeStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Unsent => "UNSENT",
            EnvelopeStatus::Delivering => "DELIVERING",
            EnvelopeStatus::Sent => "SENT",
            EnvelopeStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
