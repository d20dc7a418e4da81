//! IdGenerator port - ID 生成の抽象化
//!
//! - **UlidGenerator**: ULID based, timestamp taken from a `Clock`

use crate::domain::ids::EnvelopeId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator produces identifiers that need no coordination.
///
/// # Thread Safety
/// - `Send + Sync`, shared by every sender built from one app
pub trait IdGenerator: Send + Sync {
    fn envelope_id(&self) -> EnvelopeId;

    /// Group ids are opaque strings on the envelope; callers may supply
    /// their own, so this only produces the default.
    fn message_group_id(&self) -> String;
}

/// ULID generator driven by a `Clock`.
///
/// With a `FixedClock` the timestamp part is deterministic; the random part
/// still keeps ids unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn envelope_id(&self) -> EnvelopeId {
        EnvelopeId::from(self.next())
    }

    fn message_group_id(&self) -> String {
        self.next().to_string()
    }
}
