//! IdGenerator port - ULID generation driven by a `Clock`.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{MessageId, SagaId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn message_id(&self) -> MessageId;

    fn saga_id(&self) -> SagaId;
}

/// ULID generator whose timestamp part comes from the clock, so ids stay
/// sortable even under a `FixedClock`.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn message_id(&self) -> MessageId {
        MessageId::from(self.next())
    }

    fn saga_id(&self) -> SagaId {
        SagaId::from(self.next())
    }
}
