//! Domain model (ids, message records, saga rows, retry decisions, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod retry;
pub mod saga;

pub use errors::{BusError, StoreError};
pub use ids::{MessageId, RecordId, SagaId, SubscriberId};
pub use message::{Headers, MessageRecord, NewMessage, QueueIdentity, Subscription};
pub use retry::{RetryResult, RetryResultError};
pub use saga::{SagaData, SagaLoad};
