//! Background tasks driven by the scheduler.

pub mod cleanup;
pub mod message;
pub mod renew;

pub use self::cleanup::CleanupTask;
pub use self::message::{BEFORE_HANDLE_FAILED, BEFORE_HANDLER, MessageTask};
pub use self::renew::RenewSubscriptionsTask;
