//! Message trait - ties a Rust type to its kind token.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A message type that can be sent, published and handled.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: String,
/// }
///
/// impl Message for OrderPlaced {
///     const KIND: &'static str = "shop.order.placed.v1";
/// }
/// ```
///
/// `KIND` is written to the message headers and is the only thing dispatch
/// looks at; renaming the Rust type does not break stored messages.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Naming convention: `{namespace}.{domain}.{event}.v{major}`.
    const KIND: &'static str;
}
