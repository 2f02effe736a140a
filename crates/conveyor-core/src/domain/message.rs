//! Message records: the rows a Data Store hands out for processing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MessageId, RecordId, SubscriberId};

/// Where a record lives: a point-to-point queue, or one subscriber's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum QueueIdentity {
    Queue(String),
    Subscriber(SubscriberId),
}

impl QueueIdentity {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    pub fn subscriber(id: SubscriberId) -> Self {
        Self::Subscriber(id)
    }

    pub fn is_subscriber(&self) -> bool {
        matches!(self, Self::Subscriber(_))
    }
}

impl fmt::Display for QueueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => write!(f, "queue:{name}"),
            Self::Subscriber(id) => write!(f, "subscriber:{id}"),
        }
    }
}

/// Message headers.
///
/// `message_kind` is the dispatch token; `exception` holds the text of the
/// most recent processing failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: BTreeMap<String, String>,
}

impl Headers {
    pub fn for_kind(kind: impl Into<String>) -> Self {
        Self {
            message_kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.user.get(name).map(String::as_str)
    }
}

/// Extra columns carried by records delivered through a topic subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: SubscriberId,
    pub topic: String,
    pub valid_until: DateTime<Utc>,
}

/// A stored message (queue or subscribed variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: RecordId,
    pub message_id: MessageId,

    /// Higher values are handed out first.
    pub priority: i32,

    /// The record is not eligible for fetching before this instant.
    pub not_before: DateTime<Utc>,
    pub enqueued: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,

    /// Number of failed processing attempts so far.
    pub retries: u32,
    pub headers: Headers,
    pub body: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

impl MessageRecord {
    pub fn is_pending(&self) -> bool {
        self.completed.is_none() && self.failed.is_none()
    }

    pub fn message_kind(&self) -> Option<&str> {
        self.headers.message_kind.as_deref()
    }
}

/// A message about to be written; the store assigns the row id and
/// enqueue time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message_id: MessageId,
    pub priority: i32,
    pub not_before: DateTime<Utc>,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl NewMessage {
    /// Build the pending record a store persists for this draft.
    pub fn into_record(
        self,
        id: RecordId,
        enqueued: DateTime<Utc>,
        subscription: Option<Subscription>,
    ) -> MessageRecord {
        MessageRecord {
            id,
            message_id: self.message_id,
            priority: self.priority,
            not_before: self.not_before,
            enqueued,
            completed: None,
            failed: None,
            retries: 0,
            headers: self.headers,
            body: self.body,
            subscription,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn queue_identity_is_tagged() {
        let v = serde_json::to_value(QueueIdentity::queue("orders")).unwrap();
        assert_eq!(v["kind"], "queue");
        assert_eq!(v["name"], "orders");

        let sub = QueueIdentity::subscriber(SubscriberId::new("billing"));
        assert!(sub.is_subscriber());
        assert_eq!(sub.to_string(), "subscriber:billing");
    }

    #[test]
    fn headers_skip_empty_fields() {
        let headers = Headers::for_kind("orders.placed.v1");
        let v = serde_json::to_value(&headers).unwrap();
        assert_eq!(v, serde_json::json!({ "message_kind": "orders.placed.v1" }));
    }

    #[test]
    fn new_message_becomes_pending_record() {
        let now = Utc::now();
        let draft = NewMessage {
            message_id: MessageId::from_ulid(Ulid::new()),
            priority: 3,
            not_before: now,
            headers: Headers::for_kind("k").with("tenant", "acme"),
            body: b"{}".to_vec(),
        };

        let record = draft.into_record(RecordId(9), now, None);
        assert!(record.is_pending());
        assert_eq!(record.retries, 0);
        assert_eq!(record.message_kind(), Some("k"));
        assert_eq!(record.headers.get("tenant"), Some("acme"));
    }
}
