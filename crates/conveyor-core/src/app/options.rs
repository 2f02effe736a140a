//! Send/publish options and draft construction.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{BusError, Headers, MessageId, NewMessage};
use crate::ports::{Clock, IdGenerator, later};
use crate::typed::Message;

/// Per-message options for `send` and `publish`.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub priority: i32,
    pub message_id: Option<MessageId>,

    /// Absolute eligibility instant. Takes precedence over `delay`.
    pub not_before: Option<DateTime<Utc>>,
    pub delay: Option<TimeDelta>,
    pub trace_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl SendOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_delay(mut self, delay: TimeDelta) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Serialize `message` and stamp kind, id and eligibility onto a draft.
pub(crate) fn draft<M: Message>(
    message: &M,
    options: SendOptions,
    ids: &dyn IdGenerator,
    clock: &dyn Clock,
) -> Result<NewMessage, BusError> {
    let body = serde_json::to_vec(message).map_err(|source| BusError::Encode {
        kind: M::KIND.to_string(),
        source,
    })?;

    let now = clock.now();
    let not_before = match (options.not_before, options.delay) {
        (Some(at), _) => at,
        (None, Some(delay)) => later(now, delay.max(TimeDelta::zero())),
        (None, None) => now,
    };

    let headers = Headers {
        message_kind: Some(M::KIND.to_string()),
        exception: None,
        trace_id: options.trace_id,
        user: options.headers,
    };

    Ok(NewMessage {
        message_id: options.message_id.unwrap_or_else(|| ids.message_id()),
        priority: options.priority,
        not_before,
        headers,
        body,
    })
}
