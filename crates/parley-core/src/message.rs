//! Message types for Parley.
//!
//! Messages are immutable once appended. The only behavior they carry is the
//! visibility predicate deciding who may read them.

use crate::clock::serialize_hms;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned message identifier, increasing in append order.
pub type MessageId = u64;

/// Reserved recipient meaning "everyone in the room".
pub const BROADCAST: &str = "Todos";

/// Text of the notice recorded when a participant joins.
pub const JOIN_TEXT: &str = "entra na sala...";

/// Text of the notice recorded when a participant is evicted.
pub const LEAVE_TEXT: &str = "sai da sala...";

/// What kind of message this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Public chat line.
    #[serde(rename = "message")]
    Chat,
    /// Visible to sender and recipient only.
    #[serde(rename = "private_message")]
    Private,
    /// System-authored join/leave notice.
    #[serde(rename = "status")]
    Status,
}

impl MessageKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "message",
            Self::Private => "private_message",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" | "chat" => Ok(Self::Chat),
            "private_message" | "private" => Ok(Self::Private),
            "status" => Ok(Self::Status),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Append-order identifier.
    pub id: MessageId,
    /// Sender name.
    pub from: String,
    /// Recipient name or [`BROADCAST`].
    pub to: String,
    /// Body.
    pub text: String,
    /// Kind of message.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Creation time.
    #[serde(serialize_with = "serialize_hms")]
    pub time: DateTime<Utc>,
}

impl Message {
    /// Create a message not yet appended to a store.
    ///
    /// The `id` is assigned by the store on append.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        text: impl Into<String>,
        kind: MessageKind,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            from: from.into(),
            to: to.into(),
            text: text.into(),
            kind,
            time,
        }
    }

    /// A broadcast status notice attributed to `from`.
    #[must_use]
    pub fn status(from: impl Into<String>, text: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self::new(from, BROADCAST, text, MessageKind::Status, time)
    }

    /// Whether this message is addressed to everyone.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    /// Whether `viewer` may read this message.
    ///
    /// Broadcasts are visible to everyone; anything else only to its two parties.
    #[must_use]
    pub fn is_visible_to(&self, viewer: &str) -> bool {
        self.is_broadcast() || self.from == viewer || self.to == viewer
    }
}
