//! Push channel types: topics, inbound change events, and the delivery sink.

use crate::error::{Result, SyncError};
use crate::types::{ConversationId, MessageBody, Timestamp, UserId};
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Server-side filter of a push channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Topic {
    /// Message rows whose conversation id is in the set. Never empty.
    Messages { conversation_ids: Vec<ConversationId> },
    /// Participant rows added for one user.
    Membership { user_id: UserId },
}

impl Topic {
    /// Table the channel listens on.
    pub fn table(&self) -> &'static str {
        match self {
            Topic::Messages { .. } => "messages",
            Topic::Membership { .. } => "conversation_participants",
        }
    }

    /// Filter expression sent upstream.
    pub fn filter(&self) -> String {
        match self {
            Topic::Messages { conversation_ids } => {
                let joined = conversation_ids
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("conversation_id=in.({})", joined)
            }
            Topic::Membership { user_id } => format!("user_id=eq.{}", user_id),
        }
    }
}

/// A new message row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInsertEvent {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub created_at: Timestamp,
    pub body: MessageBody,
}

/// An edited message row. Only the read marker matters to the list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdateEvent {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub read_at: Option<Timestamp>,
}

/// A participant row: some user joined some conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipInsertEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

/// Inbound change, closed over every row shape a channel can deliver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    MessageInserted(MessageInsertEvent),
    MessageUpdated(MessageUpdateEvent),
    MembershipInserted(MembershipInsertEvent),
}

impl ChangeEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            ChangeEvent::MessageInserted(e) => &e.conversation_id,
            ChangeEvent::MessageUpdated(e) => &e.conversation_id,
            ChangeEvent::MembershipInserted(e) => &e.conversation_id,
        }
    }
}

/// Change payload as it comes off the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawChange {
    /// "INSERT" or "UPDATE" (case-insensitive).
    pub event: String,
    pub table: String,
    pub row: serde_json::Value,
}

#[derive(Deserialize)]
struct MessageRow {
    conversation_id: ConversationId,
    sender_id: UserId,
    created_at: Timestamp,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    read_at: Option<Timestamp>,
}

#[derive(Deserialize)]
struct ParticipantRow {
    conversation_id: ConversationId,
    user_id: UserId,
}

impl RawChange {
    /// Parse a raw JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Decode into the typed event.
    pub fn decode(self) -> Result<ChangeEvent> {
        let RawChange { event, table, row } = self;
        let key = (event.to_ascii_lowercase(), table.clone());
        match (key.0.as_str(), key.1.as_str()) {
            ("insert", "messages") => {
                let row: MessageRow = serde_json::from_value(row)?;
                let kind = row.kind.as_deref();
                let body = MessageBody::from_parts(kind, row.content).ok_or_else(|| {
                    SyncError::Decode(format!("unknown message type {:?}", kind.unwrap_or("")))
                })?;
                Ok(ChangeEvent::MessageInserted(MessageInsertEvent {
                    conversation_id: row.conversation_id,
                    sender_id: row.sender_id,
                    created_at: row.created_at,
                    body,
                }))
            }
            ("update", "messages") => {
                let row: MessageRow = serde_json::from_value(row)?;
                Ok(ChangeEvent::MessageUpdated(MessageUpdateEvent {
                    conversation_id: row.conversation_id,
                    sender_id: row.sender_id,
                    read_at: row.read_at,
                }))
            }
            ("insert", "conversation_participants") => {
                let row: ParticipantRow = serde_json::from_value(row)?;
                Ok(ChangeEvent::MembershipInserted(MembershipInsertEvent {
                    conversation_id: row.conversation_id,
                    user_id: row.user_id,
                }))
            }
            _ => Err(SyncError::UnsupportedEvent { event, table }),
        }
    }
}

/// Unique identifier for an opened channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Session-wide channel id generator, shared by every channel owner.
#[derive(Clone, Debug, Default)]
pub struct ChannelIds(Arc<AtomicU64>);

impl ChannelIds {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub fn next(&self) -> ChannelId {
        ChannelId(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// An event stamped with the channel that produced it.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub channel: ChannelId,
    pub event: ChangeEvent,
}

/// Where a transport pushes events for one channel.
///
/// Bounded: when the consumer falls behind, events are dropped and the lag
/// flag is raised so the consumer knows to reconcile.
#[derive(Clone, Debug)]
pub struct EventSink {
    channel: ChannelId,
    sender: Sender<Delivery>,
    lagged: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(channel: ChannelId, sender: Sender<Delivery>, lagged: Arc<AtomicBool>) -> Self {
        Self {
            channel,
            sender,
            lagged,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Push a typed event. Returns false if it was not accepted.
    pub fn deliver(&self, event: ChangeEvent) -> bool {
        let delivery = Delivery {
            channel: self.channel,
            event,
        };
        match self.sender.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.lagged.store(true, Ordering::SeqCst);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Decode and push a wire payload.
    pub fn deliver_raw(&self, raw: RawChange) -> Result<bool> {
        Ok(self.deliver(raw.decode()?))
    }
}

/// An open push channel. Closing is idempotent.
pub trait Channel: Send {
    fn close(&mut self);
}
