//! Core types for the conversation synchronizer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque identifier for a conversation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({})", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        ConversationId(s.to_string())
    }
}

/// Opaque identifier for a user.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Microseconds since Unix epoch, server-assigned.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Local mutation counter of a store.
///
/// Bumped on every change; authoritative fetches remember the revision they
/// were issued at so reconciliation can tell local writes apart by age.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(pub u64);

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

/// Value identity of a conversation id set.
///
/// SHA-256 over the sorted, de-duplicated ids. Two sets with the same members
/// have the same signature regardless of the order they were listed in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdSignature {
    digest: [u8; 32],
    count: usize,
}

impl IdSignature {
    /// Compute the signature of an id set.
    pub fn of<'a>(ids: impl IntoIterator<Item = &'a ConversationId>) -> Self {
        let mut sorted: Vec<&ConversationId> = ids.into_iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut hasher = Sha256::new();
        for id in &sorted {
            hasher.update(id.0.as_bytes());
            // Separator byte keeps ["ab", "c"] distinct from ["a", "bc"].
            hasher.update([0u8]);
        }

        IdSignature {
            digest: hasher.finalize().into(),
            count: sorted.len(),
        }
    }

    /// Signature of the empty set.
    pub fn empty() -> Self {
        Self::of(std::iter::empty::<&ConversationId>())
    }

    /// Number of distinct ids in the set.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Short form for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.digest[0..4])
    }
}

impl Default for IdSignature {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for IdSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdSignature({}.., n={})", self.short(), self.count)
    }
}

/// Public profile attached to a participant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A member of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub joined_at: Timestamp,
    pub last_read_at: Option<Timestamp>,
    #[serde(default)]
    pub user_profile: UserProfile,
}

/// A conversation as returned by an authoritative fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Drives list order (descending).
    pub last_message_at: Timestamp,

    pub last_message_preview: Option<String>,
    pub is_group: bool,
    pub name: Option<String>,
    pub unread_count: u32,

    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl Conversation {
    /// Whether `user` is one of the participants.
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user)
    }
}

/// Body of a message, reduced to what the list needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    Image,
    Audio,
    Video,
    File,
}

impl MessageBody {
    /// Build a body from the row's `type` column and optional text content.
    ///
    /// Returns `None` for types this crate does not know.
    pub fn from_parts(kind: Option<&str>, content: Option<String>) -> Option<Self> {
        match kind.unwrap_or("text") {
            "text" => Some(MessageBody::Text(content.unwrap_or_default())),
            "image" => Some(MessageBody::Image),
            "audio" | "voice" => Some(MessageBody::Audio),
            "video" => Some(MessageBody::Video),
            "file" | "document" => Some(MessageBody::File),
            _ => None,
        }
    }

    /// One-line summary shown in the conversation list.
    pub fn preview(&self, max_chars: usize) -> String {
        match self {
            MessageBody::Text(text) => {
                let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed.chars().count() > max_chars {
                    let mut cut: String = collapsed.chars().take(max_chars).collect();
                    cut.push('…');
                    cut
                } else {
                    collapsed
                }
            }
            MessageBody::Image => "Image".to_string(),
            MessageBody::Audio => "Audio".to_string(),
            MessageBody::Video => "Video".to_string(),
            MessageBody::File => "File".to_string(),
        }
    }
}
