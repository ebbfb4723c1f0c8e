//! External collaborators the synchronizer talks to.
//!
//! All of them are injected through a [`Backend`] owned by one session, so
//! independent sessions never share a hidden connection.

use crate::error::Result;
use crate::subscriptions::{Channel, EventSink, Topic};
use crate::types::{Conversation, ConversationId, UserId};
use std::sync::Arc;

/// Authoritative, paginated list of a user's conversations.
pub trait ConversationSource: Send + Sync {
    fn fetch_conversations(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>>;
}

/// Opens push channels.
///
/// The transport owns whatever threads feed the channel; it must push events
/// into `sink` in the order it receives them.
pub trait PushTransport: Send + Sync {
    fn open(&self, topic: &Topic, sink: EventSink) -> Result<Box<dyn Channel>>;
}

/// Server-side mutations. Fire-and-forget from the synchronizer's view.
pub trait ConversationActions: Send + Sync {
    fn create_conversation(&self, user_id: &UserId, other: &UserId) -> Result<ConversationId>;

    fn mark_messages_as_read(&self, conversation_id: &ConversationId, user_id: &UserId)
        -> Result<()>;
}

/// Session-scoped handle bundling every collaborator.
#[derive(Clone)]
pub struct Backend {
    pub source: Arc<dyn ConversationSource>,
    pub transport: Arc<dyn PushTransport>,
    pub actions: Arc<dyn ConversationActions>,
}

impl Backend {
    pub fn new(
        source: Arc<dyn ConversationSource>,
        transport: Arc<dyn PushTransport>,
        actions: Arc<dyn ConversationActions>,
    ) -> Self {
        Self {
            source,
            transport,
            actions,
        }
    }
}
