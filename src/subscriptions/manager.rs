//! Owner of the conversation-scoped push channel.

use crate::backend::PushTransport;
use crate::store::ConversationStore;
use crate::types::IdSignature;
use crossbeam_channel::Sender;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{Channel, ChannelId, ChannelIds, Delivery, EventSink, Topic};

/// What a `sync` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// Id set unchanged since the last attempt; nothing done.
    Unchanged,
    /// Old channel (if any) closed and a new one opened.
    Opened(ChannelId),
    /// Old channel (if any) closed; the id set is empty so nothing reopened.
    Closed,
    /// Opening the new channel failed. Retried on the next id-set change or
    /// an explicit resync.
    Failed,
}

struct ActiveChannel {
    id: ChannelId,
    signature: IdSignature,
    channel: Box<dyn Channel>,
}

/// Keeps exactly one channel whose filter is the store's current id set.
///
/// Rebuilds happen only when the set's value changes; reordering the list
/// never triggers one.
pub struct SubscriptionManager {
    transport: Arc<dyn PushTransport>,
    channel_ids: ChannelIds,
    sender: Sender<Delivery>,
    lagged: Arc<AtomicBool>,

    active: Option<ActiveChannel>,

    /// Signature of the last rebuild attempt, successful or not.
    attempted: Option<IdSignature>,

    /// Channels opened so far.
    opened: u64,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        channel_ids: ChannelIds,
        sender: Sender<Delivery>,
        lagged: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            channel_ids,
            sender,
            lagged,
            active: None,
            attempted: None,
            opened: 0,
        }
    }

    /// Rebuild the channel if the store's id set differs from the last attempt.
    pub fn sync(&mut self, store: &ConversationStore) -> SyncAction {
        if self.attempted == Some(store.id_signature()) {
            return SyncAction::Unchanged;
        }
        self.rebuild(store)
    }

    /// Rebuild unconditionally.
    pub fn resync(&mut self, store: &ConversationStore) -> SyncAction {
        self.rebuild(store)
    }

    fn rebuild(&mut self, store: &ConversationStore) -> SyncAction {
        let signature = store.id_signature();
        self.teardown_active();
        self.attempted = Some(signature);

        if signature.is_empty() {
            debug!("no conversations, conversation channel stays closed");
            return SyncAction::Closed;
        }

        let id = self.channel_ids.next();
        let topic = Topic::Messages {
            conversation_ids: store.current_ids(),
        };
        let sink = EventSink::new(id, self.sender.clone(), Arc::clone(&self.lagged));

        match self.transport.open(&topic, sink) {
            Ok(channel) => {
                self.opened += 1;
                info!(
                    channel = id.0,
                    signature = %signature.short(),
                    conversations = signature.count(),
                    "conversation channel opened"
                );
                self.active = Some(ActiveChannel {
                    id,
                    signature,
                    channel,
                });
                SyncAction::Opened(id)
            }
            Err(e) => {
                warn!(
                    signature = %signature.short(),
                    error = %e,
                    "failed to open conversation channel"
                );
                SyncAction::Failed
            }
        }
    }

    fn teardown_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.channel.close();
            debug!(channel = active.id.0, "conversation channel closed");
        }
    }

    /// Close the channel and forget the last attempt.
    pub fn close(&mut self) {
        self.teardown_active();
        self.attempted = None;
    }

    /// Whether deliveries from `channel` should still be applied.
    pub fn is_current(&self, channel: ChannelId) -> bool {
        self.active.as_ref().map(|a| a.id) == Some(channel)
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Signature the open channel was built for.
    pub fn active_signature(&self) -> Option<IdSignature> {
        self.active.as_ref().map(|a| a.signature)
    }

    pub fn opened_count(&self) -> u64 {
        self.opened
    }
}
