//! Always-on channel that notices the viewer joining new conversations.

use crate::backend::PushTransport;
use crate::error::Result;
use crate::types::UserId;
use crossbeam_channel::Sender;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{Channel, ChannelId, ChannelIds, Delivery, EventSink, Topic};

/// Watches participant rows for the viewing user.
///
/// The filter depends only on the user id, so the channel is opened once per
/// session and never rebuilt on conversation churn.
pub struct MembershipWatcher {
    user_id: UserId,
    transport: Arc<dyn PushTransport>,
    channel_ids: ChannelIds,
    sender: Sender<Delivery>,
    lagged: Arc<AtomicBool>,
    active: Option<(ChannelId, Box<dyn Channel>)>,
}

impl MembershipWatcher {
    pub fn new(
        user_id: UserId,
        transport: Arc<dyn PushTransport>,
        channel_ids: ChannelIds,
        sender: Sender<Delivery>,
        lagged: Arc<AtomicBool>,
    ) -> Self {
        Self {
            user_id,
            transport,
            channel_ids,
            sender,
            lagged,
            active: None,
        }
    }

    /// Open the channel unless it is already open.
    pub fn open(&mut self) -> Result<ChannelId> {
        if let Some((id, _)) = &self.active {
            return Ok(*id);
        }

        let id = self.channel_ids.next();
        let topic = Topic::Membership {
            user_id: self.user_id.clone(),
        };
        let sink = EventSink::new(id, self.sender.clone(), Arc::clone(&self.lagged));

        match self.transport.open(&topic, sink) {
            Ok(channel) => {
                info!(channel = id.0, user = %self.user_id, "membership channel opened");
                self.active = Some((id, channel));
                Ok(id)
            }
            Err(e) => {
                warn!(error = %e, "failed to open membership channel");
                Err(e)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_current(&self, channel: ChannelId) -> bool {
        matches!(&self.active, Some((id, _)) if *id == channel)
    }

    pub fn close(&mut self) {
        if let Some((id, mut channel)) = self.active.take() {
            channel.close();
            debug!(channel = id.0, "membership channel closed");
        }
    }
}
