//! Push channels feeding the conversation store.
//!
//! Two channels exist per session:
//! - the conversation channel, filtered to the store's current id set and
//!   rebuilt only when that set changes value
//! - the membership channel, filtered to the viewing user and opened once
//!
//! Transports push events into an [`EventSink`]; every delivery is stamped
//! with the channel that produced it so events from a torn-down channel can be
//! discarded.
//!
//! # Example
//!
//! ```ignore
//! let (tx, rx) = crossbeam_channel::bounded(1000);
//! let mut manager = SubscriptionManager::new(transport, ChannelIds::new(), tx, lagged);
//!
//! // After every store mutation
//! match manager.sync(&store) {
//!     SyncAction::Opened(id) => println!("listening on {:?}", id),
//!     SyncAction::Unchanged => {}
//!     SyncAction::Closed | SyncAction::Failed => {}
//! }
//! ```

mod manager;
mod membership;
mod types;

pub use manager::{SubscriptionManager, SyncAction};
pub use membership::MembershipWatcher;
pub use types::{
    ChangeEvent, Channel, ChannelId, ChannelIds, Delivery, EventSink, MembershipInsertEvent,
    MessageInsertEvent, MessageUpdateEvent, RawChange, Topic,
};
