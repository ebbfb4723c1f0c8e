//! # Conversation Sync
//!
//! Keeps one user's conversation list (order, previews, unread counters)
//! consistent under out-of-order push events, debounced reconciliation, and
//! channel churn as the set of visible conversations changes.
//!
//! ## Core Concepts
//!
//! - **Store**: Conversations sorted by latest message, mutated in place by
//!   push events and replaced wholesale by authoritative fetches
//! - **Reducer**: Pure mapping of a change event onto the store
//! - **Channels**: One push channel scoped to the current id set, rebuilt only
//!   when that set changes, plus one membership channel per session
//! - **Refetch**: Debounced, single-flight authoritative pulls
//! - **Session**: Event loop that owns all of the above
//!
//! ## Example
//!
//! ```ignore
//! use conversation_sync::{Backend, Session, SyncConfig};
//!
//! let backend = Backend::new(source, transport, actions);
//! let mut session = Session::new("user-1".into(), backend, SyncConfig::default());
//!
//! // Seed from cache, confirm with a fetch
//! session.mount(Some(cached))?;
//!
//! // Open a conversation
//! session.mark_read("conv-9".into())?;
//!
//! session.unmount();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod reducer;
pub mod refetch;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backend::{Backend, ConversationActions, ConversationSource, PushTransport};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use reducer::{apply_event, reduce, Effect, Reduction, RefetchReason};
pub use refetch::{Debouncer, FetchOutcome, FetchResult, RefetchScheduler};
pub use session::{LifecycleState, Session, SessionEvent};
pub use store::{ConversationStore, InsertOutcome};
pub use subscriptions::{
    ChangeEvent, Channel, ChannelId, ChannelIds, Delivery, EventSink, MembershipInsertEvent,
    MembershipWatcher, MessageInsertEvent, MessageUpdateEvent, RawChange, SubscriptionManager,
    SyncAction, Topic,
};
pub use types::*;
