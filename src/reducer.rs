//! Pure application of inbound change events to a store.

use crate::store::{ConversationStore, InsertOutcome};
use crate::subscriptions::ChangeEvent;
use crate::types::ConversationId;

/// Why a reconciliation was requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefetchReason {
    /// An event referenced a conversation the store does not know.
    UnknownConversation(ConversationId),
    /// A message was marked read, possibly from another device.
    ReadReceipt(ConversationId),
    /// The viewer was added to a conversation.
    NewMembership(ConversationId),
    /// The delivery buffer overflowed and events were lost.
    Lagged,
    /// A replaced channel delivered an event for a conversation no longer held.
    ReplacedChannel(ConversationId),
    /// A local action changed server state.
    LocalAction,
    /// Requested by the host.
    Manual,
}

/// Side effect requested by a reduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    ScheduleRefetch(RefetchReason),
}

/// Next state plus the effect the caller must carry out.
#[derive(Debug)]
pub struct Reduction {
    pub store: ConversationStore,
    pub effect: Effect,
}

/// Apply `event` to `store`, returning the next state.
///
/// Performs no I/O. Read receipts never edit unread counts locally; they ask
/// for a refetch so the count converges to what the server says.
pub fn reduce(mut store: ConversationStore, event: &ChangeEvent) -> Reduction {
    let effect = apply_event(&mut store, event);
    Reduction { store, effect }
}

/// In-place form of [`reduce`] for a long-lived store.
pub fn apply_event(store: &mut ConversationStore, event: &ChangeEvent) -> Effect {
    match event {
        ChangeEvent::MessageInserted(insert) => match store.apply_message_inserted(insert) {
            InsertOutcome::Applied { .. } => Effect::None,
            InsertOutcome::Unknown => Effect::ScheduleRefetch(
                RefetchReason::UnknownConversation(insert.conversation_id.clone()),
            ),
        },

        ChangeEvent::MessageUpdated(update) => {
            if !store.contains(&update.conversation_id) {
                Effect::ScheduleRefetch(RefetchReason::UnknownConversation(
                    update.conversation_id.clone(),
                ))
            } else if update.read_at.is_some() {
                Effect::ScheduleRefetch(RefetchReason::ReadReceipt(
                    update.conversation_id.clone(),
                ))
            } else {
                Effect::None
            }
        }

        ChangeEvent::MembershipInserted(membership) => {
            if &membership.user_id != store.viewer() || store.contains(&membership.conversation_id)
            {
                Effect::None
            } else {
                Effect::ScheduleRefetch(RefetchReason::NewMembership(
                    membership.conversation_id.clone(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::{MembershipInsertEvent, MessageInsertEvent, MessageUpdateEvent};
    use crate::types::{Conversation, MessageBody, Timestamp};

    fn conversation(id: &str, last: i64, unread: u32) -> Conversation {
        Conversation {
            id: id.into(),
            created_at: Timestamp(0),
            updated_at: Timestamp(last),
            last_message_at: Timestamp(last),
            last_message_preview: None,
            is_group: false,
            name: None,
            unread_count: unread,
            participants: vec![],
        }
    }

    fn seeded() -> ConversationStore {
        let mut store = ConversationStore::new("me".into(), 80);
        store.replace_all(vec![conversation("a", 1000, 0), conversation("b", 900, 2)]);
        store
    }

    fn inserted(id: &str, sender: &str, at: i64, body: MessageBody) -> ChangeEvent {
        ChangeEvent::MessageInserted(MessageInsertEvent {
            conversation_id: id.into(),
            sender_id: sender.into(),
            created_at: Timestamp(at),
            body,
        })
    }

    #[test]
    fn test_insert_then_mark_read_scenario() {
        let store = seeded();
        let Reduction { mut store, effect } =
            reduce(store, &inserted("b", "them", 1005, MessageBody::Text("hi".into())));
        assert_eq!(effect, Effect::None);

        let ids: Vec<&str> = store.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        let b = store.get(&"b".into()).unwrap();
        assert_eq!(b.unread_count, 3);
        assert_eq!(b.last_message_at, Timestamp(1005));
        assert_eq!(b.last_message_preview.as_deref(), Some("hi"));

        store.mark_read(&"b".into());
        let ids: Vec<&str> = store.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.get(&"b".into()).unwrap().unread_count, 0);
    }

    #[test]
    fn test_apply_event_in_place() {
        let mut store = seeded();
        let revision = store.revision();

        let effect = apply_event(&mut store, &inserted("b", "them", 1005, MessageBody::Video));
        assert_eq!(effect, Effect::None);
        assert!(store.revision() > revision);
        assert_eq!(store.conversations()[0].id.as_str(), "b");
        assert_eq!(store.get(&"b".into()).unwrap().unread_count, 3);

        let effect = apply_event(&mut store, &inserted("zz", "them", 5, MessageBody::File));
        assert_eq!(
            effect,
            Effect::ScheduleRefetch(RefetchReason::UnknownConversation("zz".into()))
        );
    }

    #[test]
    fn test_media_insert_uses_label() {
        let Reduction { store, .. } = reduce(seeded(), &inserted("a", "them", 2000, MessageBody::Image));
        assert_eq!(
            store.get(&"a".into()).unwrap().last_message_preview.as_deref(),
            Some("Image")
        );
    }

    #[test]
    fn test_unknown_insert_requests_refetch() {
        let before = seeded();
        let revision = before.revision();
        let Reduction { store, effect } =
            reduce(before, &inserted("zz", "them", 5, MessageBody::Audio));
        assert_eq!(
            effect,
            Effect::ScheduleRefetch(RefetchReason::UnknownConversation("zz".into()))
        );
        assert_eq!(store.revision(), revision);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_read_receipt_requests_refetch_without_editing() {
        let event = ChangeEvent::MessageUpdated(MessageUpdateEvent {
            conversation_id: "b".into(),
            sender_id: "me".into(),
            read_at: Some(Timestamp(1)),
        });
        let Reduction { store, effect } = reduce(seeded(), &event);
        assert_eq!(
            effect,
            Effect::ScheduleRefetch(RefetchReason::ReadReceipt("b".into()))
        );
        assert_eq!(store.get(&"b".into()).unwrap().unread_count, 2);

        let event = ChangeEvent::MessageUpdated(MessageUpdateEvent {
            conversation_id: "b".into(),
            sender_id: "me".into(),
            read_at: None,
        });
        assert_eq!(reduce(store, &event).effect, Effect::None);
    }

    #[test]
    fn test_membership_for_new_conversation() {
        let event = ChangeEvent::MembershipInserted(MembershipInsertEvent {
            conversation_id: "c".into(),
            user_id: "me".into(),
        });
        let Reduction { store, effect } = reduce(seeded(), &event);
        assert_eq!(
            effect,
            Effect::ScheduleRefetch(RefetchReason::NewMembership("c".into()))
        );
        assert_eq!(store.len(), 2);

        // Already known, or someone else's row: nothing to do.
        let known = ChangeEvent::MembershipInserted(MembershipInsertEvent {
            conversation_id: "a".into(),
            user_id: "me".into(),
        });
        assert_eq!(reduce(store.clone(), &known).effect, Effect::None);
        let foreign = ChangeEvent::MembershipInserted(MembershipInsertEvent {
            conversation_id: "c".into(),
            user_id: "someone".into(),
        });
        assert_eq!(reduce(store, &foreign).effect, Effect::None);
    }
}
