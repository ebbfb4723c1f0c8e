//! In-memory ordered collection of one user's conversations.

use crate::subscriptions::MessageInsertEvent;
use crate::types::{Conversation, ConversationId, IdSignature, Revision, Timestamp, UserId};
use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet};

/// Result of applying an inserted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The conversation was updated. `moved` is true if its position changed.
    Applied { moved: bool },
    /// No conversation with that id; nothing changed.
    Unknown,
}

/// Ordered conversations for one viewing user.
///
/// Iteration order is always descending `last_message_at`, ties broken by
/// ascending id. Ids are unique. The store never invents a conversation: only
/// `replace_all`/`reconcile` add entries.
#[derive(Clone, Debug)]
pub struct ConversationStore {
    /// Whose list this is. Their own messages never count as unread.
    viewer: UserId,

    preview_max_chars: usize,

    /// Sorted entries.
    entries: Vec<Conversation>,

    /// Memoized signature of the id set; only recomputed on membership change.
    signature: IdSignature,

    /// Bumped on every mutation.
    revision: Revision,

    /// Revision of the latest local mark-read per conversation, until a fetch
    /// issued after it retires the mark.
    read_marks: HashMap<ConversationId, Revision>,
}

fn order_key(c: &Conversation) -> (Reverse<Timestamp>, &ConversationId) {
    (Reverse(c.last_message_at), &c.id)
}

fn compare(a: &Conversation, b: &Conversation) -> Ordering {
    order_key(a).cmp(&order_key(b))
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new(viewer: UserId, preview_max_chars: usize) -> Self {
        Self {
            viewer,
            preview_max_chars,
            entries: Vec::new(),
            signature: IdSignature::empty(),
            revision: Revision::default(),
            read_marks: HashMap::new(),
        }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conversations in list order.
    pub fn conversations(&self) -> &[Conversation] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.entries.iter()
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.entries.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.position(id).is_some()
    }

    /// Current id set, sorted by id (set order, not list order).
    pub fn current_ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self.entries.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        ids
    }

    /// Memoized value identity of `current_ids`.
    pub fn id_signature(&self) -> IdSignature {
        self.signature
    }

    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.entries.iter().position(|c| &c.id == id)
    }

    fn bump(&mut self) -> Revision {
        self.revision = self.revision.next();
        self.revision
    }

    // --- Authoritative replacement ---

    /// Set the store to exactly `list`, sorted. Drops every local read mark.
    pub fn replace_all(&mut self, list: Vec<Conversation>) {
        self.read_marks.clear();
        self.install(list);
    }

    /// Replace with a fetch result issued at revision `issued_at`.
    ///
    /// Conversations read locally after the fetch was issued keep their local
    /// unread count; everything else comes from `list`. Marks at or before
    /// `issued_at` are retired.
    pub fn reconcile(&mut self, mut list: Vec<Conversation>, issued_at: Revision) {
        self.read_marks.retain(|_, marked| *marked > issued_at);

        if !self.read_marks.is_empty() {
            for incoming in list.iter_mut() {
                if !self.read_marks.contains_key(&incoming.id) {
                    continue;
                }
                if let Some(local) = self.get(&incoming.id) {
                    incoming.unread_count = local.unread_count;
                }
            }
        }

        self.install(list);

        let entries = &self.entries;
        self.read_marks
            .retain(|id, _| entries.iter().any(|c| &c.id == id));
    }

    fn install(&mut self, mut list: Vec<Conversation>) {
        let mut seen = HashSet::with_capacity(list.len());
        list.retain(|c| seen.insert(c.id.clone()));
        list.sort_by(compare);

        self.signature = IdSignature::of(list.iter().map(|c| &c.id));
        self.entries = list;
        self.bump();
    }

    // --- Incremental mutations ---

    /// Apply a newly inserted message.
    ///
    /// Unknown conversations are left alone; the caller decides whether to
    /// reconcile. A message older than the current `last_message_at` still
    /// counts as unread but does not rewind the timestamp or preview.
    pub fn apply_message_inserted(&mut self, event: &MessageInsertEvent) -> InsertOutcome {
        let Some(index) = self.position(&event.conversation_id) else {
            return InsertOutcome::Unknown;
        };

        let mut entry = self.entries.remove(index);
        if event.created_at >= entry.last_message_at {
            entry.last_message_at = event.created_at;
            entry.last_message_preview = Some(event.body.preview(self.preview_max_chars));
        }
        if entry.updated_at < event.created_at {
            entry.updated_at = event.created_at;
        }
        if event.sender_id != self.viewer {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }

        let target = self
            .entries
            .partition_point(|other| compare(other, &entry) == Ordering::Less);
        self.entries.insert(target, entry);
        self.bump();

        InsertOutcome::Applied {
            moved: target != index,
        }
    }

    /// Zero the unread count optimistically. Returns false for unknown ids.
    pub fn mark_read(&mut self, id: &ConversationId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.entries[index].unread_count = 0;
        let revision = self.bump();
        self.read_marks.insert(id.clone(), revision);
        true
    }

    /// Remove a conversation after an explicit deletion.
    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        let index = self.position(id)?;
        let removed = self.entries.remove(index);
        self.read_marks.remove(id);
        self.signature = IdSignature::of(self.entries.iter().map(|c| &c.id));
        self.bump();
        Some(removed)
    }
}
