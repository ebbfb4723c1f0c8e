//! In-memory collaborators for integration tests.

#![allow(dead_code)]

use conversation_sync::{
    Backend, Channel, ChannelId, Conversation, ConversationActions, ConversationId,
    ConversationSource, EventSink, PushTransport, Result, SyncConfig, SyncError, Timestamp, Topic,
    UserId,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const VIEWER: &str = "me";

pub fn conversation(id: &str, last: Timestamp, unread: u32) -> Conversation {
    Conversation {
        id: id.into(),
        created_at: Timestamp(0),
        updated_at: last,
        last_message_at: last,
        last_message_preview: Some(format!("preview of {}", id)),
        is_group: false,
        name: None,
        unread_count: unread,
        participants: vec![],
    }
}

/// Hours and minutes of some day, as a timestamp.
pub fn at(hours: i64, minutes: i64) -> Timestamp {
    Timestamp::from_secs(hours * 3600 + minutes * 60)
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 50,
        ..Default::default()
    }
}

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `condition` until it holds or two seconds pass.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// --- Source ---

#[derive(Default)]
pub struct FakeSource {
    rows: Mutex<Vec<Conversation>>,
    calls: AtomicUsize,
    fail: AtomicBool,
    panic_next: AtomicBool,
    gate: Mutex<Option<Receiver<()>>>,
}

impl FakeSource {
    pub fn with_rows(rows: Vec<Conversation>) -> Arc<Self> {
        let source = Self::default();
        *source.rows.lock() = rows;
        Arc::new(source)
    }

    pub fn set_rows(&self, rows: Vec<Conversation>) {
        *self.rows.lock() = rows;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make the next call panic instead of answering.
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Block every call until the returned sender sends or is dropped.
    pub fn hold(&self) -> Sender<()> {
        let (tx, rx) = bounded(0);
        *self.gate.lock() = Some(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConversationSource for FakeSource {
    fn fetch_conversations(
        &self,
        _user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("list endpoint crashed");
        }

        // The server answers with what it had when the request arrived.
        let page: Vec<Conversation> = self
            .rows
            .lock()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Fetch("503 from list endpoint".into()));
        }
        Ok(page)
    }
}

// --- Transport ---

struct FakeChannel {
    id: ChannelId,
    closed: Arc<Mutex<HashSet<ChannelId>>>,
    closing: Arc<AtomicUsize>,
    close_gate: Arc<Mutex<Option<Receiver<()>>>>,
}

impl Channel for FakeChannel {
    fn close(&mut self) {
        self.closing.fetch_add(1, Ordering::SeqCst);
        let gate = self.close_gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.closed.lock().insert(self.id);
    }
}

#[derive(Default)]
pub struct FakeTransport {
    opened: Mutex<Vec<(Topic, EventSink)>>,
    closed: Arc<Mutex<HashSet<ChannelId>>>,
    closing: Arc<AtomicUsize>,
    close_gate: Arc<Mutex<Option<Receiver<()>>>>,
    fail_messages: AtomicBool,
}

impl FakeTransport {
    /// Block every channel close until the returned sender sends or is dropped.
    pub fn hold_close(&self) -> Sender<()> {
        let (tx, rx) = bounded(0);
        *self.close_gate.lock() = Some(rx);
        tx
    }

    /// Closes that have started, including ones still blocked.
    pub fn closes_started(&self) -> usize {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    pub fn message_opens(&self) -> usize {
        self.opened
            .lock()
            .iter()
            .filter(|(topic, _)| matches!(topic, Topic::Messages { .. }))
            .count()
    }

    pub fn membership_opens(&self) -> usize {
        self.opened
            .lock()
            .iter()
            .filter(|(topic, _)| matches!(topic, Topic::Membership { .. }))
            .count()
    }

    /// Channels opened and not yet closed.
    pub fn open_channels(&self) -> usize {
        let closed = self.closed.lock();
        self.opened
            .lock()
            .iter()
            .filter(|(_, sink)| !closed.contains(&sink.channel()))
            .count()
    }

    fn latest(&self, want_messages: bool) -> Option<(Topic, EventSink)> {
        let closed = self.closed.lock();
        self.opened
            .lock()
            .iter()
            .rev()
            .filter(|(topic, _)| matches!(topic, Topic::Messages { .. }) == want_messages)
            .find(|(_, sink)| !closed.contains(&sink.channel()))
            .cloned()
    }

    pub fn messages_sink(&self) -> Option<EventSink> {
        self.latest(true).map(|(_, sink)| sink)
    }

    pub fn messages_topic(&self) -> Option<Topic> {
        self.latest(true).map(|(topic, _)| topic)
    }

    pub fn membership_sink(&self) -> Option<EventSink> {
        self.latest(false).map(|(_, sink)| sink)
    }
}

impl PushTransport for FakeTransport {
    fn open(&self, topic: &Topic, sink: EventSink) -> Result<Box<dyn Channel>> {
        if self.fail_messages.load(Ordering::SeqCst) && matches!(topic, Topic::Messages { .. }) {
            return Err(SyncError::Transport("channel join timed out".into()));
        }
        let id = sink.channel();
        self.opened.lock().push((topic.clone(), sink));
        Ok(Box::new(FakeChannel {
            id,
            closed: Arc::clone(&self.closed),
            closing: Arc::clone(&self.closing),
            close_gate: Arc::clone(&self.close_gate),
        }))
    }
}

// --- Actions ---

#[derive(Default)]
pub struct FakeActions {
    pub created: Mutex<Vec<UserId>>,
    pub reads: Mutex<Vec<ConversationId>>,
}

impl ConversationActions for FakeActions {
    fn create_conversation(&self, _user_id: &UserId, other: &UserId) -> Result<ConversationId> {
        let mut created = self.created.lock();
        created.push(other.clone());
        Ok(ConversationId(format!("new-{}", created.len())))
    }

    fn mark_messages_as_read(
        &self,
        conversation_id: &ConversationId,
        _user_id: &UserId,
    ) -> Result<()> {
        self.reads.lock().push(conversation_id.clone());
        Ok(())
    }
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub transport: Arc<FakeTransport>,
    pub actions: Arc<FakeActions>,
}

impl Harness {
    pub fn new(rows: Vec<Conversation>) -> Self {
        init_tracing();
        Self {
            source: FakeSource::with_rows(rows),
            transport: Arc::new(FakeTransport::default()),
            actions: Arc::new(FakeActions::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::new(
            Arc::clone(&self.source) as Arc<dyn ConversationSource>,
            Arc::clone(&self.transport) as Arc<dyn PushTransport>,
            Arc::clone(&self.actions) as Arc<dyn ConversationActions>,
        )
    }
}
