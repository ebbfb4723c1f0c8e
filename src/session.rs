//! Session lifecycle: wires the store, channels and refetches together.
//!
//! A mounted session runs one event-loop thread. It is the only writer of the
//! [`ConversationStore`]; handlers run to completion one at a time. Readers get
//! the published snapshot.

use crate::backend::{Backend, ConversationActions};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reducer::{apply_event, Effect, RefetchReason};
use crate::refetch::{FetchResult, RefetchScheduler};
use crate::store::ConversationStore;
use crate::subscriptions::{ChannelIds, Delivery, MembershipWatcher, SubscriptionManager};
use crate::types::{Conversation, ConversationId, Revision, UserId};
use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of a session. `TornDown` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    TornDown,
}

/// Notifications for UI watchers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The published conversation list changed.
    ListChanged { revision: Revision },
    /// The session moved to a new lifecycle state.
    Lifecycle { state: LifecycleState },
}

enum Command {
    MarkRead(ConversationId),
    Remove(ConversationId),
    ScheduleRefetch(RefetchReason),
    Resync,
    FetchCompleted {
        issued_at: Revision,
        result: FetchResult,
    },
    Shutdown,
}

/// State visible to both the loop and session handles.
struct Shared {
    /// Cleared on unmount; checked before every mutation.
    alive: AtomicBool,
    state: Mutex<LifecycleState>,
    state_changed: Condvar,
    snapshot: RwLock<Arc<Vec<Conversation>>>,
    revision: AtomicU64,
    watchers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(false),
            state: Mutex::new(LifecycleState::Uninitialized),
            state_changed: Condvar::new(),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            revision: AtomicU64::new(0),
            watchers: Mutex::new(Vec::new()),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn set_state(&self, next: LifecycleState) {
        {
            let mut state = self.state.lock();
            if *state == next || *state == LifecycleState::TornDown {
                return;
            }
            *state = next;
        }
        self.state_changed.notify_all();
        info!(state = ?next, "session state changed");
        self.broadcast(SessionEvent::Lifecycle { state: next });
    }

    /// Send to every watcher, dropping those that are full or gone.
    fn broadcast(&self, event: SessionEvent) {
        self.watchers
            .lock()
            .retain(|watcher| watcher.try_send(event.clone()).is_ok());
    }
}

/// The event loop. Owns the store and both channels.
struct SyncLoop {
    user_id: UserId,
    store: ConversationStore,
    subscriptions: SubscriptionManager,
    membership: MembershipWatcher,
    scheduler: Arc<RefetchScheduler>,
    actions: Arc<dyn ConversationActions>,
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    command_tx: Sender<Command>,
    deliveries: Receiver<Delivery>,
    lagged: Arc<AtomicBool>,
    /// A refetch came due while another fetch was in flight.
    refetch_after_flight: bool,
}

impl SyncLoop {
    fn run(mut self) {
        self.publish();
        self.sync_subscriptions();
        if let Err(e) = self.membership.open() {
            debug!(error = %e, "membership channel unavailable until resync");
        }
        self.start_fetch();

        let commands = self.commands.clone();
        let deliveries = self.deliveries.clone();

        loop {
            let timer = match self.scheduler.next_deadline() {
                Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
                None => never(),
            };

            select! {
                recv(commands) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                recv(deliveries) -> msg => {
                    if let Ok(delivery) = msg {
                        self.handle_delivery(delivery);
                    }
                },
                recv(timer) -> _ => {
                    if self.scheduler.take_due(Instant::now()) {
                        self.start_fetch();
                    }
                },
            }

            if self.lagged.swap(false, Ordering::SeqCst) {
                self.schedule(RefetchReason::Lagged);
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        if !self.shared.is_alive() {
            return;
        }

        match command {
            Command::MarkRead(id) => {
                if !self.store.mark_read(&id) {
                    debug!(conversation_id = %id, "mark read for unknown conversation");
                    return;
                }
                self.publish();

                let actions = Arc::clone(&self.actions);
                let user_id = self.user_id.clone();
                let spawned = thread::Builder::new()
                    .name("conversation-read".into())
                    .spawn(move || {
                        if let Err(e) = actions.mark_messages_as_read(&id, &user_id) {
                            warn!(conversation_id = %id, error = %e, "read receipt write failed");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "failed to spawn read receipt writer");
                }
            }

            Command::Remove(id) => {
                if self.store.remove(&id).is_some() {
                    self.publish();
                    self.sync_subscriptions();
                }
            }

            Command::ScheduleRefetch(reason) => self.schedule(reason),

            Command::Resync => {
                self.subscriptions.resync(&self.store);
                if !self.membership.is_open() {
                    if let Err(e) = self.membership.open() {
                        debug!(error = %e, "membership channel still unavailable");
                    }
                }
                self.start_fetch();
            }

            Command::FetchCompleted { issued_at, result } => {
                match result {
                    Ok(list) => {
                        let list = Arc::try_unwrap(list).unwrap_or_else(|shared| (*shared).clone());
                        self.store.reconcile(list, issued_at);
                        self.publish();
                        self.sync_subscriptions();
                    }
                    Err(e) => {
                        debug!(error = %e, "keeping current list after failed fetch");
                    }
                }

                if self.shared.state() == LifecycleState::Loading {
                    self.shared.set_state(LifecycleState::Ready);
                }

                if self.refetch_after_flight {
                    self.refetch_after_flight = false;
                    self.start_fetch();
                }
            }

            Command::Shutdown => {}
        }
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        if !self.shared.is_alive() {
            return;
        }
        // A replaced channel may still flush events queued before it closed.
        // Those are applied while their conversation is held; anything else
        // is dropped and the list reconciled.
        let replaced = !self.subscriptions.is_current(delivery.channel)
            && !self.membership.is_current(delivery.channel);
        if replaced {
            let id = delivery.event.conversation_id();
            if !self.store.contains(id) {
                debug!(
                    channel = delivery.channel.0,
                    conversation_id = %id,
                    "dropping delivery from replaced channel"
                );
                self.schedule(RefetchReason::ReplacedChannel(id.clone()));
                return;
            }
        }

        let before = self.store.revision();
        let effect = apply_event(&mut self.store, &delivery.event);

        if self.store.revision() != before {
            self.publish();
            self.sync_subscriptions();
        }
        if let Effect::ScheduleRefetch(reason) = effect {
            self.schedule(reason);
        }
    }

    fn schedule(&mut self, reason: RefetchReason) {
        debug!(?reason, "refetch requested");
        self.scheduler.schedule_refetch();
    }

    fn start_fetch(&mut self) {
        if !self.shared.is_alive() {
            return;
        }
        if self.scheduler.is_in_flight() {
            // The running fetch may predate the trigger; go again once it lands.
            self.refetch_after_flight = true;
            return;
        }

        let issued_at = self.store.revision();
        let scheduler = Arc::clone(&self.scheduler);
        let shared = Arc::clone(&self.shared);
        let tx = self.command_tx.clone();

        let spawned = thread::Builder::new()
            .name("conversation-fetch".into())
            .spawn(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| scheduler.fetch_now(issued_at)));
                let (issued_at, result) = match outcome {
                    Ok(outcome) if !outcome.leader => return,
                    Ok(outcome) => (outcome.issued_at, outcome.result),
                    // The loop still has to leave Loading and service queued triggers.
                    Err(_) => (issued_at, Err(SyncError::FetchAbandoned)),
                };
                if shared.is_alive() {
                    let _ = tx.send(Command::FetchCompleted { issued_at, result });
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn fetch worker");
        }
    }

    fn sync_subscriptions(&mut self) {
        self.subscriptions.sync(&self.store);
    }

    fn publish(&self) {
        let revision = self.store.revision();
        *self.shared.snapshot.write() = Arc::new(self.store.conversations().to_vec());
        self.shared.revision.store(revision.0, Ordering::SeqCst);
        self.shared.broadcast(SessionEvent::ListChanged { revision });
    }

    fn teardown(&mut self) {
        self.scheduler.cancel_pending();
        self.subscriptions.close();
        self.membership.close();
        debug!("event loop stopped");
    }
}

/// One user's live conversation list.
///
/// # Example
///
/// ```ignore
/// let mut session = Session::new(user_id, backend, SyncConfig::default());
/// session.mount(cached_snapshot)?;
///
/// let updates = session.watch();
/// while let Ok(event) = updates.recv() {
///     render(&session.conversations());
/// }
///
/// session.unmount();
/// ```
pub struct Session {
    user_id: UserId,
    config: SyncConfig,
    backend: Backend,
    shared: Arc<Shared>,
    scheduler: Arc<RefetchScheduler>,
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Create an unmounted session.
    pub fn new(user_id: UserId, backend: Backend, config: SyncConfig) -> Self {
        let scheduler = Arc::new(RefetchScheduler::new(
            Arc::clone(&backend.source),
            user_id.clone(),
            config.debounce(),
            config.page_size,
            config.max_conversations,
        ));

        Self {
            user_id,
            config,
            backend,
            shared: Arc::new(Shared::new()),
            scheduler,
            commands: None,
            worker: None,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start the event loop.
    ///
    /// `initial` seeds the list for a first paint; an authoritative fetch is
    /// issued regardless.
    pub fn mount(&mut self, initial: Option<Vec<Conversation>>) -> Result<()> {
        let state = self.shared.state();
        if state != LifecycleState::Uninitialized {
            return Err(SyncError::InvalidState(format!(
                "cannot mount a session in state {:?}",
                state
            )));
        }

        let (command_tx, command_rx) = unbounded();
        let (delivery_tx, delivery_rx) = bounded(self.config.delivery_buffer.max(1));
        let lagged = Arc::new(AtomicBool::new(false));
        let channel_ids = ChannelIds::new();

        let mut store = ConversationStore::new(self.user_id.clone(), self.config.preview_max_chars);
        if let Some(seed) = initial {
            store.replace_all(seed);
        }

        let subscriptions = SubscriptionManager::new(
            Arc::clone(&self.backend.transport),
            channel_ids.clone(),
            delivery_tx.clone(),
            Arc::clone(&lagged),
        );
        let membership = MembershipWatcher::new(
            self.user_id.clone(),
            Arc::clone(&self.backend.transport),
            channel_ids,
            delivery_tx,
            Arc::clone(&lagged),
        );

        let event_loop = SyncLoop {
            user_id: self.user_id.clone(),
            store,
            subscriptions,
            membership,
            scheduler: Arc::clone(&self.scheduler),
            actions: Arc::clone(&self.backend.actions),
            shared: Arc::clone(&self.shared),
            commands: command_rx,
            command_tx: command_tx.clone(),
            deliveries: delivery_rx,
            lagged,
            refetch_after_flight: false,
        };

        self.shared.alive.store(true, Ordering::SeqCst);
        self.shared.set_state(LifecycleState::Loading);

        let worker = thread::Builder::new()
            .name("conversation-sync".into())
            .spawn(move || event_loop.run())
            .map_err(|e| {
                self.shared.alive.store(false, Ordering::SeqCst);
                SyncError::Spawn(e.to_string())
            })?;

        self.commands = Some(command_tx);
        self.worker = Some(worker);
        info!(user = %self.user_id, "session mounted");
        Ok(())
    }

    /// Stop the loop, cancel pending timers and close every channel.
    ///
    /// An in-flight fetch is not cancelled; its result is ignored. Idempotent.
    pub fn unmount(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);

        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("event loop panicked");
            }
        }

        if self.shared.state() != LifecycleState::Uninitialized {
            self.shared.set_state(LifecycleState::TornDown);
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Block until the session reaches `target` or `timeout` elapses.
    pub fn wait_for_state(&self, target: LifecycleState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != target {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == target;
            }
        }
        true
    }

    /// Latest published list, in display order.
    pub fn conversations(&self) -> Arc<Vec<Conversation>> {
        self.shared.snapshot.read().clone()
    }

    /// Revision of the latest published list.
    pub fn revision(&self) -> Revision {
        Revision(self.shared.revision.load(Ordering::SeqCst))
    }

    /// Subscribe to session events. Slow receivers are dropped.
    pub fn watch(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = bounded(self.config.watcher_buffer.max(1));
        self.shared.watchers.lock().push(tx);
        rx
    }

    /// Number of authoritative fetches performed.
    pub fn fetch_count(&self) -> u64 {
        self.scheduler.fetch_count()
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.shared.is_alive() {
            return Err(SyncError::NotMounted);
        }
        match &self.commands {
            Some(commands) => commands.send(command).map_err(|_| SyncError::NotMounted),
            None => Err(SyncError::NotMounted),
        }
    }

    /// Zero the unread count now and write the read receipt in the background.
    pub fn mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        self.send(Command::MarkRead(conversation_id))
    }

    /// Drop a conversation the user deleted.
    pub fn remove_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        self.send(Command::Remove(conversation_id))
    }

    /// Request a debounced reconciliation.
    pub fn schedule_refetch(&self) -> Result<()> {
        self.send(Command::ScheduleRefetch(RefetchReason::Manual))
    }

    /// Rebuild the conversation channel, reopen a failed membership channel,
    /// and fetch immediately.
    pub fn resync(&self) -> Result<()> {
        self.send(Command::Resync)
    }

    /// Fetch now, sharing any fetch already in flight.
    ///
    /// Blocks the calling thread until the fetch resolves. The loop applies
    /// the result; the caller also receives it.
    pub fn fetch_now(&self) -> Result<Arc<Vec<Conversation>>> {
        if !self.shared.is_alive() {
            return Err(SyncError::NotMounted);
        }

        let outcome = self.scheduler.fetch_now(self.revision());
        if outcome.leader && self.shared.is_alive() {
            if let Some(commands) = &self.commands {
                let _ = commands.send(Command::FetchCompleted {
                    issued_at: outcome.issued_at,
                    result: outcome.result.clone(),
                });
            }
        }
        outcome.result
    }

    /// Create a conversation with `other`.
    ///
    /// The new conversation shows up after the next reconciliation; it is
    /// never inserted locally.
    pub fn start_conversation(&self, other: &UserId) -> Result<ConversationId> {
        if !self.shared.is_alive() {
            return Err(SyncError::NotMounted);
        }
        let id = self
            .backend
            .actions
            .create_conversation(&self.user_id, other)?;
        self.send(Command::ScheduleRefetch(RefetchReason::LocalAction))?;
        Ok(id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unmount();
    }
}
