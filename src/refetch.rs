//! Debounced, single-flight authoritative fetches.

use crate::backend::ConversationSource;
use crate::error::{Result, SyncError};
use crate::types::{Conversation, Revision, UserId};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one authoritative fetch, shared by every caller that waited on it.
pub type FetchResult = Result<Arc<Vec<Conversation>>>;

/// Trailing-edge debounce timer.
///
/// Every `arm` pushes the deadline to `now + window`, so the action fires one
/// window after the last trigger.
#[derive(Clone, Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Arm or re-arm. Returns true if the timer was idle.
    pub fn arm(&mut self, now: Instant) -> bool {
        let was_idle = self.deadline.is_none();
        self.deadline = Some(now + self.window);
        was_idle
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return true if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// What a `fetch_now` caller gets back.
#[derive(Debug)]
pub struct FetchOutcome {
    pub result: FetchResult,
    /// Store revision the shared fetch was issued at.
    pub issued_at: Revision,
    /// True for the one caller that performed the network call.
    pub leader: bool,
}

struct Flight {
    issued_at: Revision,
    result: Mutex<Option<FetchResult>>,
    done: Condvar,
}

impl Flight {
    fn new(issued_at: Revision) -> Self {
        Self {
            issued_at,
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, result: FetchResult) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> FetchResult {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut slot);
        }
    }
}

/// Clears the in-flight marker when the leader finishes, even by unwinding.
struct FlightGuard<'a> {
    slot: &'a Mutex<Option<Arc<Flight>>>,
    flight: Arc<Flight>,
    published: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, result: FetchResult) {
        self.release(result);
    }

    fn release(&mut self, result: FetchResult) {
        self.slot.lock().take();
        self.flight.publish(result);
        self.published = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.release(Err(SyncError::FetchAbandoned));
        }
    }
}

/// Coalesces refetch triggers into authoritative fetches.
pub struct RefetchScheduler {
    source: Arc<dyn ConversationSource>,
    user_id: UserId,
    page_size: usize,
    max_conversations: usize,

    debouncer: Mutex<Debouncer>,

    /// The fetch currently in progress, if any.
    in_flight: Mutex<Option<Arc<Flight>>>,

    /// Fetches actually performed (not joined).
    fetches: AtomicU64,
}

impl RefetchScheduler {
    pub fn new(
        source: Arc<dyn ConversationSource>,
        user_id: UserId,
        debounce: Duration,
        page_size: usize,
        max_conversations: usize,
    ) -> Self {
        Self {
            source,
            user_id,
            page_size: page_size.max(1),
            max_conversations,
            debouncer: Mutex::new(Debouncer::new(debounce)),
            in_flight: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    // --- Debounce ---

    /// Request a fetch one debounce window after the last request.
    pub fn schedule_refetch(&self) {
        self.schedule_refetch_at(Instant::now());
    }

    pub fn schedule_refetch_at(&self, now: Instant) {
        if self.debouncer.lock().arm(now) {
            debug!("refetch armed");
        }
    }

    /// When the armed refetch should fire.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.lock().deadline()
    }

    /// Disarm and return true if the armed refetch is due.
    pub fn take_due(&self, now: Instant) -> bool {
        self.debouncer.lock().fire_if_due(now)
    }

    pub fn cancel_pending(&self) {
        self.debouncer.lock().cancel();
    }

    // --- Fetch ---

    /// Whether a fetch is in progress.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Number of fetches performed so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Fetch now, joining the in-progress fetch if there is one.
    ///
    /// `issued_at` is the caller's current store revision; followers get the
    /// leader's revision back instead. The in-flight marker is cleared when the
    /// leader finishes, whatever the outcome.
    pub fn fetch_now(&self, issued_at: Revision) -> FetchOutcome {
        let (flight, leader) = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::new(issued_at));
                    *slot = Some(Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !leader {
            debug!("joining in-flight fetch");
            return FetchOutcome {
                result: flight.wait(),
                issued_at: flight.issued_at,
                leader: false,
            };
        }

        let guard = FlightGuard {
            slot: &self.in_flight,
            flight: Arc::clone(&flight),
            published: false,
        };

        self.fetches.fetch_add(1, Ordering::SeqCst);
        let result = self.fetch_pages().map(Arc::new);
        if let Err(ref e) = result {
            warn!(error = %e, "authoritative fetch failed");
        }
        guard.complete(result.clone());

        FetchOutcome {
            result,
            issued_at,
            leader: true,
        }
    }

    fn fetch_pages(&self) -> Result<Vec<Conversation>> {
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let limit = self
                .page_size
                .min(self.max_conversations.saturating_sub(all.len()));
            if limit == 0 {
                break;
            }

            let page = self
                .source
                .fetch_conversations(&self.user_id, limit, offset)?;
            let received = page.len();
            all.extend(page);
            offset += received;

            if received < limit {
                break;
            }
        }

        // Sources may ignore the limit.
        all.truncate(self.max_conversations);
        debug!(count = all.len(), "authoritative fetch complete");
        Ok(all)
    }
}
