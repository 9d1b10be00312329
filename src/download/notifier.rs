//! Debounced status notifications for parent entities
//!
//! When many tracks of an album settle at nearly the same time, observers
//! of the album should hear about it once. Every [`ParentNotifier::notify`]
//! records the changed track and restarts a single quiet-period timer; when
//! the timer fires, the parents of all recorded tracks are resolved,
//! deduplicated and announced once each.

use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::EventBus;
use crate::offline::OfflineReader;

/// Quiet period used when none is configured
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Changed leaf id -> parents known when the change was recorded
type Pending = Arc<Mutex<HashMap<String, BTreeSet<String>>>>;

pub struct ParentNotifier {
    window: Duration,
    reader: OfflineReader,
    bus: EventBus,
    pending: Pending,
    timer: Option<JoinHandle<()>>,
}

impl ParentNotifier {
    pub fn new(reader: OfflineReader, bus: EventBus, window: Duration) -> Self {
        Self {
            window,
            reader,
            bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timer: None,
        }
    }

    /// Record a changed leaf and push the pending notification back by one window
    pub fn notify(&mut self, leaf_id: &str) {
        // Parents are captured now as well, the leaf may be gone by the time
        // the timer fires
        let known = self.reader.parent_ids(leaf_id);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(leaf_id.to_string())
            .or_default()
            .extend(known);

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let pending = self.pending.clone();
        let reader = self.reader.clone();
        let bus = self.bus.clone();
        let window = self.window;

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            fire(&pending, &reader, &bus);
        }));
    }

    /// Cancel the timer and announce everything pending right away
    pub fn flush(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        fire(&self.pending, &self.reader, &self.bus);
    }
}

impl Drop for ParentNotifier {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn fire(pending: &Pending, reader: &OfflineReader, bus: &EventBus) {
    let leaves = mem::take(&mut *pending.lock().unwrap_or_else(PoisonError::into_inner));
    if leaves.is_empty() {
        return;
    }

    let mut parents = BTreeSet::new();
    for (leaf, known) in &leaves {
        parents.extend(known.iter().cloned());
        parents.extend(reader.parent_ids(leaf));
    }

    debug!(
        "Announcing {} parent(s) for {} changed item(s)",
        parents.len(),
        leaves.len()
    );
    for parent in parents {
        bus.post_status_changed(&parent);
    }
}
