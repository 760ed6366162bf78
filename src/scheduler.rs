//! Cooperative time slicing and stale-result suppression for the diff.
//!
//! The diff runs on the same thread as everything else. [`Scheduler`] walks
//! a list in slices bounded by a time budget and yields to the runtime
//! between slices. A newer diff request supersedes an older one through
//! [`DiffGeneration`]; [`LatestDiff`] only keeps the newest result.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::debug;

pub const DEFAULT_SLICE_BUDGET: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    budget: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            budget: DEFAULT_SLICE_BUDGET,
        }
    }
}

impl Scheduler {
    pub fn new(budget: Duration) -> Self {
        Scheduler { budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Calls `f` for every item, yielding to the runtime whenever a slice has
    /// used up its budget. Each slice handles at least one item. Returns the
    /// number of slices used.
    pub async fn for_each<T, E, F>(&self, items: &[T], mut f: F) -> Result<usize, E>
    where
        F: FnMut(usize, &T) -> Result<(), E>,
    {
        let mut slices = 0;
        let mut index = 0;
        while index < items.len() {
            let started = Instant::now();
            slices += 1;
            loop {
                f(index, &items[index])?;
                index += 1;
                if index >= items.len() || started.elapsed() >= self.budget {
                    break;
                }
            }
            if index < items.len() {
                tokio::task::yield_now().await;
            }
        }
        Ok(slices)
    }
}

/// Monotonic counter tagging diff requests.
#[derive(Debug, Default)]
pub struct DiffGeneration {
    current: AtomicU64,
}

impl DiffGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new request and returns its tag.
    pub fn begin(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

/// Holds the result of the newest diff request.
#[derive(Debug)]
pub struct LatestDiff<T> {
    generation: DiffGeneration,
    slot: Mutex<Option<(u64, T)>>,
}

impl<T> Default for LatestDiff<T> {
    fn default() -> Self {
        LatestDiff {
            generation: DiffGeneration::new(),
            slot: Mutex::new(None),
        }
    }
}

impl<T> LatestDiff<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags a new request. Any result still in flight for an older tag will
    /// be discarded, and the stored result is cleared.
    pub fn begin(&self) -> u64 {
        let generation = self.generation.begin();
        *self.lock() = None;
        generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.is_current(generation)
    }

    /// Stores `value` if `generation` is still the newest request.
    pub fn commit(&self, generation: u64, value: T) -> bool {
        if !self.generation.is_current(generation) {
            debug!(
                "Discarding diff for generation {generation}; generation {} is current",
                self.generation.current()
            );
            return false;
        }
        *self.lock() = Some((generation, value));
        true
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    /// Removes the stored result so it is consumed exactly once.
    pub fn take(&self) -> Option<T> {
        self.lock().take().map(|(_, value)| value)
    }

    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.lock();
        f(guard.as_ref().map(|(_, value)| value))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, T)>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
