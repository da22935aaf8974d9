use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cache::retry::{CachePolicy, FetchOutcome};
use crate::error::{Error, Result};
use crate::models::Sourced;

pub type FetchFuture<V> = Pin<Box<dyn Future<Output = Result<V>> + Send>>;

/// Produces one fetch attempt for a cache entry. Stored on the entry so the
/// poller can refresh it without a caller present.
pub type Fetcher<V> = Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>;

/// Wraps an async closure as a `Fetcher`.
pub fn fetcher<V, F, Fut>(f: F) -> Fetcher<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as FetchFuture<V>)
}

/// Values the cache can hold. A value may carry a soft failure (data served
/// in place of a real answer); the retry policy treats it as a failed attempt.
pub trait CacheValue: Clone + Send + Sync + 'static {
    fn failure(&self) -> Option<Error> {
        None
    }
}

impl<T: Clone + Send + Sync + 'static> CacheValue for Sourced<T> {
    fn failure(&self) -> Option<Error> {
        self.provenance.failure()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    Fresh,
    Stale,
    Refreshing,
    Failed,
}

/// What a caller sees when it resolves or peeks at an entry.
#[derive(Debug, Clone)]
pub struct Resolved<V> {
    pub data: Option<V>,
    pub state: EntryState,
    pub error: Option<Error>,
    pub is_fetching: bool,
}

impl<V> Resolved<V> {
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_fetching
    }
}

pub(crate) struct InFlight<V> {
    pub generation: u64,
    pub done: watch::Receiver<Option<Resolved<V>>>,
}

pub struct CacheEntry<V> {
    pub(crate) data: Option<V>,
    /// Last successful commit.
    pub(crate) fetched_at: Option<Instant>,
    /// Last commit of either kind.
    pub(crate) settled_at: Option<Instant>,
    pub(crate) error: Option<Error>,
    pub(crate) retry_count: u32,
    pub(crate) generation: u64,
    pub(crate) invalidated: bool,
    pub(crate) in_flight: Option<InFlight<V>>,
    pub(crate) fetcher: Fetcher<V>,
    /// Someone is currently displaying this entry. Only observed entries poll.
    pub(crate) observed: bool,
    pub(crate) last_used: Instant,
}

impl<V: CacheValue> CacheEntry<V> {
    pub(crate) fn new(fetcher: Fetcher<V>) -> Self {
        Self {
            data: None,
            fetched_at: None,
            settled_at: None,
            error: None,
            retry_count: 0,
            generation: 0,
            invalidated: false,
            in_flight: None,
            fetcher,
            observed: true,
            last_used: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.observed = true;
        self.last_used = now;
    }

    pub fn state(&self, now: Instant, policy: &CachePolicy) -> EntryState {
        if self.in_flight.is_some() {
            return EntryState::Refreshing;
        }
        if self.invalidated {
            return EntryState::Stale;
        }
        if self.error.is_some() {
            return EntryState::Failed;
        }
        match self.fetched_at {
            Some(at) if now.duration_since(at) < policy.stale_time => EntryState::Fresh,
            _ => EntryState::Stale,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the poller should refresh this entry now.
    pub(crate) fn poll_due(&self, now: Instant, policy: &CachePolicy) -> bool {
        if self.in_flight.is_some() || !self.observed {
            return false;
        }
        let Some(interval) = policy.refetch_interval else {
            return false;
        };
        if self.invalidated {
            return true;
        }
        match self.settled_at {
            Some(at) => now.duration_since(at) >= interval,
            None => true,
        }
    }

    /// Unobserved, idle past `gc_time` and with nothing in flight.
    pub(crate) fn collectable(&self, now: Instant, policy: &CachePolicy) -> bool {
        !self.observed
            && self.in_flight.is_none()
            && now.duration_since(self.last_used) >= policy.gc_time
    }

    pub(crate) fn snapshot(&self, now: Instant, policy: &CachePolicy) -> Resolved<V> {
        Resolved {
            data: self.data.clone(),
            state: self.state(now, policy),
            error: self.error.clone(),
            is_fetching: self.in_flight.is_some(),
        }
    }

    /// Stops counting any in-flight fetch and forces the next resolve to refetch.
    pub(crate) fn invalidate(&mut self) {
        self.generation += 1;
        self.invalidated = true;
        self.in_flight = None;
    }

    /// Applies a finished fetch. Returns `false` when the fetch was superseded
    /// and nothing was written.
    pub(crate) fn commit(&mut self, generation: u64, outcome: FetchOutcome<V>, now: Instant) -> bool {
        if generation != self.generation {
            return false;
        }
        self.in_flight = None;
        self.invalidated = false;
        self.settled_at = Some(now);
        match outcome {
            FetchOutcome::Success { value, .. } => {
                self.data = Some(value);
                self.fetched_at = Some(now);
                self.error = None;
                self.retry_count = 0;
            }
            FetchOutcome::Failed { error, fallback, attempts } => {
                // Last good data wins over a fallback.
                if self.data.is_none() {
                    self.data = fallback;
                }
                self.error = Some(error);
                self.retry_count = attempts;
            }
        }
        true
    }
}

/// The view of an outcome handed to callers joined on a superseded fetch.
pub(crate) fn detached<V>(outcome: FetchOutcome<V>) -> Resolved<V> {
    match outcome {
        FetchOutcome::Success { value, .. } => Resolved {
            data: Some(value),
            state: EntryState::Fresh,
            error: None,
            is_fetching: false,
        },
        FetchOutcome::Failed { error, fallback, .. } => Resolved {
            data: fallback,
            state: EntryState::Failed,
            error: Some(error),
            is_fetching: false,
        },
    }
}
