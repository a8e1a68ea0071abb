//! Keyed read-through cache with in-flight request sharing.
//!
//! Each key holds at most one value and at most one pending request. Callers
//! that miss while a request is pending await the same shared future instead
//! of issuing their own.

use crate::error::StoryError;
use crate::lock::mutex_lock;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const SOURCE: &str = "cache::query";

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, StoryError>>>;

/// Snapshot of one cache key, as a screen would render it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<V> {
    /// Last known good value.
    pub data: Option<V>,
    /// A request is pending and there is nothing to show yet.
    pub is_loading: bool,
    /// A request is pending, possibly refreshing existing data.
    pub is_fetching: bool,
    /// Error of the last failed request, cleared by the next success or write.
    pub error: Option<StoryError>,
}

struct Entry<V> {
    value: Option<V>,
    updated_at: Option<Instant>,
    invalidated: bool,
    error: Option<StoryError>,
    in_flight: Option<SharedFetch<V>>,
    /// Bumped by every write and invalidation. A request only stores its
    /// result if the generation it started under is still current.
    generation: u64,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            value: None,
            updated_at: None,
            invalidated: false,
            error: None,
            in_flight: None,
            generation: 0,
        }
    }
}

impl<V> Entry<V> {
    fn is_fresh(&self, stale_time: Duration) -> bool {
        self.updated_at
            .is_some_and(|at| at.elapsed() < stale_time)
    }
}

enum Plan<V> {
    Revalidate(V, SharedFetch<V>),
    Wait(SharedFetch<V>),
}

/// A read-through cache over keys `K` holding values `V`.
pub(crate) struct QueryCache<K, V> {
    name: &'static str,
    stale_time: Duration,
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
}

impl<K, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            stale_time: self.stale_time,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> QueryCache<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, stale_time: Duration) -> Self {
        Self {
            name,
            stale_time,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the value for `key`, calling `fetcher` only when needed.
    ///
    /// - fresh value: returned as is
    /// - stale value: returned immediately, refreshed in a background task
    /// - missing or invalidated: awaits the pending request for `key`, or
    ///   starts one with `fetcher`
    ///
    /// A failed request leaves the previous value in place.
    pub async fn fetch<F, Fut>(&self, key: K, fetcher: F) -> Result<V, StoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, StoryError>> + Send + 'static,
    {
        let plan = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "fetch");
            let entry = entries.entry(key.clone()).or_default();

            match &entry.value {
                Some(value) if !entry.invalidated => {
                    if entry.is_fresh(self.stale_time) {
                        debug!(cache = self.name, ?key, "cache hit");
                        return Ok(value.clone());
                    }
                    if entry.in_flight.is_some() {
                        debug!(cache = self.name, ?key, "stale hit, refresh already pending");
                        return Ok(value.clone());
                    }
                    let value = value.clone();
                    Plan::Revalidate(value, self.start(&key, entry, fetcher))
                }
                _ => match &entry.in_flight {
                    Some(pending) => {
                        debug!(cache = self.name, ?key, "joining pending request");
                        Plan::Wait(pending.clone())
                    }
                    None => {
                        debug!(cache = self.name, ?key, "cache miss");
                        Plan::Wait(self.start(&key, entry, fetcher))
                    }
                },
            }
        };

        match plan {
            Plan::Revalidate(value, pending) => {
                debug!(cache = self.name, ?key, "stale hit, revalidating in background");
                let name = self.name;
                tokio::spawn(async move {
                    if let Err(err) = pending.await {
                        warn!(cache = name, ?key, error = %err, "background refresh failed");
                    }
                });
                Ok(value)
            }
            Plan::Wait(pending) => pending.await,
        }
    }

    fn start<F, Fut>(&self, key: &K, entry: &mut Entry<V>, fetcher: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, StoryError>> + Send + 'static,
    {
        let request = fetcher();
        let entries = Arc::clone(&self.entries);
        let name = self.name;
        let key = key.clone();
        let generation = entry.generation;

        let pending = async move {
            let result = request.await;
            Self::settle(&entries, name, &key, generation, &result);
            result
        }
        .boxed()
        .shared();

        entry.in_flight = Some(pending.clone());
        pending
    }

    fn settle(
        entries: &Mutex<HashMap<K, Entry<V>>>,
        name: &'static str,
        key: &K,
        generation: u64,
        result: &Result<V, StoryError>,
    ) {
        let mut entries = mutex_lock(entries, SOURCE, "settle");
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            debug!(cache = name, ?key, "discarding superseded response");
            return;
        }

        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.value = Some(value.clone());
                entry.updated_at = Some(Instant::now());
                entry.invalidated = false;
                entry.error = None;
            }
            Err(err) => {
                warn!(cache = name, ?key, error = %err, "fetch failed, keeping last good value");
                entry.error = Some(err.clone());
            }
        }
    }

    /// Current value for `key` without fetching.
    pub fn peek(&self, key: &K) -> Option<V> {
        mutex_lock(&self.entries, SOURCE, "peek")
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    pub fn state(&self, key: &K) -> QueryState<V> {
        let entries = mutex_lock(&self.entries, SOURCE, "state");
        match entries.get(key) {
            Some(entry) => QueryState {
                data: entry.value.clone(),
                is_loading: entry.in_flight.is_some() && entry.value.is_none(),
                is_fetching: entry.in_flight.is_some(),
                error: entry.error.clone(),
            },
            None => QueryState {
                data: None,
                is_loading: false,
                is_fetching: false,
                error: None,
            },
        }
    }

    /// Replace the value for `key` with `updater(previous)`, no request made.
    ///
    /// Any pending request for `key` is superseded.
    pub fn write(&self, key: K, updater: impl FnOnce(Option<V>) -> V) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "write");
        let entry = entries.entry(key).or_default();
        entry.value = Some(updater(entry.value.take()));
        entry.updated_at = Some(Instant::now());
        entry.invalidated = false;
        entry.error = None;
        entry.in_flight = None;
        entry.generation += 1;
    }

    /// Apply `updater` to the value for `key` only if one is cached.
    ///
    /// Returns `false`, changing nothing, when there is no value. An entry
    /// already marked stale stays marked.
    pub fn update_if_present(&self, key: &K, updater: impl FnOnce(V) -> V) -> bool {
        let mut entries = mutex_lock(&self.entries, SOURCE, "update_if_present");
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let Some(value) = entry.value.take() else {
            return false;
        };
        entry.value = Some(updater(value));
        entry.updated_at = Some(Instant::now());
        entry.error = None;
        entry.in_flight = None;
        entry.generation += 1;
        true
    }

    /// Mark every key matching `predicate` stale. Returns how many were marked.
    ///
    /// The next fetch for a marked key goes to the network, and any request
    /// already pending for it is superseded.
    pub fn invalidate(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "invalidate");
        let mut marked = 0;
        for (key, entry) in entries.iter_mut().filter(|(key, _)| predicate(key)) {
            debug!(cache = self.name, ?key, "invalidated");
            entry.invalidated = true;
            entry.in_flight = None;
            entry.generation += 1;
            marked += 1;
        }
        marked
    }
}
