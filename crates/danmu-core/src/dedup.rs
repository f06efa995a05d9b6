//! Bounded recency cache for at-most-once handler side effects.
//!
//! Platforms redeliver messages (after a reconnect, or when the same frame is
//! pushed twice). `Deduplicated` wraps a handler so that a message id seen
//! recently is not processed again. Only the most recent `capacity` ids are
//! remembered; an id that comes back after eviction is processed again.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::HandlerError;
use crate::event::LiveEvent;
use crate::handler::EventHandler;

/// Default number of message ids remembered per cache.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// LRU set of recently processed message ids.
///
/// # Thread Safety
/// Internally locked; share it behind an `Arc` across handlers that must not
/// process the same message twice.
pub struct DedupCache {
    inner: Mutex<LruCache<u64, ()>>,
    capacity: NonZeroUsize,
}

impl DedupCache {
    /// Create a cache holding up to `capacity` ids (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `id` is resident. A hit refreshes its recency.
    pub fn seen(&self, id: u64) -> bool {
        self.inner.lock().get(&id).is_some()
    }

    /// Record `id` as processed, evicting the least recently used id when
    /// the cache is full.
    pub fn remember(&self, id: u64) {
        self.inner.lock().put(id, ());
    }

    /// Check and insert under one lock. Returns `true` if the caller is the
    /// first to see `id` and should process it; concurrent duplicates get
    /// `false` while the claim is held.
    pub fn claim(&self, id: u64) -> bool {
        let mut cache = self.inner.lock();
        if cache.get(&id).is_some() {
            return false;
        }
        cache.put(id, ());
        true
    }

    /// Drop a claim whose processing failed, so a later duplicate is
    /// processed again.
    pub fn release(&self, id: u64) {
        self.inner.lock().pop(&id);
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

/// Handler wrapper that skips messages already processed.
///
/// The id is claimed before the inner handler runs, so handlers sharing a
/// cache never process the same id concurrently. A failed attempt releases
/// the claim and a later duplicate is processed again.
pub struct Deduplicated<H> {
    inner: H,
    cache: Arc<DedupCache>,
    name: String,
}

impl<H: EventHandler> Deduplicated<H> {
    pub fn new(inner: H, cache: Arc<DedupCache>) -> Self {
        let name = format!("dedup({})", inner.name());
        Self { inner, cache, name }
    }

    pub fn cache(&self) -> &Arc<DedupCache> {
        &self.cache
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for Deduplicated<H> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &LiveEvent) -> Result<(), HandlerError> {
        if !self.cache.claim(event.msg_id) {
            tracing::trace!(msg_id = event.msg_id, handler = %self.name, "duplicate skipped");
            return Ok(());
        }
        let result = self.inner.handle(event).await;
        if result.is_err() {
            self.cache.release(event.msg_id);
        }
        result
    }
}
