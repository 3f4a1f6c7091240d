// Copyright 2026 postcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::BTreeSet,
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard};
use postcache_common::{
    clock::{duration_millis, Clock, SystemClock},
    event::{Event, EventListener},
    metrics::Metrics,
    rate::IntervalGate,
};

use crate::{
    catalog::CatalogSnapshotSource,
    config::ThreadCacheConfig,
    descriptor::{CatalogDescriptor, ChanDescriptor, PostDescriptor, ThreadDescriptor},
    error::{Error, Result},
    eviction::{self, Candidate, EvictionReport, Reclaim, Selection},
    map::ShardedMap,
    post::Post,
    thread::{StatusUpdate, ThreadState, ThreadStore, UpsertOptions, UpsertStats},
};

/// Listener for posts leaving the thread cache.
pub type ThreadEventListener = Arc<dyn EventListener<Key = ThreadDescriptor, Value = Arc<Post>>>;

/// Age given to threads populated with [`Priority::Low`], so they are the first eviction victims.
const LOW_PRIORITY_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Priority of a thread population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    /// Regular fetch, the thread counts as just accessed.
    #[default]
    Normal,
    /// Preview or background fetch. A new thread store is seeded one year in the past and the write is not counted as
    /// an access.
    Low,
}

/// Options of [`ThreadCache::put_thread_posts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Population priority.
    pub priority: Priority,
    /// Store all posts. If unset only the original post is kept in memory.
    pub store_in_memory: bool,
    /// The posts are the complete thread, missing cached posts are marked deleted.
    pub full_refresh: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            store_in_memory: true,
            full_refresh: false,
        }
    }
}

/// Builder of [`ThreadCache`].
pub struct ThreadCacheBuilder {
    config: ThreadCacheConfig,
    catalog: Arc<dyn CatalogSnapshotSource>,
    clock: Arc<dyn Clock>,
    event_listener: Option<ThreadEventListener>,
}

impl ThreadCacheBuilder {
    /// Thread cache builder with default settings, protecting the threads listed by `catalog`.
    pub fn new(catalog: Arc<dyn CatalogSnapshotSource>) -> Self {
        Self {
            config: ThreadCacheConfig::default(),
            catalog,
            clock: Arc::new(SystemClock),
            event_listener: None,
        }
    }

    /// Replace all settings.
    pub fn with_config(mut self, config: ThreadCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the post budget.
    pub fn with_max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.config.max_cache_size = max_cache_size;
        self
    }

    /// Set the number of most recently accessed threads eviction never selects.
    pub fn with_immune_threads_count(mut self, immune_threads_count: usize) -> Self {
        self.config.immune_threads_count = immune_threads_count;
        self
    }

    /// Set the minimal interval between two automatic eviction passes.
    pub fn with_eviction_interval(mut self, eviction_interval: Duration) -> Self {
        self.config.eviction_interval = eviction_interval;
        self
    }

    /// Set the shard count of the thread map.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    /// Panic on invariant violations instead of logging and skipping.
    pub fn with_strict_invariants(mut self, strict_invariants: bool) -> Self {
        self.config.strict_invariants = strict_invariants;
        self
    }

    /// Set the clock access times are measured with.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the listener notified with the posts leaving the cache.
    pub fn with_event_listener(mut self, event_listener: ThreadEventListener) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Build the thread cache.
    pub fn build(self) -> Result<ThreadCache> {
        self.config.validate()?;
        tracing::debug!("[thread cache]: build with config {:?}", self.config);
        let inner = ThreadCacheInner {
            threads: ShardedMap::new(self.config.shards),
            gate: IntervalGate::new(self.config.eviction_interval),
            config: self.config,
            catalog: self.catalog,
            clock: self.clock,
            event_listener: self.event_listener,
            metrics: Metrics::default(),
            eviction: Mutex::new(()),
        };
        Ok(ThreadCache { inner: Arc::new(inner) })
    }
}

struct ThreadCacheInner {
    config: ThreadCacheConfig,
    threads: ShardedMap<ThreadDescriptor, ThreadStore>,
    catalog: Arc<dyn CatalogSnapshotSource>,
    clock: Arc<dyn Clock>,
    gate: IntervalGate,
    event_listener: Option<ThreadEventListener>,
    metrics: Metrics,
    /// Serializes eviction passes.
    eviction: Mutex<()>,
}

/// In-memory cache of threads and their posts with a global post budget.
///
/// Cloning is cheap, all clones share the same cache.
#[derive(Clone)]
pub struct ThreadCache {
    inner: Arc<ThreadCacheInner>,
}

impl Debug for ThreadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCache")
            .field("config", &self.inner.config)
            .field("threads", &self.inner.threads.len())
            .finish()
    }
}

impl ThreadCache {
    /// Settings the cache was built with.
    pub fn config(&self) -> &ThreadCacheConfig {
        &self.inner.config
    }

    /// Cache metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    fn get_or_create(&self, thread: &ThreadDescriptor, priority: Priority) -> Arc<ThreadStore> {
        let (store, created) = self.inner.threads.get_or_insert_with(thread, || {
            let now = self.inner.clock.now_millis();
            let last_access = match priority {
                Priority::Normal => now,
                Priority::Low => now.saturating_sub(duration_millis(LOW_PRIORITY_AGE)),
            };
            ThreadStore::new(thread.clone(), self.inner.clock.clone())
                .with_strict(self.inner.config.strict_invariants)
                .with_last_access(last_access)
        });
        if created {
            self.inner.metrics.thread_create.increase(1);
            tracing::trace!("[thread cache]: create store of {thread} with priority {priority:?}");
        }
        store
    }

    /// Run a write against the store of `thread`, retrying against a fresh store if eviction dropped it meanwhile.
    fn write<T>(
        &self,
        thread: &ThreadDescriptor,
        priority: Priority,
        mut f: impl FnMut(&ThreadStore) -> Result<T>,
    ) -> Result<T> {
        loop {
            let store = self.get_or_create(thread, priority);
            let result = f(&store);
            if let Err(Error::ThreadRetired(_)) = result {
                tracing::trace!("[thread cache]: store of {thread} was retired concurrently, retry");
                continue;
            }
            // A refused write must not leave a store behind that it created.
            self.remove_if_empty(thread, &store);
            if let Err(Error::InvariantViolation(_)) = result {
                self.inner.metrics.violation.increase(1);
            }
            return result;
        }
    }

    fn remove_if_empty(&self, thread: &ThreadDescriptor, store: &Arc<ThreadStore>) {
        if !store.has_at_least_one_post()
            && self
                .inner
                .threads
                .remove_if(thread, store, |store| store.retire_if_empty())
        {
            tracing::trace!("[thread cache]: drop empty store of {thread}");
        }
    }

    fn notify(&self, event: Event, thread: &ThreadDescriptor, posts: &[Arc<Post>]) {
        if posts.is_empty() {
            return;
        }
        if let Some(listener) = self.inner.event_listener.as_ref() {
            listener.on_leave(event, thread, posts);
        }
    }

    /// Store or update the original posts of a catalog.
    ///
    /// Does not mark the threads as freshly fetched. A violation in one thread does not stop the others.
    pub fn put_catalog_posts(&self, posts: Vec<Post>) -> Result<()> {
        let mut errs = vec![];
        for post in posts {
            let thread = post.thread().clone();
            let mut post = Some(post);
            if let Err(e) = self.write(&thread, Priority::Normal, |store| store.set_original_from(&mut post)) {
                errs.push(e);
            }
        }
        self.run_eviction_if_needed();
        Error::from_many(errs)
    }

    /// Insert or update posts of `thread`.
    ///
    /// Posts of other threads are skipped. Rolling threads are trimmed to the cap announced by their original post.
    pub fn put_thread_posts(
        &self,
        thread: &ThreadDescriptor,
        posts: Vec<Post>,
        options: PutOptions,
    ) -> Result<UpsertStats> {
        let mut posts = posts;
        if !options.store_in_memory {
            posts.retain(|post| post.is_original());
        }
        if posts.is_empty() {
            return Ok(UpsertStats::default());
        }

        let upsert = UpsertOptions {
            full_refresh: options.full_refresh && options.store_in_memory,
            touch: options.priority == Priority::Normal,
        };
        let stats = self.write(thread, options.priority, |store| {
            let stats = store.upsert_from(&mut posts, upsert)?;
            store.mark_updated();
            Ok(stats)
        })?;

        let metrics = &self.inner.metrics;
        metrics.post_insert.increase(stats.added as u64);
        metrics.post_update.increase(stats.updated as u64);
        metrics.violation.increase(stats.skipped.len() as u64);

        if let Some(cap) = self.rolling_cap(thread) {
            self.cleanup_rolling_thread(thread, cap);
        }

        self.run_eviction_if_needed();
        Ok(stats)
    }

    fn rolling_cap(&self, thread: &ThreadDescriptor) -> Option<usize> {
        let original = self.inner.threads.get(thread)?.peek_original_post()?;
        original.original.as_ref()?.rolling_cap
    }

    /// Store handle of `thread`. Do not keep it around, query again instead.
    pub fn get_thread(&self, thread: &ThreadDescriptor) -> Option<Arc<ThreadStore>> {
        let store = self.inner.threads.get(thread);
        self.inner.metrics.record_read(store.is_some());
        if let Some(store) = store.as_ref() {
            store.touch();
        }
        store
    }

    /// Post by identity.
    pub fn get_post(&self, post: &PostDescriptor) -> Option<Arc<Post>> {
        let found = self.inner.threads.get(&post.thread).and_then(|store| store.get(post));
        self.inner.metrics.record_read(found.is_some());
        found
    }

    /// Original post of `thread`, if cached.
    pub fn get_original_post(&self, thread: &ThreadDescriptor) -> Option<Arc<Post>> {
        let found = self
            .inner
            .threads
            .get(thread)
            .and_then(|store| store.get_original_post().ok());
        self.inner.metrics.record_read(found.is_some());
        found
    }

    /// Post `post_no` of a thread, or the original post of thread `post_no` listed by a catalog.
    pub fn get_post_in(&self, descriptor: &ChanDescriptor, post_no: u64) -> Option<Arc<Post>> {
        if post_no == 0 {
            return None;
        }
        match descriptor {
            ChanDescriptor::Thread(thread) => self.get_post(&thread.post(post_no)),
            ChanDescriptor::Catalog(catalog) => {
                let snapshot = self.inner.catalog.snapshot(catalog)?;
                let thread = snapshot.threads().iter().find(|thread| thread.thread_no == post_no)?;
                self.get_original_post(thread)
            }
        }
    }

    /// Original posts of the threads listed by the snapshot of `catalog`, in catalog order.
    ///
    /// Threads without a cached original post are left out. Catalog reads do not count as thread accesses.
    pub fn get_catalog(&self, catalog: &CatalogDescriptor) -> Vec<Arc<Post>> {
        let Some(snapshot) = self.inner.catalog.snapshot(catalog) else {
            return vec![];
        };
        self.get_catalog_posts(snapshot.threads())
    }

    /// Original posts of `threads`, in the given order. Not counted as thread accesses.
    pub fn get_catalog_posts(&self, threads: &[ThreadDescriptor]) -> Vec<Arc<Post>> {
        threads
            .iter()
            .filter_map(|thread| self.inner.threads.get(thread)?.peek_original_post())
            .collect()
    }

    /// All posts of `thread` in server order.
    pub fn get_thread_posts(&self, thread: &ThreadDescriptor) -> Vec<Arc<Post>> {
        self.inner
            .threads
            .get(thread)
            .map(|store| store.posts())
            .unwrap_or_default()
    }

    /// Post numbers cached for `thread`.
    pub fn get_thread_post_no_set(&self, thread: &ThreadDescriptor) -> BTreeSet<u64> {
        self.inner
            .threads
            .get(thread)
            .map(|store| store.post_no_set())
            .unwrap_or_default()
    }

    /// Number of posts cached for `thread`.
    pub fn get_thread_posts_count(&self, thread: &ThreadDescriptor) -> usize {
        self.inner
            .threads
            .get(thread)
            .map(|store| store.posts_count())
            .unwrap_or_default()
    }

    /// Last post of `thread` in server order.
    pub fn get_last_post(&self, thread: &ThreadDescriptor) -> Option<Arc<Post>> {
        self.inner.threads.get(thread)?.last_post()
    }

    /// Whether a thread holds at least one post, or any thread listed by a catalog does.
    pub fn contains(&self, descriptor: &ChanDescriptor) -> bool {
        let has_posts = |thread: &ThreadDescriptor| {
            self.inner
                .threads
                .get(thread)
                .is_some_and(|store| store.has_at_least_one_post())
        };
        match descriptor {
            ChanDescriptor::Thread(thread) => has_posts(thread),
            ChanDescriptor::Catalog(catalog) => self
                .inner
                .catalog
                .snapshot(catalog)
                .is_some_and(|snapshot| snapshot.threads().iter().any(has_posts)),
        }
    }

    /// How much of `thread` is held in memory.
    pub fn thread_state(&self, thread: &ThreadDescriptor) -> ThreadState {
        self.inner
            .threads
            .get(thread)
            .map_or(ThreadState::Absent, |store| store.state())
    }

    /// Number of cached thread stores, shells included.
    pub fn threads_count(&self) -> usize {
        self.inner.threads.len()
    }

    /// Sum of the post counts of all cached threads.
    pub fn total_cached_post_count(&self) -> usize {
        let total = self
            .inner
            .threads
            .snapshot()
            .iter()
            .map(|(_, store)| store.posts_count())
            .sum();
        self.inner.metrics.usage.absolute(total as u64);
        total
    }

    /// Set or clear the deleted flag of `thread`. Returns `false` if it is not cached.
    pub fn mark_thread_deleted(&self, thread: &ThreadDescriptor, deleted: bool) -> bool {
        self.update_thread_status(
            thread,
            StatusUpdate {
                deleted: Some(deleted),
                ..Default::default()
            },
        )
    }

    /// Apply a partial status update to `thread`. Returns `false` if it is not cached.
    pub fn update_thread_status(&self, thread: &ThreadDescriptor, update: StatusUpdate) -> bool {
        self.inner
            .threads
            .get(thread)
            .is_some_and(|store| store.update_status(update).is_ok())
    }

    /// Remove `thread` and all its posts. Returns `false` if it was not cached.
    pub fn delete_thread(&self, thread: &ThreadDescriptor) -> bool {
        let Some(store) = self.inner.threads.remove(thread) else {
            return false;
        };
        let posts = store.retire();
        self.inner.metrics.remove.increase(1);
        tracing::trace!("[thread cache]: remove {thread} with {} posts", posts.len());
        self.notify(Event::Remove, thread, &posts);
        true
    }

    /// Remove many threads. Returns how many were cached.
    pub fn delete_threads(&self, threads: &[ThreadDescriptor]) -> usize {
        threads.iter().filter(|thread| self.delete_thread(thread)).count()
    }

    /// Remove posts by identity. Original posts are refused.
    ///
    /// Returns the number of posts removed. Refused posts are reported after all threads were processed.
    pub fn delete_posts(&self, posts: &[PostDescriptor]) -> Result<usize> {
        let mut removed = 0;
        let mut errs = vec![];
        for (thread, descriptors) in posts.iter().cloned().into_group_map_by(|post| post.thread.clone()) {
            let Some(store) = self.inner.threads.get(&thread) else {
                continue;
            };
            let Ok(outcome) = store.delete(&descriptors) else {
                continue;
            };
            removed += outcome.posts.len();
            self.inner.metrics.violation.increase(outcome.skipped.len() as u64);
            errs.extend(outcome.skipped.into_iter().map(Error::from));
            self.notify(Event::Remove, &thread, &outcome.posts);
        }
        Error::from_many(errs).map(|_| removed)
    }

    /// Remove all threads as one step.
    pub fn clear_all(&self) {
        let entries = self.inner.threads.drain();
        tracing::debug!("[thread cache]: clear {} threads", entries.len());
        self.inner.gate.reset();
        self.inner.metrics.usage.absolute(0);
        for (thread, store) in entries {
            let posts = store.retire();
            self.notify(Event::Clear, &thread, &posts);
        }
    }

    /// Trim a rolling thread down to `cap` posts, oldest replies first. Returns the identities removed.
    pub fn cleanup_rolling_thread(&self, thread: &ThreadDescriptor, cap: usize) -> Vec<PostDescriptor> {
        let Some(store) = self.inner.threads.get(thread) else {
            return vec![];
        };
        let removed = store.trim_to(cap);
        if !removed.is_empty() {
            tracing::trace!("[thread cache]: trim {thread} to {cap} posts, {} removed", removed.len());
            self.inner.metrics.rolling_remove.increase(removed.len() as u64);
            self.notify(Event::Rolling, thread, &removed);
        }
        removed.iter().map(|post| post.descriptor.clone()).collect()
    }

    /// Remember the raw comment hash of a cached post.
    pub fn put_post_hash(&self, post: &PostDescriptor, hash: u64) {
        if let Some(store) = self.inner.threads.get(&post.thread) {
            store.put_post_hash(post.clone(), hash);
        }
    }

    /// Raw comment hash of a cached post.
    pub fn get_post_hash(&self, post: &PostDescriptor) -> Option<u64> {
        self.inner.threads.get(&post.thread)?.post_hash(post)
    }

    /// Whether `thread` was not refreshed within `min_interval`. Uncached threads always need an update.
    pub fn needs_update(&self, thread: &ThreadDescriptor, min_interval: Duration) -> bool {
        self.inner
            .threads
            .get(thread)
            .is_none_or(|store| store.needs_update(min_interval))
    }

    /// Run an eviction pass unless one evicted within the eviction interval.
    ///
    /// A pass that finds nothing to evict does not hold off the next one.
    pub fn run_eviction_if_needed(&self) -> Option<EvictionReport> {
        let now = self.inner.clock.now_millis();
        if !self.inner.gate.is_open(now) {
            return None;
        }
        let guard = self.inner.eviction.lock();
        // Another caller may have evicted while this one waited for the lock.
        if !self.inner.gate.is_open(now) {
            return None;
        }
        Some(self.evict_locked(guard, Some(now)))
    }

    /// Run an eviction pass now, regardless of the eviction interval.
    pub fn evict(&self) -> EvictionReport {
        self.evict_locked(self.inner.eviction.lock(), None)
    }

    fn evict_locked(&self, guard: MutexGuard<'_, ()>, gated_at: Option<u64>) -> EvictionReport {
        let start = Instant::now();

        let candidates = self
            .inner
            .threads
            .snapshot()
            .into_iter()
            .map(|(thread, store)| Candidate {
                last_access: store.last_access_time(),
                posts: store.posts_count(),
                item: (thread, store),
            })
            .collect_vec();
        let total: usize = candidates.iter().map(|c| c.posts).sum();

        let config = &self.inner.config;
        let (amount, victims) = match eviction::select(candidates, config.max_cache_size, config.immune_threads_count) {
            Selection::Skip(reason) => {
                tracing::trace!("[eviction]: skip pass with {total} posts cached, reason: {reason:?}");
                self.inner.metrics.usage.absolute(total as u64);
                return EvictionReport::skipped(reason, total);
            }
            Selection::Evict { amount, victims } => (amount, victims),
        };
        if let Some(now) = gated_at {
            self.inner.gate.commit(now);
        }

        let mut report = EvictionReport {
            total_before: total,
            amount_to_evict: amount,
            ..Default::default()
        };
        let mut released = Vec::with_capacity(victims.len());
        for (thread, store) in victims {
            let mut posts = store.cleanup();
            report.evicted_threads += 1;

            let visible = self.inner.catalog.is_visible(&thread);
            if Reclaim::decide(visible, store.state()) == Reclaim::Drop
                && self.inner.threads.remove_if(&thread, &store, |store| store.retire_if_shell())
            {
                posts.extend(store.retire());
                report.dropped_threads += 1;
            }

            report.evicted_posts += posts.len();
            released.push((thread, posts));
        }
        report.total_after = total.saturating_sub(report.evicted_posts);
        drop(guard);

        let metrics = &self.inner.metrics;
        metrics.evict_pass.increase(1);
        metrics.evict_thread.increase(report.evicted_threads as u64);
        metrics.evict_post.increase(report.evicted_posts as u64);
        metrics.evict_drop.increase(report.dropped_threads as u64);
        metrics.usage.absolute(report.total_after as u64);

        tracing::debug!(
            "[eviction]: evicted {} posts of {} threads ({} dropped), {} -> {} posts, target {}, elapsed: {:?}",
            report.evicted_posts,
            report.evicted_threads,
            report.dropped_threads,
            report.total_before,
            report.total_after,
            report.amount_to_evict,
            start.elapsed()
        );

        for (thread, posts) in released {
            self.notify(Event::Evict, &thread, &posts);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use postcache_common::clock::ManualClock;

    use super::*;
    use crate::{
        catalog::{CatalogSnapshot, CatalogSnapshotCache},
        descriptor::BoardDescriptor,
        error::Violation,
        eviction::SkipReason,
        post::OriginalPostMeta,
    };

    fn board() -> BoardDescriptor {
        BoardDescriptor::new("4chan", "g")
    }

    fn posts(thread: &ThreadDescriptor, count: u64) -> Vec<Post> {
        std::iter::once(Post::original(thread, "op"))
            .chain((1..count).map(|i| Post::reply(thread.post(thread.thread_no + i), format!("reply {i}"))))
            .collect()
    }

    struct Harness {
        clock: Arc<ManualClock>,
        catalogs: Arc<CatalogSnapshotCache>,
        cache: ThreadCache,
    }

    fn harness(max_cache_size: usize, immune_threads_count: usize) -> Harness {
        harness_with(max_cache_size, immune_threads_count, None)
    }

    fn harness_with(
        max_cache_size: usize,
        immune_threads_count: usize,
        event_listener: Option<ThreadEventListener>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let catalogs = Arc::new(CatalogSnapshotCache::new());
        let mut builder = ThreadCacheBuilder::new(catalogs.clone())
            .with_clock(clock.clone())
            .with_max_cache_size(max_cache_size)
            .with_immune_threads_count(immune_threads_count)
            .with_eviction_interval(Duration::from_secs(3600))
            .with_strict_invariants(false);
        if let Some(listener) = event_listener {
            builder = builder.with_event_listener(listener);
        }
        let cache = builder.build().unwrap();
        // Automatic passes stay off, tests evict explicitly unless they reopen the gate.
        cache.inner.gate.commit(clock.now_millis());
        Harness { clock, catalogs, cache }
    }

    /// Thread `i` of the board, numbered far enough apart for 1000 posts each.
    fn nth(i: u64) -> ThreadDescriptor {
        board().thread(1000 * (i + 1))
    }

    /// Put `threads` threads of `per_thread` posts, one second apart, so thread 0 is the least recently accessed.
    fn populate(h: &Harness, threads: u64, per_thread: u64) {
        for i in 0..threads {
            h.clock.advance(Duration::from_secs(1));
            let thread = nth(i);
            h.cache
                .put_thread_posts(&thread, posts(&thread, per_thread), PutOptions::default())
                .unwrap();
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, ThreadDescriptor, usize)>>,
    }

    impl EventListener for Recorder {
        type Key = ThreadDescriptor;
        type Value = Arc<Post>;

        fn on_leave(&self, reason: Event, key: &Self::Key, values: &[Self::Value]) {
            self.events.lock().push((reason, key.clone(), values.len()));
        }
    }

    #[test_log::test]
    fn test_put_and_get_thread() {
        let h = harness(1000, 25);
        let thread = board().thread(1);
        h.cache.put_catalog_posts(vec![Post::original(&thread, "P1")]).unwrap();
        h.cache
            .put_thread_posts(&thread, vec![Post::reply(thread.post(2), "P2")], PutOptions::default())
            .unwrap();

        let store = h.cache.get_thread(&thread).unwrap();
        let posts = store.posts();
        assert_eq!(posts.len(), 2);
        assert!(posts[0].is_original());
        assert_eq!(posts[1].descriptor, thread.post(2));

        assert_eq!(h.cache.get_post(&thread.post(2)).unwrap().comment, "P2");
        assert!(h.cache.get_post(&thread.post(3)).is_none());
        assert!(h.cache.get_thread(&board().thread(2)).is_none());
        assert_eq!(h.cache.threads_count(), 1);
        assert_eq!(h.cache.total_cached_post_count(), 2);
        assert_eq!(h.cache.thread_state(&thread), ThreadState::Populated { posts: 2 });

        let metrics = h.cache.metrics().snapshot();
        assert_eq!(metrics.thread_create, 1);
        assert_eq!(metrics.hit, 2);
        assert_eq!(metrics.miss, 2);
    }

    #[test_log::test]
    fn test_reads_are_idempotent() {
        let h = harness(1000, 25);
        let thread = board().thread(1);
        h.cache
            .put_thread_posts(&thread, posts(&thread, 5), PutOptions::default())
            .unwrap();
        let first = h.cache.get_thread_posts(&thread);
        let second = h.cache.get_thread_posts(&thread);
        assert_eq!(first, second);
        assert_eq!(h.cache.get_post(&thread.post(3)), h.cache.get_post(&thread.post(3)));
    }

    #[test_log::test]
    fn test_catalog_reads() {
        let h = harness(1000, 25);
        let threads = (1..=3).map(|no| board().thread(no)).collect_vec();
        h.cache
            .put_catalog_posts(threads.iter().map(|t| Post::original(t, "op")).collect())
            .unwrap();
        h.catalogs.store(CatalogSnapshot::new(
            board().catalog(),
            [threads[2].clone(), threads[0].clone(), board().thread(99)],
        ));

        let catalog = h.cache.get_catalog(&board().catalog());
        assert_eq!(
            catalog.iter().map(|p| p.descriptor.thread.thread_no).collect_vec(),
            vec![3, 1]
        );
        assert!(h.cache.get_catalog(&BoardDescriptor::new("4chan", "a").catalog()).is_empty());
        assert!(h.cache.contains(&ChanDescriptor::Catalog(board().catalog())));
        assert!(h.cache.contains(&threads[1].clone().into()));
        assert!(!h.cache.contains(&board().thread(99).into()));

        // Only threads listed by the snapshot resolve through the catalog.
        let op = h.cache.get_post_in(&board().catalog().into(), 3).unwrap();
        assert_eq!(op.descriptor, threads[2].original_post());
        assert!(h.cache.get_post_in(&board().catalog().into(), 2).is_none());
        assert!(h.cache.get_post_in(&board().catalog().into(), 99).is_none());
        assert!(h.cache.get_post_in(&threads[1].clone().into(), 2).is_some());
        assert!(h.cache.get_post_in(&threads[1].clone().into(), 3).is_none());
        assert!(h.cache.get_post_in(&board().catalog().into(), 0).is_none());

        // Catalog puts do not count as a fetch of the thread.
        assert!(h.cache.needs_update(&threads[0], Duration::from_secs(60)));
    }

    #[test_log::test]
    fn test_catalog_violation_does_not_stop_other_threads() {
        let h = harness(1000, 25);
        let good = board().thread(1);
        let bad = board().thread(2);
        let err = h
            .cache
            .put_catalog_posts(vec![Post::reply(bad.post(3), "not an op"), Post::original(&good, "op")])
            .unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::NotOriginalPost(_))));
        assert!(h.cache.get_original_post(&good).is_some());
        assert_eq!(h.cache.metrics().snapshot().violation, 1);

        // The refused write leaves no store behind.
        assert!(!h.cache.contains(&bad.clone().into()));
        assert_eq!(h.cache.thread_state(&bad), ThreadState::Absent);
        assert_eq!(h.cache.threads_count(), 1);
        assert_eq!(h.cache.total_cached_post_count(), 1);

        let stats = h
            .cache
            .put_thread_posts(&bad, vec![Post::reply(good.post(5), "foreign")], PutOptions::default())
            .unwrap();
        assert_eq!(stats.skipped.len(), 1);
        assert!(!h.cache.contains(&bad.clone().into()));
        assert_eq!(h.cache.threads_count(), 1);

        // A store holding a post is kept.
        h.cache
            .put_thread_posts(&bad, vec![Post::original(&bad, "op")], PutOptions::default())
            .unwrap();
        assert!(h.cache.contains(&bad.into()));
        assert_eq!(h.cache.threads_count(), 2);
    }

    #[test_log::test]
    fn test_put_options() {
        let h = harness(1000, 25);
        let thread = board().thread(10);
        let stats = h
            .cache
            .put_thread_posts(
                &thread,
                posts(&thread, 5),
                PutOptions {
                    store_in_memory: false,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(stats.added, 1);
        assert_eq!(h.cache.thread_state(&thread), ThreadState::Shell);

        h.cache
            .put_thread_posts(&thread, posts(&thread, 5), PutOptions::default())
            .unwrap();
        assert_eq!(h.cache.get_thread_posts_count(&thread), 5);
        assert!(!h.cache.needs_update(&thread, Duration::from_secs(60)));

        let mut refreshed = posts(&thread, 5);
        refreshed.remove(2);
        let stats = h
            .cache
            .put_thread_posts(
                &thread,
                refreshed,
                PutOptions {
                    full_refresh: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(stats.marked_deleted, 1);
        assert!(h.cache.get_post(&thread.post(12)).unwrap().deleted);
        assert_eq!(
            h.cache.get_thread_post_no_set(&thread),
            BTreeSet::from([10, 11, 12, 13, 14])
        );
        assert_eq!(h.cache.get_last_post(&thread).unwrap().descriptor.post_no, 14);
    }

    #[test_log::test]
    fn test_rolling_thread_is_trimmed_on_put() {
        let recorder = Arc::new(Recorder::default());
        let h = harness_with(1000, 25, Some(recorder.clone() as ThreadEventListener));
        let thread = board().thread(1);
        let mut posts = posts(&thread, 10);
        posts[0] = Post::original(&thread, "sticky").with_original_meta(OriginalPostMeta {
            sticky: true,
            rolling_cap: Some(5),
            ..Default::default()
        });
        h.cache.put_thread_posts(&thread, posts, PutOptions::default()).unwrap();

        let nos = h.cache.get_thread_post_no_set(&thread);
        assert_eq!(nos, BTreeSet::from([1, 7, 8, 9, 10]));
        assert_eq!(h.cache.metrics().snapshot().rolling_remove, 5);
        assert_eq!(recorder.events.lock().as_slice(), &[(Event::Rolling, thread.clone(), 5)]);

        assert!(h.cache.cleanup_rolling_thread(&thread, 5).is_empty());
        let removed = h.cache.cleanup_rolling_thread(&thread, 3);
        assert_eq!(removed, vec![thread.post(7), thread.post(8)]);
    }

    #[test_log::test]
    fn test_eviction_releases_oldest_threads() {
        let h = harness(100, 8);
        populate(&h, 10, 20);
        assert_eq!(h.cache.total_cached_post_count(), 200);

        let report = h.cache.evict();
        assert_eq!(report.skipped, None);
        assert_eq!(report.total_before, 200);
        assert_eq!(report.amount_to_evict, 150);
        assert_eq!(report.evicted_threads, 2);
        assert_eq!(report.dropped_threads, 2);
        assert_eq!(report.evicted_posts, 40);
        assert_eq!(report.total_after, 160);
        assert_eq!(h.cache.total_cached_post_count(), 160);

        // Every thread outside the immune set is gone, the immune ones are untouched.
        for i in 0..2 {
            assert_eq!(h.cache.thread_state(&nth(i)), ThreadState::Absent);
        }
        for i in 2..10 {
            assert_eq!(h.cache.get_thread_posts_count(&nth(i)), 20);
        }

        let metrics = h.cache.metrics().snapshot();
        assert_eq!(metrics.evict_pass, 1);
        assert_eq!(metrics.evict_thread, 2);
        assert_eq!(metrics.evict_drop, 2);
        assert_eq!(metrics.usage, 160);
    }

    #[test_log::test]
    fn test_eviction_converges_within_budget() {
        let h = harness(100, 2);
        populate(&h, 10, 20);
        let report = h.cache.evict();
        // The 8 oldest threads are released to get down to half the budget.
        assert_eq!(report.evicted_threads, 8);
        assert!(report.total_after <= 100);
        assert_eq!(h.cache.total_cached_post_count(), report.total_after);
        assert_eq!(h.cache.threads_count(), 2);
    }

    #[test_log::test]
    fn test_catalog_visible_threads_keep_a_shell() {
        let h = harness(100, 8);
        populate(&h, 10, 20);
        let visible = nth(0);
        h.catalogs
            .store(CatalogSnapshot::new(board().catalog(), [visible.clone()]));

        let report = h.cache.evict();
        assert_eq!(report.evicted_threads, 2);
        assert_eq!(report.dropped_threads, 1);

        let store = h.cache.get_thread(&visible).unwrap();
        assert!(store.posts_count() <= 1);
        assert_eq!(h.cache.thread_state(&visible), ThreadState::Shell);
        assert!(h.cache.get_original_post(&visible).is_some());
        assert_eq!(h.cache.get_catalog(&board().catalog()).len(), 1);
        assert_eq!(h.cache.thread_state(&nth(1)), ThreadState::Absent);
    }

    #[test_log::test]
    fn test_eviction_skips() {
        let h = harness(100, 8);
        populate(&h, 4, 20);
        assert_eq!(h.cache.evict().skipped, Some(SkipReason::WithinBudget));

        populate(&h, 8, 20);
        // Threads 0..4 are updated in place, so 8 populated threads hold 160 posts.
        assert_eq!(h.cache.threads_count(), 8);
        assert_eq!(h.cache.evict().skipped, Some(SkipReason::WorkingSetProtected));
        assert_eq!(h.cache.total_cached_post_count(), 160);
    }

    #[test_log::test]
    fn test_low_priority_threads_are_evicted_first() {
        let h = harness(30, 1);
        let preview = board().thread(1);
        let regular = board().thread(100);

        h.cache
            .put_thread_posts(&regular, posts(&regular, 20), PutOptions::default())
            .unwrap();
        h.clock.advance(Duration::from_secs(1));
        h.cache
            .put_thread_posts(
                &preview,
                posts(&preview, 20),
                PutOptions {
                    priority: Priority::Low,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(
            h.cache.get_thread(&regular).map(|s| s.last_access_time())
                > h.cache.inner.threads.get(&preview).map(|s| s.last_access_time())
        );

        let report = h.cache.evict();
        assert_eq!(report.evicted_threads, 1);
        assert_eq!(h.cache.thread_state(&preview), ThreadState::Absent);
        assert_eq!(h.cache.get_thread_posts_count(&regular), 20);
    }

    #[test_log::test]
    fn test_eviction_interval() {
        let h = harness(100, 1);
        h.cache.inner.gate.reset();

        // Passes with nothing to evict do not hold off the next one.
        populate(&h, 1, 5);
        let report = h.cache.run_eviction_if_needed().unwrap();
        assert_eq!(report.skipped, Some(SkipReason::WithinBudget));
        assert!(h.cache.run_eviction_if_needed().is_some());

        h.clock.advance(Duration::from_secs(1));
        h.cache
            .put_thread_posts(&nth(1), posts(&nth(1), 150), PutOptions::default())
            .unwrap();
        assert_eq!(h.cache.metrics().snapshot().evict_pass, 1);
        assert_eq!(h.cache.thread_state(&nth(0)), ThreadState::Absent);
        assert_eq!(h.cache.total_cached_post_count(), 150);

        // The pass that evicted closes the gate for one interval.
        h.clock.advance(Duration::from_secs(1));
        h.cache
            .put_thread_posts(&nth(2), posts(&nth(2), 150), PutOptions::default())
            .unwrap();
        assert!(h.cache.run_eviction_if_needed().is_none());
        assert_eq!(h.cache.metrics().snapshot().evict_pass, 1);
        assert_eq!(h.cache.total_cached_post_count(), 300);

        h.clock.advance(Duration::from_secs(3600));
        let report = h.cache.run_eviction_if_needed().unwrap();
        assert_eq!(report.skipped, None);
        assert_eq!(report.evicted_posts, 150);
        assert_eq!(h.cache.thread_state(&nth(1)), ThreadState::Absent);
        assert!(h.cache.run_eviction_if_needed().is_none());

        h.cache.clear_all();
        assert!(h.cache.run_eviction_if_needed().is_some());
    }

    #[test_log::test]
    fn test_write_between_cleanup_and_removal_keeps_store() {
        let h = harness(100, 1);
        let thread = nth(0);
        let store = h.cache.get_or_create(&thread, Priority::Normal);
        store.upsert_many(posts(&thread, 5)).unwrap();

        assert_eq!(store.cleanup().len(), 4);
        store.upsert_many(vec![Post::reply(thread.post(1100), "late")]).unwrap();
        assert!(!h.cache.inner.threads.remove_if(&thread, &store, |store| store.retire_if_shell()));
        assert_eq!(h.cache.thread_state(&thread), ThreadState::Populated { posts: 2 });
        assert!(store.upsert_many(vec![Post::reply(thread.post(1101), "later")]).is_ok());

        assert_eq!(store.cleanup().len(), 2);
        assert!(h.cache.inner.threads.remove_if(&thread, &store, |store| store.retire_if_shell()));
        assert_eq!(h.cache.thread_state(&thread), ThreadState::Absent);
        assert!(matches!(
            store.upsert_many(vec![Post::reply(thread.post(1102), "too late")]),
            Err(Error::ThreadRetired(_))
        ));
    }

    #[test_log::test]
    fn test_write_retries_after_eviction_drops_store() {
        let h = harness(100, 1);
        let old = nth(0);
        let hot = nth(1);
        h.clock.advance(Duration::from_secs(1));
        h.cache.get_or_create(&old, Priority::Normal).upsert_many(posts(&old, 5)).unwrap();
        h.clock.advance(Duration::from_secs(1));
        h.cache.get_or_create(&hot, Priority::Normal).upsert_many(posts(&hot, 150)).unwrap();

        // Eviction drops the store between the lookup and the write.
        let mut attempts = 0;
        let mut late = vec![Post::reply(old.post(1050), "late")];
        let stats = h
            .cache
            .write(&old, Priority::Normal, |store| {
                attempts += 1;
                if attempts == 1 {
                    assert_eq!(h.cache.evict().dropped_threads, 1);
                }
                store.upsert_from(&mut late, UpsertOptions::default())
            })
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(stats.added, 1);
        assert_eq!(h.cache.get_thread_post_no_set(&old), BTreeSet::from([1050]));
        assert_eq!(h.cache.metrics().snapshot().thread_create, 3);

        // A handle retired by eviction refuses writes, the cache recreates the thread.
        let stale = h.cache.inner.threads.get(&old).unwrap();
        stale.upsert_many(posts(&old, 3)).unwrap();
        h.clock.advance(Duration::from_secs(1));
        h.cache.get_thread(&hot);
        assert_eq!(h.cache.evict().dropped_threads, 1);
        assert!(matches!(
            stale.upsert_many(vec![Post::reply(old.post(1051), "stale")]),
            Err(Error::ThreadRetired(_))
        ));
        h.cache
            .put_thread_posts(&old, posts(&old, 3), PutOptions::default())
            .unwrap();
        assert_eq!(h.cache.get_thread_posts_count(&old), 3);
    }

    #[test_log::test]
    fn test_explicit_removal() {
        let recorder = Arc::new(Recorder::default());
        let h = harness_with(1000, 25, Some(recorder.clone() as ThreadEventListener));
        populate(&h, 3, 5);

        let err = h
            .cache
            .delete_posts(&[nth(0).post(1001), nth(0).original_post(), nth(1).post(2002)])
            .unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::DeleteOriginalPost(_))));
        assert_eq!(h.cache.get_thread_posts_count(&nth(0)), 4);
        assert_eq!(h.cache.get_thread_posts_count(&nth(1)), 4);
        assert_eq!(h.cache.delete_posts(&[nth(2).post(3004)]).unwrap(), 1);

        assert!(h.cache.delete_thread(&nth(0)));
        assert!(!h.cache.delete_thread(&nth(0)));
        assert_eq!(h.cache.thread_state(&nth(0)), ThreadState::Absent);
        assert_eq!(h.cache.delete_threads(&[nth(0), nth(1)]), 1);

        h.cache.clear_all();
        assert_eq!(h.cache.threads_count(), 0);
        assert_eq!(h.cache.total_cached_post_count(), 0);

        let events = recorder.events.lock().iter().map(|(e, _, n)| (*e, *n)).collect_vec();
        assert_eq!(
            events,
            vec![
                (Event::Remove, 1),
                (Event::Remove, 1),
                (Event::Remove, 1),
                (Event::Remove, 4),
                (Event::Remove, 4),
                (Event::Clear, 4),
            ]
        );
    }

    #[test_log::test]
    fn test_deleted_thread_is_recreated_on_put() {
        let h = harness(1000, 25);
        let thread = board().thread(1);
        h.cache
            .put_thread_posts(&thread, posts(&thread, 3), PutOptions::default())
            .unwrap();
        let stale = h.cache.get_thread(&thread).unwrap();
        h.cache.delete_thread(&thread);

        assert!(matches!(
            stale.upsert_many(vec![Post::reply(thread.post(9), "late")]),
            Err(Error::ThreadRetired(_))
        ));
        h.cache
            .put_thread_posts(&thread, posts(&thread, 2), PutOptions::default())
            .unwrap();
        assert_eq!(h.cache.get_thread_posts_count(&thread), 2);
        assert_eq!(h.cache.metrics().snapshot().thread_create, 2);
    }

    #[test_log::test]
    fn test_status_and_hashes() {
        let h = harness(1000, 25);
        let thread = board().thread(1);
        assert!(!h.cache.mark_thread_deleted(&thread, true));
        h.cache
            .put_thread_posts(&thread, posts(&thread, 2), PutOptions::default())
            .unwrap();
        assert!(h.cache.mark_thread_deleted(&thread, true));
        assert!(h.cache.update_thread_status(
            &thread,
            StatusUpdate {
                closed: Some(true),
                ..Default::default()
            }
        ));
        let store = h.cache.get_thread(&thread).unwrap();
        assert!(store.status().deleted && store.status().closed);
        assert!(!store.can_update());

        h.cache.put_post_hash(&thread.post(2), 42);
        assert_eq!(h.cache.get_post_hash(&thread.post(2)), Some(42));
        assert_eq!(h.cache.get_post_hash(&thread.post(3)), None);
    }

    #[test_log::test]
    fn test_build_rejects_bad_config() {
        let catalogs = Arc::new(CatalogSnapshotCache::new());
        assert!(matches!(
            ThreadCacheBuilder::new(catalogs).with_shards(0).build(),
            Err(Error::ConfigError(_))
        ));
    }
}
