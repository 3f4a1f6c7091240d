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

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increase the counter by `val`.
    pub fn increase(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    /// Set an absolute value.
    pub fn absolute(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Thread cache metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    /// thread stores created
    pub thread_create: Counter,
    /// posts inserted without replaces
    pub post_insert: Counter,
    /// posts merged into an existing post with the same identity
    pub post_update: Counter,

    /// reads that found data
    pub hit: Counter,
    /// reads that found nothing
    pub miss: Counter,

    /// threads removed explicitly
    pub remove: Counter,

    /// eviction passes that released anything
    pub evict_pass: Counter,
    /// threads whose posts were released by eviction
    pub evict_thread: Counter,
    /// posts released by eviction
    pub evict_post: Counter,
    /// evicted threads dropped from the map entirely
    pub evict_drop: Counter,

    /// posts trimmed by rolling caps
    pub rolling_remove: Counter,

    /// invariant violations that were healed
    pub violation: Counter,

    /// cached posts as of the last eviction check
    pub usage: Gauge,
}

impl Metrics {
    /// Record a read outcome.
    pub fn record_read(&self, hit: bool) {
        if hit {
            self.hit.increase(1);
        } else {
            self.miss.increase(1);
        }
    }

    /// Take a point-in-time copy of all values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            thread_create: self.thread_create.get(),
            post_insert: self.post_insert.get(),
            post_update: self.post_update.get(),
            hit: self.hit.get(),
            miss: self.miss.get(),
            remove: self.remove.get(),
            evict_pass: self.evict_pass.get(),
            evict_thread: self.evict_thread.get(),
            evict_post: self.evict_post.get(),
            evict_drop: self.evict_drop.get(),
            rolling_remove: self.rolling_remove.get(),
            violation: self.violation.get(),
            usage: self.usage.get(),
        }
    }
}

/// Plain copy of [`Metrics`].
#[expect(missing_docs)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub thread_create: u64,
    pub post_insert: u64,
    pub post_update: u64,
    pub hit: u64,
    pub miss: u64,
    pub remove: u64,
    pub evict_pass: u64,
    pub evict_thread: u64,
    pub evict_post: u64,
    pub evict_drop: u64,
    pub rolling_remove: u64,
    pub violation: u64,
    pub usage: u64,
}

impl MetricsSnapshot {
    /// Hit ratio of reads, `0.0` without reads.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit + self.miss;
        if total == 0 {
            return 0.0;
        }
        self.hit as f64 / total as f64
    }
}
