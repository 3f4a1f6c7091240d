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

use std::time::Duration;

use postcache_common::assert::strict_by_default;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings of a [`ThreadCache`](crate::ThreadCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadCacheConfig {
    /// Post budget over all cached threads.
    pub max_cache_size: usize,
    /// Number of most recently accessed threads that eviction never selects.
    pub immune_threads_count: usize,
    /// Minimal interval between two automatic eviction passes.
    pub eviction_interval: Duration,
    /// Shard count of the thread map.
    pub shards: usize,
    /// Panic on invariant violations instead of logging and skipping the offending write.
    pub strict_invariants: bool,
}

impl ThreadCacheConfig {
    /// Default post budget.
    pub const DEFAULT_MAX_CACHE_SIZE: usize = 100_000;
    /// Default number of immune threads.
    pub const DEFAULT_IMMUNE_THREADS_COUNT: usize = 25;
    /// Default eviction interval.
    pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(15);
    /// Default shard count.
    pub const DEFAULT_SHARDS: usize = 16;

    /// Check the settings.
    pub fn validate(&self) -> Result<()> {
        let mut errs = vec![];
        if self.max_cache_size == 0 {
            errs.push(Error::ConfigError("max_cache_size must be positive".to_string()));
        }
        if self.shards == 0 {
            errs.push(Error::ConfigError("shards must be positive".to_string()));
        }
        Error::from_many(errs)
    }
}

impl Default for ThreadCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: Self::DEFAULT_MAX_CACHE_SIZE,
            immune_threads_count: Self::DEFAULT_IMMUNE_THREADS_COUNT,
            eviction_interval: Self::DEFAULT_EVICTION_INTERVAL,
            shards: Self::DEFAULT_SHARDS,
            strict_invariants: strict_by_default(),
        }
    }
}
