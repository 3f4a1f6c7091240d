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
    fmt::Debug,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of wall clock time in milliseconds since the unix epoch.
///
/// Access times of cached threads and the eviction interval are measured with it. Tests replace it with
/// [`ManualClock`] to get deterministic orderings.
pub trait Clock: Send + Sync + Debug + 'static {
    /// Current time in milliseconds since the unix epoch.
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Milliseconds of the given duration, saturated to `u64`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(any(test, feature = "test_utils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test_utils"))]
mod manual {
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    };

    use super::{duration_millis, Clock};

    /// A clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        now: AtomicU64,
    }

    impl ManualClock {
        /// Create a manual clock starting at `start` milliseconds.
        pub fn new(start: u64) -> Self {
            Self {
                now: AtomicU64::new(start),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, duration: Duration) {
            self.now.fetch_add(duration_millis(duration), Ordering::SeqCst);
        }

        /// Set the clock to an absolute value.
        pub fn set(&self, millis: u64) {
            self.now.store(millis, Ordering::SeqCst);
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            // Far enough from the epoch that "one year ago" does not saturate.
            Self::new(10 * 365 * 24 * 60 * 60 * 1000)
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}
