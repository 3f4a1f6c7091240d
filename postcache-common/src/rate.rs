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
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::clock::duration_millis;

/// A gate that opens at most once per interval.
///
/// Used to bound the overhead of periodic maintenance that is triggered from hot paths. The first call after
/// construction or [`IntervalGate::reset`] always finds it open.
#[derive(Debug)]
pub struct IntervalGate {
    interval: u64,
    /// Last commit time in milliseconds, `0` means never.
    last: AtomicU64,
}

impl IntervalGate {
    /// Create a gate that opens at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: duration_millis(interval),
            last: AtomicU64::new(0),
        }
    }

    /// Whether the interval has elapsed at time `now` (milliseconds) since the last commit.
    pub fn is_open(&self, now: u64) -> bool {
        let last = self.last.load(Ordering::Acquire);
        last == 0 || now.saturating_sub(last) >= self.interval
    }

    /// Close the gate for one interval starting at `now` (milliseconds).
    ///
    /// Commit only once the gated work actually ran.
    pub fn commit(&self, now: u64) {
        self.last.fetch_max(now.max(1), Ordering::AcqRel);
    }

    /// Forget the last commit, the gate is open again.
    pub fn reset(&self) {
        self.last.store(0, Ordering::Release);
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_gate() {
        let gate = IntervalGate::new(Duration::from_secs(15));
        assert!(gate.is_open(1_000));
        // Checking alone never closes the gate.
        assert!(gate.is_open(1_000));

        gate.commit(1_000);
        assert!(!gate.is_open(1_000));
        assert!(!gate.is_open(15_999));
        assert!(gate.is_open(16_000));

        gate.commit(16_000);
        // An older commit does not reopen it.
        gate.commit(2_000);
        assert!(!gate.is_open(16_001));

        gate.reset();
        assert!(gate.is_open(16_002));
    }
}
