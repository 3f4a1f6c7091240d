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

/// Reason an entry, or a part of it, leaves the in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Released by an eviction pass.
    Evict,
    /// Explicit removal.
    Remove,
    /// Whole cache reset.
    Clear,
    /// Trimmed by a rolling cap.
    Rolling,
}

impl Event {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Evict => "evict",
            Event::Remove => "remove",
            Event::Clear => "clear",
            Event::Rolling => "rolling",
        }
    }
}

/// Trait for the customized event listener.
///
/// Listeners are invoked after the entry has been released and never while a cache lock is held, so they may call
/// back into the cache.
pub trait EventListener: Send + Sync + 'static {
    /// Associated key type.
    type Key;
    /// Associated value type.
    type Value;

    /// Called when values of `key` leave the in-memory cache with the reason.
    #[expect(unused_variables)]
    fn on_leave(&self, reason: Event, key: &Self::Key, values: &[Self::Value]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl EventListener for Noop {
        type Key = u64;
        type Value = u64;
    }

    #[test]
    fn test_default_listener_is_noop() {
        Noop.on_leave(Event::Evict, &1, &[1, 2, 3]);
        assert_eq!(Event::Rolling.as_str(), "rolling");
    }
}
