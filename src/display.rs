//! # Display Update Tracker
//!
//! Gives repeated display output (a progress bar re-rendered many times, say)
//! a stable slot identity so observers see one slot updated in place instead
//! of many independent displays.
//!
//! Identity comes from the [`DisplayKey`] the engine supplies, never from the
//! rendered content. Slot ids are assigned monotonically and never reused.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Engine-chosen identity of a logical display, e.g. `progress-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayKey(String);

impl DisplayKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u64);

impl SlotId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct DisplayTracker {
    slots: DashMap<DisplayKey, SlotId>,
    next_slot: AtomicU64,
}

impl DisplayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `key` and whether it was minted by this call.
    pub fn track(&self, key: &DisplayKey) -> (SlotId, bool) {
        if let Some(slot) = self.slots.get(key) {
            return (*slot, false);
        }
        let mut is_new = false;
        let slot = *self.slots.entry(key.clone()).or_insert_with(|| {
            is_new = true;
            self.mint()
        });
        trace!("display {} tracked as {} (new: {})", key, slot, is_new);
        (slot, is_new)
    }

    /// A fresh slot for a display that will never be updated.
    pub fn mint(&self) -> SlotId {
        SlotId(self.next_slot.fetch_add(1, Ordering::SeqCst))
    }

    /// Forgets `key` after its completing update. The slot id itself stays
    /// retired; a later display with the same key gets a new slot.
    pub fn retire(&self, key: &DisplayKey) -> Option<SlotId> {
        self.slots.remove(key).map(|(_, slot)| slot)
    }

    pub fn is_tracked(&self, key: &DisplayKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_track_is_new_then_reused() {
        let tracker = DisplayTracker::new();
        let key = DisplayKey::new("progress-1");

        let (first, is_new) = tracker.track(&key);
        assert!(is_new);

        for _ in 0..5 {
            let (slot, is_new) = tracker.track(&key);
            assert!(!is_new);
            assert_eq!(slot, first);
        }
    }

    #[test]
    fn test_distinct_keys_get_distinct_slots() {
        let tracker = DisplayTracker::new();
        let (a, _) = tracker.track(&DisplayKey::new("progress-1"));
        let (b, _) = tracker.track(&DisplayKey::new("progress-2"));
        let c = tracker.mint();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_retired_key_gets_fresh_slot() {
        let tracker = DisplayTracker::new();
        let key = DisplayKey::new("progress-1");
        let (first, _) = tracker.track(&key);

        assert_eq!(tracker.retire(&key), Some(first));
        assert!(!tracker.is_tracked(&key));

        let (second, is_new) = tracker.track(&key);
        assert!(is_new);
        assert!(second > first);
    }
}
