// src/trajectory/query.rs
//! Time-domain lookups on a finished profile.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::ProfileStep;

/// Hint for the profile segment the last query landed in.
///
/// Sequential queries usually hit the same or the following segment, so
/// those are tried before falling back to a binary search. The hint is
/// always checked against the profile before use, which keeps concurrent
/// readers correct and makes results independent of the cache.
#[derive(Debug)]
pub struct SegmentCache {
    hint: AtomicUsize,
    enabled: bool,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self {
            hint: AtomicUsize::new(0),
            enabled: true,
        }
    }

    pub fn reset(&self) {
        self.hint.store(0, Ordering::Relaxed);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.reset();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Index `k` with `profile[k].time <= t < profile[k + 1].time`.
    ///
    /// The caller guarantees `profile[0].time <= t < profile[last].time`.
    pub fn locate(&self, profile: &[ProfileStep], t: f64) -> usize {
        let contains = |k: usize| k + 1 < profile.len() && profile[k].time <= t && t < profile[k + 1].time;
        if self.enabled {
            let hint = self.hint.load(Ordering::Relaxed);
            if contains(hint) {
                return hint;
            }
            if contains(hint + 1) {
                self.hint.store(hint + 1, Ordering::Relaxed);
                return hint + 1;
            }
        }
        let k = profile
            .partition_point(|step| step.time <= t)
            .saturating_sub(1)
            .min(profile.len().saturating_sub(2));
        if self.enabled {
            self.hint.store(k, Ordering::Relaxed);
        }
        k
    }
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SegmentCache {
    fn clone(&self) -> Self {
        Self {
            hint: AtomicUsize::new(self.hint.load(Ordering::Relaxed)),
            enabled: self.enabled,
        }
    }
}
