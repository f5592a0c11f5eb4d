//! Short-window cache flagging accidental re-scans.

use std::collections::HashMap;
use std::time::Duration;

use crate::sync::SharedClock;

/// Default dedup window
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Answer from [`DedupCache::check_duplicate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    /// Last recorded scan of the code, even when outside the window
    pub last_scanned_at: Option<i64>,
}

/// Remembers when each code was last accepted.
///
/// Advisory only: a duplicate is a warning for the user, never a reason to
/// refuse the scan.
pub struct DedupCache {
    window: Duration,
    clock: SharedClock,
    last_scanned: HashMap<String, i64>,
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DedupCache")
            .field("window", &self.window)
            .field("entries", &self.last_scanned.len())
            .finish_non_exhaustive()
    }
}

impl DedupCache {
    pub fn new(window: Duration, clock: SharedClock) -> Self {
        Self {
            window,
            clock,
            last_scanned: HashMap::new(),
        }
    }

    pub fn check_duplicate(&self, code: &str) -> DuplicateCheck {
        let last_scanned_at = self.last_scanned.get(code.trim()).copied();
        let now = self.clock.now_ms();
        DuplicateCheck {
            is_duplicate: last_scanned_at.is_some_and(|at| self.within_window(at, now)),
            last_scanned_at,
        }
    }

    /// Set the last scan time of `code` to now, pruning expired entries.
    pub fn record_scan(&mut self, code: &str) {
        let code = code.trim();
        if code.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let window = self.window;
        self.last_scanned
            .retain(|_, at| Self::elapsed_within(window, *at, now));
        self.last_scanned.insert(code.to_string(), now);
    }

    pub fn len(&self) -> usize {
        self.last_scanned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_scanned.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_scanned.clear();
    }

    fn within_window(&self, at: i64, now: i64) -> bool {
        Self::elapsed_within(self.window, at, now)
    }

    fn elapsed_within(window: Duration, at: i64, now: i64) -> bool {
        let window = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(at) < window
    }
}
