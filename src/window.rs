//! Rolling condition windows
//!
//! A condition window tracks `(ts, above_threshold)` entries for a single
//! posture channel and answers the sustained-condition questions the state
//! machine asks:
//! - `above_fraction`: share of the window spent above threshold
//! - `cumulative_above_sec`: total time above threshold
//! - `max_gap_sec`: longest contiguous run below threshold
//!
//! Stats are duration-weighted: each entry spans to the next entry, or to
//! the query time for the last one, clipped to the window. This makes the
//! numbers independent of sampling rate and is what lets frame skipping
//! extend the last entry's span instead of punching holes in the evidence.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Statistics over a condition window at a query time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Fraction of the window spent above threshold, in `[0,1]`
    pub above_fraction: f64,
    /// Total seconds above threshold within the window
    pub cumulative_above_sec: f64,
    /// Longest contiguous below-threshold run within the window
    pub max_gap_sec: f64,
    /// Number of entries currently held
    pub samples: usize,
}

/// Bounded time-indexed sequence of boolean observations for one channel.
///
/// Timestamps are strictly monotonic; out-of-order inserts are dropped.
/// Entries whose span has fully left the window are evicted on insert; an
/// entry straddling the window start is kept and clipped at query time.
#[derive(Debug, Clone)]
pub struct ConditionWindow {
    window_sec: f64,
    entries: VecDeque<(f64, bool)>,
}

impl ConditionWindow {
    pub fn new(window_sec: f64) -> Self {
        Self {
            window_sec,
            entries: VecDeque::new(),
        }
    }

    pub fn window_sec(&self) -> f64 {
        self.window_sec
    }

    /// Record an observation at `ts`.
    pub fn push(&mut self, ts: f64, above: bool) {
        if let Some(&(last_ts, _)) = self.entries.back() {
            if ts < last_ts {
                return;
            }
        }
        self.entries.push_back((ts, above));

        let cutoff = ts - self.window_sec;
        while self.entries.len() >= 2 {
            // Safe: len >= 2 checked above
            let second_ts = self.entries[1].0;
            if second_ts <= cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop all entries. Called on every state transition so the condition
    /// that just fired cannot immediately re-fire.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seconds of observation currently covered, capped at the window size.
    /// Zero when empty.
    pub fn span(&self, now: f64) -> f64 {
        match self.entries.front() {
            Some(&(first_ts, _)) => (now - first_ts).clamp(0.0, self.window_sec),
            None => 0.0,
        }
    }

    /// Compute duration-weighted stats as of `now`.
    pub fn stats(&self, now: f64) -> WindowStats {
        if self.entries.is_empty() {
            return WindowStats::default();
        }

        let window_start = now - self.window_sec;
        let mut above_time = 0.0;
        let mut max_gap = 0.0_f64;
        let mut current_gap = 0.0;

        let n = self.entries.len();
        for i in 0..n {
            let (span_start, above) = self.entries[i];
            let span_end = if i + 1 < n { self.entries[i + 1].0 } else { now };

            let clipped_start = span_start.max(window_start);
            let clipped_end = span_end.min(now);
            let duration = (clipped_end - clipped_start).max(0.0);
            if duration <= 0.0 {
                continue;
            }

            if above {
                above_time += duration;
                current_gap = 0.0;
            } else {
                current_gap += duration;
                max_gap = max_gap.max(current_gap);
            }
        }

        WindowStats {
            above_fraction: (above_time / self.window_sec).clamp(0.0, 1.0),
            cumulative_above_sec: above_time.min(self.window_sec),
            max_gap_sec: max_gap,
            samples: n,
        }
    }
}
