use std::fmt;

use chrono::DateTime;

/// A half-open range of microsecond timestamps, `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBlock {
    start: i64,
    stop: i64,
}

impl TimeBlock {
    /// Covers every representable timestamp. Used for the root of a tree and
    /// for directories whose names carry no index.
    pub const UNBOUNDED: TimeBlock = TimeBlock {
        start: i64::MIN,
        stop: i64::MAX,
    };

    pub fn from_micros(start: i64, stop: i64) -> Self {
        TimeBlock { start, stop }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn stop(&self) -> i64 {
        self.stop
    }

    pub fn span(&self) -> i64 {
        self.stop.saturating_sub(self.start)
    }

    pub fn contains(&self, micros: i64) -> bool {
        micros >= self.start && micros < self.stop
    }

    pub fn intersects(&self, other: &TimeBlock) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Returns a block covering the same micros with `stop >= start`.
    ///
    /// A reversed block `(a, b)` with `b < a` names the micros from `a` down
    /// to just after `b`, so the half-open equivalent is `[b + 1, a + 1)`.
    pub fn normalize(self) -> TimeBlock {
        if self.stop >= self.start {
            return self;
        }
        TimeBlock {
            start: self.stop.saturating_add(1),
            stop: self.start.saturating_add(1),
        }
    }
}

impl fmt::Display for TimeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimeBlock [{}] to [{}]",
            format_micros(self.start),
            format_micros(self.stop)
        )
    }
}

fn format_micros(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(dt) => dt.to_rfc3339(),
        None if micros < 0 => "-inf".to_string(),
        None => "+inf".to_string(),
    }
}
