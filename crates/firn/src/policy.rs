//! Commit policy: when does an open file roll.

use std::time::{Duration, Instant};

/// Running totals for one open file.
#[derive(Debug, Clone, Copy)]
pub struct OpenFileStats {
    /// Records appended so far.
    pub records: u64,
    /// Best-effort byte size; monotonic, may undercount formats that only
    /// materialize trailers on close.
    pub bytes: u64,
    /// When the file was opened.
    pub opened_at: Instant,
}

impl OpenFileStats {
    pub fn new(now: Instant) -> Self {
        Self {
            records: 0,
            bytes: 0,
            opened_at: now,
        }
    }
}

/// Which predicate caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Count,
    Bytes,
    Interval,
    SchemaChange,
    Close,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Count => "count",
            FlushTrigger::Bytes => "bytes",
            FlushTrigger::Interval => "interval",
            FlushTrigger::SchemaChange => "schema",
            FlushTrigger::Close => "close",
        }
    }
}

/// Flush thresholds; any satisfied predicate triggers a commit.
///
/// The interval predicate is sampled on every `put` (including empty ones),
/// so wall-clock rolls happen without an internal timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub max_count: Option<u64>,
    pub max_bytes: Option<u64>,
    pub max_interval: Option<Duration>,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        // Applied when a KCQL statement sets no flush clause at all.
        Self {
            max_count: Some(50_000),
            max_bytes: Some(500 * 1024 * 1024),
            max_interval: Some(Duration::from_secs(3600)),
        }
    }
}

impl CommitPolicy {
    pub fn new(
        max_count: Option<u64>,
        max_bytes: Option<u64>,
        max_interval: Option<Duration>,
    ) -> Self {
        Self {
            max_count,
            max_bytes,
            max_interval,
        }
    }

    /// True when no predicate is configured; rejected at config time.
    pub fn is_empty(&self) -> bool {
        self.max_count.is_none() && self.max_bytes.is_none() && self.max_interval.is_none()
    }

    /// Evaluate against an open file, returning the first satisfied
    /// predicate.
    pub fn should_flush(&self, stats: &OpenFileStats, now: Instant) -> Option<FlushTrigger> {
        if let Some(max) = self.max_count {
            if stats.records >= max {
                return Some(FlushTrigger::Count);
            }
        }
        if let Some(max) = self.max_bytes {
            if stats.bytes >= max {
                return Some(FlushTrigger::Bytes);
            }
        }
        if let Some(max) = self.max_interval {
            if now.duration_since(stats.opened_at) >= max {
                return Some(FlushTrigger::Interval);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(records: u64, bytes: u64, age: Duration) -> (OpenFileStats, Instant) {
        let now = Instant::now();
        let s = OpenFileStats {
            records,
            bytes,
            opened_at: now - age,
        };
        (s, now)
    }

    #[test]
    fn count_threshold() {
        let policy = CommitPolicy::new(Some(2), None, None);
        let (s, now) = stats(1, 100, Duration::ZERO);
        assert_eq!(policy.should_flush(&s, now), None);
        let (s, now) = stats(2, 100, Duration::ZERO);
        assert_eq!(policy.should_flush(&s, now), Some(FlushTrigger::Count));
    }

    #[test]
    fn byte_threshold() {
        let policy = CommitPolicy::new(None, Some(80), None);
        let (s, now) = stats(1, 44, Duration::ZERO);
        assert_eq!(policy.should_flush(&s, now), None);
        let (s, now) = stats(2, 90, Duration::ZERO);
        assert_eq!(policy.should_flush(&s, now), Some(FlushTrigger::Bytes));
    }

    #[test]
    fn interval_threshold() {
        let policy = CommitPolicy::new(None, None, Some(Duration::from_secs(1)));
        let (s, now) = stats(1, 1, Duration::from_millis(10));
        assert_eq!(policy.should_flush(&s, now), None);
        let (s, now) = stats(1, 1, Duration::from_secs(2));
        assert_eq!(policy.should_flush(&s, now), Some(FlushTrigger::Interval));
    }

    #[test]
    fn any_predicate_wins() {
        let policy = CommitPolicy::new(Some(100), Some(80), Some(Duration::from_secs(3600)));
        let (s, now) = stats(3, 90, Duration::ZERO);
        assert_eq!(policy.should_flush(&s, now), Some(FlushTrigger::Bytes));
    }

    #[test]
    fn default_policy_is_not_empty() {
        assert!(!CommitPolicy::default().is_empty());
        assert!(CommitPolicy::new(None, None, None).is_empty());
    }
}
