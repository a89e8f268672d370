// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-topic statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Statistics for one topic.
#[derive(Debug)]
pub struct TopicStats {
    /// Topic name.
    pub topic: String,

    /// Messages successfully handed over.
    pub messages_routed: AtomicU64,

    /// Bytes handed over.
    pub bytes_routed: AtomicU64,

    /// Messages dropped (malformed).
    pub messages_dropped: AtomicU64,

    /// Errors encountered.
    pub errors: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl TopicStats {
    /// Create new stats.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            messages_routed: AtomicU64::new(0),
            bytes_routed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Record a routed message.
    pub fn record_message(&self, bytes: usize) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        self.bytes_routed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a dropped message.
    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> TopicStatsSnapshot {
        TopicStatsSnapshot {
            topic: self.topic.clone(),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            bytes_routed: self.bytes_routed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs_f64(),
        }
    }
}

/// Point-in-time copy of [`TopicStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct TopicStatsSnapshot {
    pub topic: String,
    pub messages_routed: u64,
    pub bytes_routed: u64,
    pub messages_dropped: u64,
    pub errors: u64,
    pub uptime_secs: f64,
}

impl TopicStatsSnapshot {
    /// Average throughput since creation.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            self.messages_routed as f64 / self.uptime_secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = TopicStats::new("camera");
        stats.record_message(100);
        stats.record_message(50);
        stats.record_dropped();
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.topic, "camera");
        assert_eq!(snap.messages_routed, 2);
        assert_eq!(snap.bytes_routed, 150);
        assert_eq!(snap.messages_dropped, 1);
        assert_eq!(snap.errors, 1);
        assert!(snap.messages_per_second() >= 0.0);
    }
}
