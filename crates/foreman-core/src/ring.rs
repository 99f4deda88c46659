//! Fixed-capacity log ring for per-session history.
//!
//! Session log history is bounded explicitly (capacity 50) rather than held
//! in an ever-growing list; the heartbeat channel serializes the ring as a
//! plain array, oldest first.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize, Serializer};

/// Bounded ring of log lines. Pushing past capacity evicts the oldest line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogRing {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogRing {
    /// Create a ring with the given capacity. A capacity of zero keeps nothing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            let _ = self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Append many lines in order.
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        for line in lines {
            self.push(line);
        }
    }

    /// Lines oldest-first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Serialize for LogRing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lines.iter())
    }
}

impl<'de> Deserialize<'de> for LogRing {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let lines = Vec::<String>::deserialize(deserializer)?;
        let mut ring = Self::with_capacity(crate::constants::LOG_RING_CAPACITY);
        ring.extend(lines);
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_below_capacity_keeps_everything() {
        let mut ring = LogRing::with_capacity(3);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.lines().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn push_past_capacity_evicts_oldest() {
        let mut ring = LogRing::with_capacity(3);
        for line in ["a", "b", "c", "d", "e"] {
            ring.push(line);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.lines().collect::<Vec<_>>(), vec!["c", "d", "e"]);
    }

    #[test]
    fn capacity_fifty_holds_exactly_fifty() {
        let mut ring = LogRing::with_capacity(50);
        for i in 0..120 {
            ring.push(format!("line {i}"));
        }
        assert_eq!(ring.len(), 50);
        assert_eq!(ring.lines().next(), Some("line 70"));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut ring = LogRing::with_capacity(0);
        ring.push("a");
        assert!(ring.is_empty());
    }

    #[test]
    fn serializes_as_plain_array() {
        let mut ring = LogRing::with_capacity(2);
        ring.push("x");
        ring.push("y");
        assert_eq!(serde_json::to_string(&ring).unwrap(), "[\"x\",\"y\"]");
    }

    #[test]
    fn deserializes_with_default_capacity() {
        let ring: LogRing = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(ring.capacity(), crate::constants::LOG_RING_CAPACITY);
        assert_eq!(ring.len(), 2);
    }
}
