//! Per-symbol ring buffer: fixed capacity, overwrite-oldest.
//!
//! One aggregator worker writes; API handlers read by taking a short
//! snapshot under a read-biased lock. Writes are O(1).

use fxgate_core::Tick;
use parking_lot::RwLock;

struct RingInner {
    slots: Vec<Option<Tick>>,
    /// Next slot to write.
    head: usize,
    /// Number of occupied slots (saturates at capacity).
    len: usize,
}

/// Overwrite-oldest circular buffer of ticks.
pub struct TickRing {
    inner: RwLock<RingInner>,
    capacity: usize,
}

impl TickRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            inner: RwLock::new(RingInner {
                slots: vec![None; capacity],
                head: 0,
                len: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a tick, overwriting the oldest when full.
    pub fn push(&self, tick: Tick) {
        let mut inner = self.inner.write();
        let head = inner.head;
        inner.slots[head] = Some(tick);
        inner.head = (head + 1) % self.capacity;
        if inner.len < self.capacity {
            inner.len += 1;
        }
    }

    /// Up to `n` most recent ticks, newest first.
    pub fn recent(&self, n: usize) -> Vec<Tick> {
        let inner = self.inner.read();
        let take = n.min(inner.len);
        let mut out = Vec::with_capacity(take);
        for i in 0..take {
            // head points past the newest entry.
            let idx = (inner.head + self.capacity - 1 - i) % self.capacity;
            if let Some(tick) = &inner.slots[idx] {
                out.push(tick.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgate_core::{LpId, Price, Symbol};
    use rust_decimal::Decimal;

    fn tick(ts: i64) -> Tick {
        Tick::new(
            Symbol::parse("EURUSD").unwrap(),
            Price::new(Decimal::ONE),
            Price::new(Decimal::TWO),
            ts,
            LpId::from("LP_A"),
        )
    }

    #[test]
    fn test_empty_ring() {
        let ring = TickRing::new(4);
        assert!(ring.is_empty());
        assert!(ring.recent(10).is_empty());
    }

    #[test]
    fn test_recent_newest_first() {
        let ring = TickRing::new(4);
        for ts in 1..=3 {
            ring.push(tick(ts));
        }
        let recent = ring.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ts_ms, 3);
        assert_eq!(recent[1].ts_ms, 2);
    }

    #[test]
    fn test_overwrite_oldest() {
        let ring = TickRing::new(3);
        for ts in 1..=5 {
            ring.push(tick(ts));
        }
        assert_eq!(ring.len(), 3);
        let recent = ring.recent(10);
        let ts: Vec<i64> = recent.iter().map(|t| t.ts_ms).collect();
        assert_eq!(ts, vec![5, 4, 3]);
    }
}
