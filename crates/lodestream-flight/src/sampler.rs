/// One throughput observation per sampling interval.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSample {
    /// Bytes received during the interval.
    pub received_bytes: u64,
    /// Assets received during the interval.
    pub received_count: u64,
    /// Average asset byte-size estimate at sampling time.
    pub fragment_estimate: f64,
    /// Congestion window at sampling time.
    pub cwnd_at_sample: f64,
}

/// Fixed-capacity ring of the most recent frames.
///
/// Doubles as the stall-tracking window: the ring must be full before a
/// stall verdict is allowed, so partial history never triggers a reset.
#[derive(Clone, Debug)]
pub struct SampleRing {
    frames: Vec<FrameSample>,
    capacity: usize,
    next: usize,
    filled: bool,
}

impl SampleRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity.max(2)),
            capacity: capacity.max(2),
            next: 0,
            filled: false,
        }
    }

    pub fn push(&mut self, frame: FrameSample) {
        if self.frames.len() < self.capacity {
            self.frames.push(frame);
            if self.frames.len() == self.capacity {
                self.filled = true;
            }
        } else {
            self.frames[self.next] = frame;
            self.filled = true;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.next = 0;
        self.filled = false;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.filled
    }

    /// Frames ordered oldest → newest.
    #[must_use]
    pub fn ordered(&self) -> Vec<FrameSample> {
        if !self.filled {
            return self.frames.clone();
        }
        let mut out = Vec::with_capacity(self.capacity);
        for i in 0..self.capacity {
            out.push(self.frames[(self.next + i) % self.capacity]);
        }
        out
    }

    /// True when every frame in the most recent half of a full ring saw
    /// zero received assets.
    #[must_use]
    pub fn recent_half_idle(&self) -> bool {
        if !self.filled {
            return false;
        }
        let ordered = self.ordered();
        let half = ordered.len() / 2;
        ordered[ordered.len() - half..]
            .iter()
            .all(|f| f.received_count == 0)
    }

    /// Average window over the older half of a full ring (the state that
    /// preceded a stall).
    #[must_use]
    pub fn older_half_avg_cwnd(&self) -> Option<f64> {
        if !self.filled {
            return None;
        }
        let ordered = self.ordered();
        let half = ordered.len() / 2;
        let older = &ordered[..half];
        if older.is_empty() {
            return None;
        }
        Some(older.iter().map(|f| f.cwnd_at_sample).sum::<f64>() / older.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: u64, count: u64) -> FrameSample {
        FrameSample {
            received_bytes: bytes,
            received_count: count,
            fragment_estimate: 1_024.0,
            cwnd_at_sample: 1_000_000.0,
        }
    }

    #[test]
    fn not_full_never_reports_stall() {
        let mut ring = SampleRing::new(6);
        for _ in 0..5 {
            ring.push(frame(0, 0));
        }
        assert!(!ring.recent_half_idle());
    }

    #[test]
    fn full_ring_with_idle_recent_half_reports_stall() {
        let mut ring = SampleRing::new(6);
        for _ in 0..3 {
            ring.push(frame(500_000, 100));
        }
        for _ in 0..3 {
            ring.push(frame(0, 0));
        }
        assert!(ring.recent_half_idle());
    }

    #[test]
    fn traffic_in_recent_half_is_not_a_stall() {
        let mut ring = SampleRing::new(6);
        for _ in 0..5 {
            ring.push(frame(0, 0));
        }
        ring.push(frame(10_000, 3));
        assert!(!ring.recent_half_idle());
    }

    #[test]
    fn ordered_returns_oldest_first_after_wrap() {
        let mut ring = SampleRing::new(3);
        for i in 1..=5u64 {
            ring.push(frame(i, i));
        }
        let ordered = ring.ordered();
        let bytes: Vec<u64> = ordered.iter().map(|f| f.received_bytes).collect();
        assert_eq!(bytes, vec![3, 4, 5]);
    }

    #[test]
    fn older_half_average_uses_pre_stall_state() {
        let mut ring = SampleRing::new(4);
        ring.push(FrameSample {
            cwnd_at_sample: 100.0,
            ..frame(1, 1)
        });
        ring.push(FrameSample {
            cwnd_at_sample: 300.0,
            ..frame(1, 1)
        });
        ring.push(frame(0, 0));
        ring.push(frame(0, 0));
        assert_eq!(ring.older_half_avg_cwnd(), Some(200.0));
    }
}
