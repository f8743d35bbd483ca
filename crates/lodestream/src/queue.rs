use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use lodestream_core::AssetHash;

/// Not-yet-dispatched requests ordered by importance.
///
/// ## Normative
/// - Urgent entries always precede non-urgent ones.
/// - Among non-urgent entries, higher importance wins; equal importance
///   preserves enqueue order (stable, no reordering of equal work).
///
/// Mutations (promotion, re-scoring, removal) use lazy deletion: the slot
/// map is the source of truth and stale heap entries are skipped on pop.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<HeapEntry>,
    slots: HashMap<AssetHash, Slot>,
    next_seq: u64,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    urgent: bool,
    importance: f32,
    seq: u64,
}

#[derive(Debug)]
struct HeapEntry {
    urgent: bool,
    importance: f32,
    seq: u64,
    hash: AssetHash,
}

impl HeapEntry {
    fn matches(&self, slot: &Slot) -> bool {
        self.seq == slot.seq
            && self.urgent == slot.urgent
            && self.importance.to_bits() == slot.importance.to_bits()
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urgent
            .cmp(&other.urgent)
            .then_with(|| self.importance.total_cmp(&other.importance))
            // Lower sequence number first: FIFO among equals.
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PriorityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a hash. Re-pushing a queued hash only raises its importance.
    pub fn push(&mut self, hash: AssetHash, importance: f32) {
        if let Some(slot) = self.slots.get(&hash) {
            if importance > slot.importance {
                self.update_importance(&hash, importance);
            }
            return;
        }

        let slot = Slot {
            urgent: false,
            importance,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.slots.insert(hash, slot);
        self.push_heap(hash, slot);
    }

    /// Promote a queued hash ahead of all non-urgent work.
    pub fn promote_urgent(&mut self, hash: &AssetHash) {
        if let Some(slot) = self.slots.get_mut(hash)
            && !slot.urgent
        {
            slot.urgent = true;
            let slot = *slot;
            self.push_heap(*hash, slot);
        }
    }

    pub fn update_importance(&mut self, hash: &AssetHash, importance: f32) {
        if let Some(slot) = self.slots.get_mut(hash) {
            slot.importance = importance;
            let slot = *slot;
            self.push_heap(*hash, slot);
        }
    }

    pub fn remove(&mut self, hash: &AssetHash) {
        self.slots.remove(hash);
    }

    /// Pop the highest-priority hash, discarding stale heap entries.
    pub fn pop(&mut self) -> Option<AssetHash> {
        while let Some(entry) = self.heap.pop() {
            if let Some(slot) = self.slots.get(&entry.hash)
                && entry.matches(slot)
            {
                self.slots.remove(&entry.hash);
                return Some(entry.hash);
            }
        }
        None
    }

    fn push_heap(&mut self, hash: AssetHash, slot: Slot) {
        self.heap.push(HeapEntry {
            urgent: slot.urgent,
            importance: slot.importance,
            seq: slot.seq,
            hash,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: u8) -> AssetHash {
        AssetHash::digest(&[seed])
    }

    #[test]
    fn higher_importance_pops_first() {
        let mut q = PriorityQueue::new();
        q.push(h(1), 0.2);
        q.push(h(2), 0.9);
        q.push(h(3), 0.5);

        assert_eq!(q.pop(), Some(h(2)));
        assert_eq!(q.pop(), Some(h(3)));
        assert_eq!(q.pop(), Some(h(1)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn equal_importance_preserves_enqueue_order() {
        let mut q = PriorityQueue::new();
        for seed in 0..8u8 {
            q.push(h(seed), 0.5);
        }
        let order: Vec<AssetHash> = std::iter::from_fn(|| q.pop()).collect();
        let expected: Vec<AssetHash> = (0..8u8).map(h).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn urgent_precedes_any_importance() {
        let mut q = PriorityQueue::new();
        q.push(h(1), 10.0);
        q.push(h(2), 0.1);
        q.promote_urgent(&h(2));

        assert_eq!(q.pop(), Some(h(2)));
        assert_eq!(q.pop(), Some(h(1)));
    }

    #[test]
    fn update_importance_reorders() {
        let mut q = PriorityQueue::new();
        q.push(h(1), 0.9);
        q.push(h(2), 0.1);
        q.update_importance(&h(2), 2.0);

        assert_eq!(q.pop(), Some(h(2)));
        assert_eq!(q.pop(), Some(h(1)));
    }

    #[test]
    fn removed_hash_is_never_popped() {
        let mut q = PriorityQueue::new();
        q.push(h(1), 0.5);
        q.push(h(2), 0.4);
        q.remove(&h(1));

        assert_eq!(q.pop(), Some(h(2)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn re_push_only_raises_importance() {
        let mut q = PriorityQueue::new();
        q.push(h(1), 0.5);
        q.push(h(2), 0.3);
        q.push(h(1), 0.1); // lower: ignored, h(1) keeps 0.5
        assert_eq!(q.pop(), Some(h(1)));

        q.push(h(3), 0.2);
        q.push(h(3), 0.9); // higher: applied
        assert_eq!(q.pop(), Some(h(3)));
        assert_eq!(q.pop(), Some(h(2)));
        assert_eq!(q.pop(), None);
    }
}
