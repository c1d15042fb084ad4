use crate::block::{Block, NodeId, Transaction};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Round a simulated time to 4 decimal places. Every scheduled time goes
/// through this so reruns with the same seed produce identical schedules.
pub fn round4(t: f64) -> f64 {
    (t * 10_000.0).round() / 10_000.0
}

/// Payload-bearing event kinds. Block and transaction payloads are owned
/// clones taken at schedule time; a receiver never aliases sender state.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Node emits a new transaction and reschedules itself.
    CreateTxn,
    /// Delivery of a gossiped transaction.
    RecvTxn { txn: Transaction, from: NodeId },
    /// One-shot bootstrap: build the first candidate and schedule its completion.
    StartMining,
    /// Mining-completion candidate; stale if the parent is no longer the tip.
    EndMining { block: Block },
    /// Delivery of a block from a peer.
    RecvBlock { block: Block, from: NodeId },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::CreateTxn => "create_txn",
            EventKind::RecvTxn { .. } => "recv_txn",
            EventKind::StartMining => "start_mining",
            EventKind::EndMining { .. } => "end_mining",
            EventKind::RecvBlock { .. } => "recv_block",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub time: f64,
    pub node: NodeId,
    pub kind: EventKind,
    /// Queue admission order; ties on `time` dispatch in insertion order.
    seq: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-priority queue of events ordered by simulated time.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: f64, node: NodeId, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Event {
            time,
            node,
            kind,
            seq,
        }));
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(ev)| ev)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.push(3.0, 0, EventKind::CreateTxn);
        queue.push(1.0, 1, EventKind::CreateTxn);
        queue.push(2.0, 2, EventKind::StartMining);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|e| e.node).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn equal_times_dispatch_in_insertion_order() {
        let mut queue = EventQueue::new();
        for node in 0..5 {
            queue.push(1.5, node, EventKind::CreateTxn);
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|e| e.node).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn round4_truncates_schedule_noise() {
        assert_eq!(round4(1.00004999), 1.0);
        assert_eq!(round4(1.23456), 1.2346);
        assert_eq!(round4(2.0), 2.0);
    }
}
