use crate::simulator::Simulator;
use minesim_core::block::{Block, NodeId, Transaction};
use minesim_core::event::{Event, EventKind, round4};
use minesim_core::node::{NodeLabel, ReceiveOutcome, TXN_MESSAGE_MB, block_message_mb, link_latency};
use rand::Rng;

/// Event dispatch: one state-machine transition on one node per event,
/// possibly enqueueing follow-up deliveries and reschedules. Payloads are
/// cloned at schedule time so a receiver never aliases sender state.
impl Simulator {
    pub(crate) fn dispatch(&mut self, event: Event) {
        let node = event.node as usize;
        match event.kind {
            EventKind::CreateTxn => self.on_create_txn(node, event.time),
            EventKind::RecvTxn { txn, from } => self.on_recv_txn(node, txn, from, event.time),
            EventKind::StartMining => self.schedule_mining(node, event.time),
            EventKind::EndMining { block } => self.on_end_mining(node, block, event.time),
            EventKind::RecvBlock { block, from } => {
                self.on_recv_block(node, block, from, event.time)
            }
        }
    }

    /// Emit a transaction to a uniformly chosen counterparty and gossip it.
    /// A node that cannot afford the minimum amount skips the tick but
    /// still reschedules its next emission.
    fn on_create_txn(&mut self, node: usize, now: f64) {
        let num_nodes = self.nodes.len() as NodeId;
        let payee = loop {
            let candidate = self.rng.gen_range(0..num_nodes);
            if candidate != node as NodeId {
                break candidate;
            }
        };

        if let Some(txn) = self.nodes[node].generate_txn(payee, now, &mut self.rng) {
            self.gossip_txn(node, None, &txn, now);
        }

        let dt = self.exp_delay(self.config.inter_arrival_time);
        self.queue
            .push(round4(now + dt), node as NodeId, EventKind::CreateTxn);
    }

    /// Ingest a gossiped transaction; forward it once if newly admitted.
    fn on_recv_txn(&mut self, node: usize, txn: Transaction, from: NodeId, now: f64) {
        if self.nodes[node].receive_txn(txn.clone()) {
            self.gossip_txn(node, Some(from), &txn, now);
        }
    }

    /// Mining completion. A stale candidate (tip moved since it was built)
    /// is dropped silently; the reschedule happened when the tip changed.
    fn on_end_mining(&mut self, node: usize, block: Block, now: f64) {
        let Some(mined) = self.nodes[node].mine_block(block, now) else {
            return;
        };
        let id = self.nodes[node].id;
        self.record_accept(id, &mined, now);

        match self.nodes[node].label {
            NodeLabel::Honest => self.gossip_block(node, None, &mined, now),
            NodeLabel::Selfish | NodeLabel::Stubborn => {
                log::debug!(
                    "node {}: withholding mined block at position {} (queue depth {})",
                    id,
                    mined.position,
                    self.nodes[node].withheld.len() + 1
                );
                self.nodes[node].withheld.push_back(mined);
            }
        }
        self.schedule_mining(node, now);
    }

    /// Block delivery: accept (with orphan recovery), gossip what was
    /// accepted, let a withholding node react to honest progress, and
    /// restart mining when the tip moved.
    fn on_recv_block(&mut self, node: usize, block: Block, from: NodeId, now: f64) {
        match self.nodes[node].receive_block(block) {
            ReceiveOutcome::Accepted {
                blocks,
                tip_advanced,
            } => {
                for accepted in &blocks {
                    let id = self.nodes[node].id;
                    self.record_accept(id, accepted, now);
                    self.gossip_block(node, Some(from), accepted, now);
                }
                if self.nodes[node].is_adversary() {
                    let own = self.nodes[node].id;
                    for accepted in &blocks {
                        if accepted.creator == Some(own) {
                            continue;
                        }
                        let released = self.nodes[node].release_withheld(accepted);
                        for public in released {
                            self.gossip_block(node, None, &public, now);
                        }
                    }
                }
                if tip_advanced {
                    self.schedule_mining(node, now);
                }
            }
            ReceiveOutcome::Duplicate
            | ReceiveOutcome::Orphaned
            | ReceiveOutcome::Rejected => {}
        }
    }

    /// Build a fresh candidate on the current tip and schedule its
    /// completion at an exponential interval scaled by hash power.
    pub(crate) fn schedule_mining(&mut self, node: usize, now: f64) {
        let hash_power = self.nodes[node].hash_power;
        if hash_power <= 0.0 {
            return;
        }
        let candidate = self.nodes[node].build_candidate();
        let dt = self.exp_delay(self.config.inter_arrival_time_block / hash_power);
        self.queue.push(
            round4(now + dt),
            node as NodeId,
            EventKind::EndMining { block: candidate },
        );
    }

    fn gossip_txn(&mut self, sender: usize, exclude: Option<NodeId>, txn: &Transaction, now: f64) {
        let sender_bandwidth = self.nodes[sender].bandwidth;
        for peer in self.nodes[sender].peers.clone() {
            if Some(peer.id) == exclude {
                continue;
            }
            let latency = link_latency(
                sender_bandwidth,
                self.nodes[peer.id as usize].bandwidth,
                peer.propagation_delay,
                TXN_MESSAGE_MB,
                &mut self.rng,
            );
            self.queue.push(
                round4(now + latency),
                peer.id,
                EventKind::RecvTxn {
                    txn: txn.clone(),
                    from: sender as NodeId,
                },
            );
        }
    }

    fn gossip_block(&mut self, sender: usize, exclude: Option<NodeId>, block: &Block, now: f64) {
        let sender_bandwidth = self.nodes[sender].bandwidth;
        let message_mb = block_message_mb(block);
        for peer in self.nodes[sender].peers.clone() {
            if Some(peer.id) == exclude {
                continue;
            }
            let latency = link_latency(
                sender_bandwidth,
                self.nodes[peer.id as usize].bandwidth,
                peer.propagation_delay,
                message_mb,
                &mut self.rng,
            );
            self.queue.push(
                round4(now + latency),
                peer.id,
                EventKind::RecvBlock {
                    block: block.clone(),
                    from: sender as NodeId,
                },
            );
        }
    }
}
