use crate::block::{BLOCK_REWARD, Block, NodeId, Transaction, round5};
use crate::chain::ChainStore;
use crate::mempool::Mempool;
use rand::Rng;
use rand_distr::{Distribution, Exp};
use std::collections::{HashMap, HashSet, VecDeque};

pub mod adversary;

/// Smallest transferable amount; a node whose spendable balance is at or
/// below this skips emission for the tick.
pub const MIN_TXN_VALUE: f64 = 0.0001;

/// Wire size of a transaction message, in megabits (1 KB).
pub const TXN_MESSAGE_MB: f64 = 0.008;

const SLOW_LINK_MBPS: f64 = 5.0;
const FAST_LINK_MBPS: f64 = 100.0;
/// Mean queued backlog ahead of a message, in megabits.
const MEAN_QUEUE_BACKLOG_MB: f64 = 0.096;

/// Bandwidth class of a node. Any link touching a slow node runs at the
/// slow rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Slow,
    Fast,
}

/// Mining behaviour of a node. Selfish and stubborn miners withhold mined
/// blocks in a private queue and release them in reaction to the public
/// chain; see the `adversary` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLabel {
    Honest,
    Selfish,
    Stubborn,
}

/// Directed neighbour reference with its per-link propagation delay.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: NodeId,
    pub propagation_delay: f64,
}

/// Decision outcome of delivering a block to a node.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Already in the store; nothing to do, nothing to gossip.
    Duplicate,
    /// Parent unknown; parked until the parent arrives.
    Orphaned,
    /// Failed verification (or structurally invalid); not stored.
    Rejected,
    /// One or more blocks entered the store (orphan recovery may admit a
    /// chain). Each accepted block is gossiped; a tip advance restarts mining.
    Accepted {
        blocks: Vec<Block>,
        tip_advanced: bool,
    },
}

/// Message latency across one link: propagation + transmission + queuing.
/// The queuing term is exponential with mean `0.096 / c` megabit-seconds
/// (the interval between Poisson(c/0.096) drain events distributes ~Exp).
pub fn link_latency<R: Rng + ?Sized>(
    a: Bandwidth,
    b: Bandwidth,
    propagation_delay: f64,
    message_mb: f64,
    rng: &mut R,
) -> f64 {
    let link_mbps = if a == Bandwidth::Slow || b == Bandwidth::Slow {
        SLOW_LINK_MBPS
    } else {
        FAST_LINK_MBPS
    };
    let queuing = Exp::new(link_mbps / MEAN_QUEUE_BACKLOG_MB)
        .unwrap()
        .sample(rng);
    propagation_delay + message_mb / link_mbps + queuing
}

/// Wire size of a block message: transactions plus coinbase, 1 KB each.
pub fn block_message_mb(block: &Block) -> f64 {
    (block.transactions.len() + 1) as f64 * TXN_MESSAGE_MB
}

/// One peer of the simulated network: chain view, mempool, link table and
/// mining behaviour. All state here is private to the node; other nodes are
/// referenced by id only.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub bandwidth: Bandwidth,
    pub label: NodeLabel,
    /// Normalized share of total network hash power.
    pub hash_power: f64,
    /// Max transactions per block, coinbase included in the count.
    pub max_block_len: usize,
    pub peers: Vec<Peer>,
    pub chain: ChainStore,
    pub mempool: Mempool,
    /// Mined-but-unpublished blocks, oldest first. Empty for honest nodes.
    pub withheld: VecDeque<Block>,
}

impl Node {
    pub fn new(
        id: NodeId,
        bandwidth: Bandwidth,
        label: NodeLabel,
        hash_power: f64,
        max_block_len: usize,
        genesis: Block,
    ) -> Self {
        Node {
            id,
            bandwidth,
            label,
            hash_power,
            max_block_len,
            peers: Vec::new(),
            chain: ChainStore::new(genesis),
            mempool: Mempool::new(),
            withheld: VecDeque::new(),
        }
    }

    pub fn add_peer(&mut self, id: NodeId, propagation_delay: f64) {
        self.peers.push(Peer {
            id,
            propagation_delay,
        });
    }

    pub fn clear_peers(&mut self) {
        self.peers.clear();
    }

    pub fn is_adversary(&self) -> bool {
        self.label != NodeLabel::Honest
    }

    /// Spendable balance at the current tip.
    pub fn tip_balance(&self) -> f64 {
        self.chain.tip().balances.get(&self.id).copied().unwrap_or(0.0)
    }

    /// Emit a new transaction against the tip balance. `None` when the
    /// balance cannot cover the minimum amount (the tick is skipped but the
    /// caller still reschedules the next emission).
    pub fn generate_txn<R: Rng + ?Sized>(
        &mut self,
        payee: NodeId,
        now: f64,
        rng: &mut R,
    ) -> Option<Transaction> {
        let balance = self.tip_balance();
        if balance <= MIN_TXN_VALUE {
            return None;
        }
        let value = rng.gen_range(MIN_TXN_VALUE..balance);
        let txn = Transaction::transfer(self.id, payee, value, now);
        self.mempool.insert(txn.clone());
        Some(txn)
    }

    /// Ingest a gossiped transaction. True if newly admitted (and therefore
    /// worth forwarding).
    pub fn receive_txn(&mut self, txn: Transaction) -> bool {
        self.mempool.insert(txn)
    }

    /// Build a mining candidate on the current tip: spendable mempool
    /// transactions in insertion order against a running balance snapshot,
    /// capped one below the block limit to leave room for the coinbase.
    pub fn build_candidate(&self) -> Block {
        let tip = self.chain.tip();
        let mut balances = tip.balances.clone();
        let mut included = Vec::new();
        let cap = self.max_block_len.saturating_sub(1);

        for txn in self.mempool.pending() {
            if included.len() >= cap {
                break;
            }
            let Some(payer) = txn.payer else {
                continue;
            };
            let payer_balance = balances.get(&payer).copied().unwrap_or(0.0);
            if payer_balance < txn.value {
                continue;
            }
            *balances.entry(payer).or_insert(0.0) -= txn.value;
            *balances.entry(txn.payee).or_insert(0.0) += txn.value;
            included.push(txn.clone());
        }

        let coinbase = Transaction::coinbase(self.id, 0.0);
        *balances.entry(self.id).or_insert(0.0) += BLOCK_REWARD;

        Block::new(
            tip.id.clone(),
            tip.position + 1,
            included,
            coinbase,
            balances,
            self.id,
        )
    }

    /// Mining completion. The candidate is stale (silently dropped) unless
    /// its parent is still the tip; otherwise it is sealed at `now`,
    /// verified and accepted, and returned for publication or withholding.
    pub fn mine_block(&mut self, mut candidate: Block, now: f64) -> Option<Block> {
        if candidate.parent_id.as_deref() != Some(self.chain.tip_id()) {
            log::debug!(
                "node {}: stale mining candidate dropped (tip moved)",
                self.id
            );
            return None;
        }
        candidate.seal(now);
        match self.try_accept(candidate) {
            Some((block, _)) => Some(block),
            None => None,
        }
    }

    /// Deliver a block from a peer. Handles duplicate drop, orphan parking
    /// and recursive orphan recovery around the accept procedure.
    pub fn receive_block(&mut self, block: Block) -> ReceiveOutcome {
        if self.chain.contains(&block.id) {
            return ReceiveOutcome::Duplicate;
        }
        let Some(parent_id) = block.parent_id.clone() else {
            // A competing genesis is never valid.
            return ReceiveOutcome::Rejected;
        };
        if !self.chain.contains(&parent_id) {
            self.chain.park_orphan(block);
            return ReceiveOutcome::Orphaned;
        }

        let mut accepted = Vec::new();
        let mut tip_advanced = false;
        let mut next = Some(block);
        while let Some(candidate) = next {
            match self.try_accept(candidate) {
                Some((block, promoted)) => {
                    tip_advanced |= promoted;
                    next = self.chain.take_orphan_of(&block.id);
                    accepted.push(block);
                }
                None => break,
            }
        }

        if accepted.is_empty() {
            ReceiveOutcome::Rejected
        } else {
            ReceiveOutcome::Accepted {
                blocks: accepted,
                tip_advanced,
            }
        }
    }

    /// Accept procedure: rebuild the mempool the candidate chain implies,
    /// verify the block against its parent snapshot, then store it and
    /// promote only a strictly-deeper head (first-seen wins ties). Returns
    /// the accepted block and whether the tip moved.
    fn try_accept(&mut self, block: Block) -> Option<(Block, bool)> {
        let parent_id = block.parent_id.clone()?;
        let parent = self.chain.get(&parent_id)?.clone();
        if block.position != parent.position + 1 {
            log::warn!(
                "node {}: rejecting block {} with position {} under parent at {}",
                self.id,
                &block.id[..16],
                block.position,
                parent.position
            );
            return None;
        }

        let tip_id = self.chain.tip_id().to_string();
        let tip_position = self.chain.tip().position;
        let ancestor = self.chain.common_ancestor(&tip_id, &parent_id)?;

        // Working mempool on the candidate chain: roll the old best path
        // back to the fork point, then strip what the new branch commits.
        let mut working: Vec<Transaction> = self.mempool.pending().to_vec();
        for rolled_back in self.chain.path_between(&tip_id, &ancestor) {
            if let Some(old) = self.chain.get(&rolled_back) {
                working.extend(old.transactions.iter().cloned());
            }
        }
        let mut replay = self.chain.path_between(&parent_id, &ancestor);
        replay.reverse();
        for replayed in replay {
            if let Some(new) = self.chain.get(&replayed) {
                let committed: HashSet<&str> =
                    new.transactions.iter().map(|t| t.id.as_str()).collect();
                working.retain(|t| !committed.contains(t.id.as_str()));
            }
        }

        if !self.verify_block(&block, &parent, &working) {
            return None;
        }

        for txn in &block.transactions {
            self.mempool.note_seen(txn);
        }
        let promoted = block.position == tip_position + 1;
        self.chain.insert(block.clone());
        if promoted {
            self.chain.promote(&block.id);
            let committed: HashSet<&str> =
                block.transactions.iter().map(|t| t.id.as_str()).collect();
            working.retain(|t| !committed.contains(t.id.as_str()));
            self.mempool.replace_pending(working);
        }
        Some((block, promoted))
    }

    /// Block verification against the parent snapshot and the mempool state
    /// just before the block:
    /// 1) every transaction is available (in the working pool) or entirely
    ///    foreign to this node; duplicates within the block are rejected;
    /// 2) the coinbase pays the creator exactly the block reward;
    /// 3) per-node balances stay non-negative and match the block's
    ///    snapshot to 5 decimals.
    fn verify_block(&self, block: &Block, parent: &Block, working: &[Transaction]) -> bool {
        let Some(coinbase) = &block.coinbase else {
            log::warn!("node {}: rejecting block without coinbase", self.id);
            return false;
        };
        if !coinbase.is_coinbase() || coinbase.value != BLOCK_REWARD {
            log::warn!(
                "node {}: rejecting block {} with malformed coinbase",
                self.id,
                &block.id[..16]
            );
            return false;
        }

        let in_working: HashSet<&str> = working.iter().map(|t| t.id.as_str()).collect();
        let mut in_block: HashSet<&str> = HashSet::new();
        for txn in &block.transactions {
            if !in_block.insert(txn.id.as_str()) {
                log::warn!(
                    "node {}: rejecting block {} with duplicated txn {}",
                    self.id,
                    &block.id[..16],
                    &txn.id[..16]
                );
                return false;
            }
            // A known id outside the working pool is already committed on
            // the candidate chain; an unknown id is a foreign (possibly
            // attacker-authored) transaction and is tolerated.
            if !in_working.contains(txn.id.as_str()) && self.mempool.is_known(&txn.id) {
                log::warn!(
                    "node {}: rejecting block {} replaying committed txn {}",
                    self.id,
                    &block.id[..16],
                    &txn.id[..16]
                );
                return false;
            }
        }

        let mut deltas: HashMap<NodeId, f64> = HashMap::new();
        for txn in &block.transactions {
            *deltas.entry(txn.payee).or_insert(0.0) += txn.value;
            if let Some(payer) = txn.payer {
                *deltas.entry(payer).or_insert(0.0) -= txn.value;
            }
        }
        *deltas.entry(coinbase.payee).or_insert(0.0) += coinbase.value;

        if block.balances.len() != parent.balances.len() {
            log::warn!(
                "node {}: rejecting block {} with wrong balance table size",
                self.id,
                &block.id[..16]
            );
            return false;
        }
        for (node, parent_balance) in &parent.balances {
            let next = parent_balance + deltas.get(node).copied().unwrap_or(0.0);
            if next < 0.0 {
                log::warn!(
                    "node {}: rejecting block {} overdrawing account {}",
                    self.id,
                    &block.id[..16],
                    node
                );
                return false;
            }
            let Some(claimed) = block.balances.get(node) else {
                log::warn!(
                    "node {}: rejecting block {} missing balance for {}",
                    self.id,
                    &block.id[..16],
                    node
                );
                return false;
            };
            if round5(next) != round5(*claimed) {
                log::warn!(
                    "node {}: rejecting block {}: balance mismatch for {} ({} != {})",
                    self.id,
                    &block.id[..16],
                    node,
                    next,
                    claimed
                );
                return false;
            }
        }

        true
    }
}
