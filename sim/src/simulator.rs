use crate::graph;
use anyhow::Result;
use minesim_config::{AttackType, SimConfig};
use minesim_core::block::{Block, NodeId, Transaction};
use minesim_core::event::{EventKind, EventQueue, round4};
use minesim_core::node::{Bandwidth, Node, NodeLabel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde::Serialize;
use std::collections::HashSet;

/// One accepted block, as observed by one node. The full sequence is the
/// bookkeeping surface reports are computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptRecord {
    pub time: f64,
    pub node: NodeId,
    pub block_id: String,
    pub creator: Option<NodeId>,
    pub position: u64,
}

/// Discrete-event simulator for the peer network. All global state lives
/// here: the node set, the event queue, the seeded PRNG and the accepted-
/// block log. Handlers receive it explicitly; there are no singletons.
pub struct Simulator {
    pub config: SimConfig,
    pub nodes: Vec<Node>,
    pub clock: f64,
    pub accepted: Vec<AcceptRecord>,
    pub(crate) queue: EventQueue,
    pub(crate) rng: StdRng,
}

impl Simulator {
    /// Validate the parameters, seed genesis and balances, build the peer
    /// graph and prime the first transaction and mining events.
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let genesis = Self::build_genesis(config.num_nodes, &mut rng);
        log::info!(
            "genesis seeded: {} accounts, total supply {:.4}",
            config.num_nodes,
            genesis.balance_sum()
        );

        let mut nodes = Self::create_nodes(&config, &genesis, &mut rng);
        log::info!("peer nodes created successfully");

        let adversary_degree = (config.attack_type != AttackType::None)
            .then(|| (config.adv_connected * config.num_nodes as f64).floor() as usize);
        graph::build_peer_graph(&mut nodes, adversary_degree, &mut rng)?;

        let mut sim = Simulator {
            config,
            nodes,
            clock: 0.0,
            accepted: Vec::new(),
            queue: EventQueue::new(),
            rng,
        };
        sim.seed_events();
        Ok(sim)
    }

    /// Genesis block granting every node a starting balance in [50, 500).
    fn build_genesis(num_nodes: u64, rng: &mut StdRng) -> Block {
        let mut grants = Vec::with_capacity(num_nodes as usize);
        let mut balances = std::collections::HashMap::new();
        for id in 0..num_nodes {
            let coins = rng.gen_range(50.0..500.0);
            grants.push(Transaction::grant(id, coins));
            balances.insert(id, coins);
        }
        Block::genesis(grants, balances)
    }

    /// Build the node set. Node 0 is the adversary when an attack is
    /// configured; slow and low-hash roles are drawn among the honest
    /// nodes. Honest nodes split the remaining hash power with high-hash
    /// nodes at ten times the low-hash share, normalised so the total over
    /// all nodes is 1.
    fn create_nodes(config: &SimConfig, genesis: &Block, rng: &mut StdRng) -> Vec<Node> {
        let n = config.num_nodes as usize;
        let has_adversary = config.attack_type != AttackType::None;
        let honest_start = if has_adversary { 1 } else { 0 };
        let honest_count = n - honest_start;

        let num_slow = ((n as f64 * config.slow_nodes) as usize).min(honest_count);
        let num_low = ((n as f64 * config.low_hash) as usize).min(honest_count);
        let slow_ids: HashSet<usize> = rand::seq::index::sample(rng, honest_count, num_slow)
            .iter()
            .map(|i| i + honest_start)
            .collect();
        let low_ids: HashSet<usize> = rand::seq::index::sample(rng, honest_count, num_low)
            .iter()
            .map(|i| i + honest_start)
            .collect();

        let adv_hash = if has_adversary { config.adv_hash } else { 0.0 };
        let hash_unit =
            (1.0 - adv_hash) / (10 * (honest_count - low_ids.len()) + low_ids.len()) as f64;

        let mut nodes = Vec::with_capacity(n);
        for id in 0..n {
            if has_adversary && id == 0 {
                let label = match config.attack_type {
                    AttackType::Selfish => NodeLabel::Selfish,
                    AttackType::Stubborn => NodeLabel::Stubborn,
                    AttackType::None => NodeLabel::Honest,
                };
                nodes.push(Node::new(
                    0,
                    Bandwidth::Fast,
                    label,
                    config.adv_hash,
                    config.max_block_length,
                    genesis.clone(),
                ));
                continue;
            }
            let bandwidth = if slow_ids.contains(&id) {
                Bandwidth::Slow
            } else {
                Bandwidth::Fast
            };
            let hash_power = if low_ids.contains(&id) {
                hash_unit
            } else {
                hash_unit * 10.0
            };
            nodes.push(Node::new(
                id as NodeId,
                bandwidth,
                NodeLabel::Honest,
                hash_power,
                config.max_block_length,
                genesis.clone(),
            ));
        }
        nodes
    }

    /// Prime each node's first transaction emission and mining bootstrap.
    fn seed_events(&mut self) {
        let iat = self.config.inter_arrival_time;
        let iat_block = self.config.inter_arrival_time_block;

        for id in 0..self.nodes.len() as NodeId {
            let dt = self.exp_delay(iat);
            self.queue.push(round4(dt), id, EventKind::CreateTxn);
        }
        for id in 0..self.nodes.len() {
            if self.nodes[id].hash_power <= 0.0 {
                continue;
            }
            let dt = self.exp_delay(iat_block) / 2.0;
            self.queue
                .push(round4(dt), id as NodeId, EventKind::StartMining);
        }
    }

    /// Advance the queue in time order until it drains or the next event
    /// would land past the horizon.
    pub fn run(&mut self) {
        let horizon = self.config.simulation_time;
        let period = if horizon > 20.0 { horizon / 20.0 } else { horizon };
        let mut next_report = period;

        log::info!(
            "simulation started: {} nodes, horizon {:.1}s",
            self.nodes.len(),
            horizon
        );
        while let Some(event) = self.queue.pop() {
            if event.time >= horizon {
                break;
            }
            self.clock = event.time;
            while self.clock >= next_report {
                log::info!("simulated {:.1}s / {:.1}s", next_report, horizon);
                next_report += period;
            }
            log::debug!(
                "event {} at {:.4}s on node {}",
                event.kind.name(),
                event.time,
                event.node
            );
            self.dispatch(event);
        }
        log::info!(
            "simulation finished at {:.4}s: {} block acceptances recorded",
            self.clock,
            self.accepted.len()
        );
    }

    /// Exponential draw with the given mean.
    pub(crate) fn exp_delay(&mut self, mean: f64) -> f64 {
        Exp::new(1.0 / mean).unwrap().sample(&mut self.rng)
    }

    pub(crate) fn record_accept(&mut self, node: NodeId, block: &Block, time: f64) {
        self.accepted.push(AcceptRecord {
            time,
            node,
            block_id: block.id.clone(),
            creator: block.creator,
            position: block.position,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimConfig {
        SimConfig {
            num_nodes: 6,
            slow_nodes: 0.5,
            low_hash: 0.5,
            inter_arrival_time: 2.0,
            inter_arrival_time_block: 4.0,
            simulation_time: 30.0,
            max_block_length: 10,
            attack_type: AttackType::None,
            adv_hash: 0.0,
            adv_connected: 0.0,
            seed: 11,
            results_dir: "./results".to_string(),
        }
    }

    #[test]
    fn setup_normalises_hash_power() {
        let sim = Simulator::new(small_config()).unwrap();
        let total: f64 = sim.nodes.iter().map(|n| n.hash_power).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let mut powers: Vec<f64> = sim.nodes.iter().map(|n| n.hash_power).collect();
        powers.sort_by(|a, b| a.total_cmp(b));
        // Low-hash nodes carry a tenth of the high-hash share.
        assert!((powers[powers.len() - 1] / powers[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn setup_marks_node_zero_as_adversary() {
        let cfg = SimConfig {
            attack_type: AttackType::Selfish,
            adv_hash: 0.3,
            adv_connected: 1.0,
            ..small_config()
        };
        let sim = Simulator::new(cfg).unwrap();
        assert_eq!(sim.nodes[0].label, NodeLabel::Selfish);
        assert!((sim.nodes[0].hash_power - 0.3).abs() < 1e-12);
        assert!(sim.nodes[1..].iter().all(|n| n.label == NodeLabel::Honest));

        let total: f64 = sim.nodes.iter().map(|n| n.hash_power).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn every_node_shares_the_same_genesis() {
        let sim = Simulator::new(small_config()).unwrap();
        let genesis_id = sim.nodes[0].chain.tip_id().to_string();
        for node in &sim.nodes {
            assert_eq!(node.chain.tip_id(), genesis_id);
            assert_eq!(node.chain.tip().position, 0);
        }
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let mut first = Simulator::new(small_config()).unwrap();
        first.run();
        let mut second = Simulator::new(small_config()).unwrap();
        second.run();

        assert_eq!(first.accepted, second.accepted);
        for (a, b) in first.nodes.iter().zip(second.nodes.iter()) {
            assert_eq!(a.chain.tip_id(), b.chain.tip_id());
            assert_eq!(a.chain.len(), b.chain.len());
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        let cfg = SimConfig {
            num_nodes: 1,
            ..small_config()
        };
        assert!(Simulator::new(cfg).is_err());
    }
}
