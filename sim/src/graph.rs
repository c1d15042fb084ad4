use anyhow::{Result, anyhow};
use minesim_core::block::NodeId;
use minesim_core::event::round4;
use minesim_core::node::Node;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::VecDeque;

const MIN_PEERS: usize = 4;
const MAX_PEERS: usize = 8;
const MAX_BUILD_ATTEMPTS: usize = 100;

/// Build the peer graph by random pairing until every node meets its target
/// degree as far as the pairing allows, then keep only connected outcomes.
/// Degrees are drawn from {4..8}; the adversary's degree, when given, is
/// fixed by its connectivity fraction. Each undirected link gets one
/// propagation delay in [0.01, 0.5), used in both directions. A
/// disconnected result resets every peer list and retries with fresh
/// degrees, up to a bound.
pub fn build_peer_graph(
    nodes: &mut [Node],
    adversary_degree: Option<usize>,
    rng: &mut StdRng,
) -> Result<()> {
    let n = nodes.len();
    for attempt in 1..=MAX_BUILD_ATTEMPTS {
        let targets: Vec<usize> = (0..n)
            .map(|i| match (adversary_degree, i) {
                (Some(degree), 0) => degree,
                _ => rng.gen_range(MIN_PEERS..=MAX_PEERS),
            })
            .collect();

        for i in 0..n {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            for j in order {
                if nodes[i].peers.len() >= targets[i] {
                    break;
                }
                if i == j
                    || nodes[i].peers.iter().any(|p| p.id == j as NodeId)
                    || nodes[j].peers.len() >= targets[j]
                {
                    continue;
                }
                let delay = round4(rng.gen_range(0.01..0.5));
                nodes[i].add_peer(j as NodeId, delay);
                nodes[j].add_peer(i as NodeId, delay);
            }
        }

        if is_connected(nodes) {
            log::info!("connected P2P network created on attempt {}", attempt);
            return Ok(());
        }

        log::info!("the network is not connected, retrying ({})", attempt);
        for node in nodes.iter_mut() {
            node.clear_peers();
        }
    }
    Err(anyhow!(
        "failed to build a connected peer graph after {} attempts",
        MAX_BUILD_ATTEMPTS
    ))
}

/// Breadth-first reachability from node 0 over the peer lists.
fn is_connected(nodes: &[Node]) -> bool {
    if nodes.is_empty() {
        return true;
    }
    let mut visited = vec![false; nodes.len()];
    let mut planned = VecDeque::from([0usize]);
    visited[0] = true;
    let mut reached = 1;

    while let Some(current) = planned.pop_front() {
        for peer in &nodes[current].peers {
            let peer = peer.id as usize;
            if !visited[peer] {
                visited[peer] = true;
                reached += 1;
                planned.push_back(peer);
            }
        }
    }
    reached == nodes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use minesim_core::block::{Block, Transaction};
    use minesim_core::node::{Bandwidth, NodeLabel};
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn make_nodes(count: u64) -> Vec<Node> {
        let mut grants = Vec::new();
        let mut balances = HashMap::new();
        for id in 0..count {
            grants.push(Transaction::grant(id, 100.0));
            balances.insert(id, 100.0);
        }
        let genesis = Block::genesis(grants, balances);
        (0..count)
            .map(|id| {
                Node::new(
                    id,
                    Bandwidth::Fast,
                    NodeLabel::Honest,
                    1.0 / count as f64,
                    10,
                    genesis.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn builds_a_connected_symmetric_graph() {
        let mut nodes = make_nodes(12);
        let mut rng = StdRng::seed_from_u64(3);
        build_peer_graph(&mut nodes, None, &mut rng).unwrap();

        assert!(is_connected(&nodes));
        for (i, node) in nodes.iter().enumerate() {
            assert!(node.peers.len() <= MAX_PEERS);
            for peer in &node.peers {
                let back = &nodes[peer.id as usize];
                let reverse = back
                    .peers
                    .iter()
                    .find(|p| p.id == i as NodeId)
                    .expect("links are symmetric");
                assert_eq!(reverse.propagation_delay, peer.propagation_delay);
                assert!(peer.propagation_delay >= 0.01 && peer.propagation_delay <= 0.5);
            }
        }
    }

    #[test]
    fn adversary_degree_connects_to_everyone() {
        let mut nodes = make_nodes(10);
        let mut rng = StdRng::seed_from_u64(4);
        build_peer_graph(&mut nodes, Some(10), &mut rng).unwrap();
        // Degree 10 in a 10-node graph saturates at 9 links.
        assert_eq!(nodes[0].peers.len(), 9);
    }

    #[test]
    fn isolated_adversary_is_surfaced_as_an_error() {
        let mut nodes = make_nodes(6);
        let mut rng = StdRng::seed_from_u64(5);
        assert!(build_peer_graph(&mut nodes, Some(0), &mut rng).is_err());
    }

    #[test]
    fn two_node_graph_connects() {
        let mut nodes = make_nodes(2);
        let mut rng = StdRng::seed_from_u64(6);
        build_peer_graph(&mut nodes, None, &mut rng).unwrap();
        assert_eq!(nodes[0].peers.len(), 1);
        assert_eq!(nodes[1].peers.len(), 1);
    }
}
