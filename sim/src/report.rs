use crate::simulator::Simulator;
use anyhow::Result;
use chrono::Local;
use minesim_core::block::{Block, NodeId};
use minesim_core::node::Node;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// Final local view of one node's block tree.
#[derive(Serialize)]
struct NodeChainDump<'a> {
    node_id: NodeId,
    tip_id: &'a str,
    tip_position: u64,
    blocks: Vec<&'a Block>,
}

/// Per-node roll-up written into the run summary.
#[derive(Serialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub tip_position: u64,
    pub blocks_in_store: usize,
    pub pending_txns: usize,
    /// creator -> fraction of this node's tip path authored by that creator
    pub inclusion_ratios: HashMap<NodeId, f64>,
}

/// Share of each miner's blocks on this node's final tip path. Genesis is
/// excluded; ratios are over tip position.
pub fn inclusion_ratios(node: &Node) -> HashMap<NodeId, f64> {
    let depth = node.chain.tip().position;
    if depth == 0 {
        return HashMap::new();
    }
    let mut counts: HashMap<NodeId, u64> = HashMap::new();
    for block in node.chain.ancestry(node.chain.tip_id()) {
        if let Some(creator) = block.creator {
            *counts.entry(creator).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(creator, count)| (creator, count as f64 / depth as f64))
        .collect()
}

/// Blocks `creator` authored that ended up on no node's final tip path.
pub fn stale_block_count(sim: &Simulator, creator: NodeId) -> usize {
    let mut on_some_tip_path: HashSet<&str> = HashSet::new();
    for node in &sim.nodes {
        for block in node.chain.ancestry(node.chain.tip_id()) {
            on_some_tip_path.insert(block.id.as_str());
        }
    }
    // The creator's own store holds everything it ever authored.
    sim.nodes[creator as usize]
        .chain
        .blocks()
        .filter(|b| b.creator == Some(creator))
        .filter(|b| !on_some_tip_path.contains(b.id.as_str()))
        .count()
}

pub fn summarize(sim: &Simulator) -> Vec<NodeSummary> {
    sim.nodes
        .iter()
        .map(|node| NodeSummary {
            node_id: node.id,
            tip_position: node.chain.tip().position,
            blocks_in_store: node.chain.len(),
            pending_txns: node.mempool.len(),
            inclusion_ratios: inclusion_ratios(node),
        })
        .collect()
}

/// Write the run's parameters, the accepted-block log, the per-node chain
/// dumps and the summary under a timestamped report directory.
pub fn write_reports(sim: &Simulator) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    let report_dir = sim.config.results_dir_resolved().join(format!("report_{stamp}"));
    let nodes_dir = report_dir.join("nodes");
    fs::create_dir_all(&nodes_dir)?;

    fs::write(
        report_dir.join("input_parameters.json"),
        serde_json::to_string_pretty(&sim.config)?,
    )?;
    fs::write(
        report_dir.join("accepted_blocks.json"),
        serde_json::to_string_pretty(&sim.accepted)?,
    )?;
    fs::write(
        report_dir.join("summary.json"),
        serde_json::to_string_pretty(&summarize(sim))?,
    )?;

    for node in &sim.nodes {
        let dump = NodeChainDump {
            node_id: node.id,
            tip_id: node.chain.tip_id(),
            tip_position: node.chain.tip().position,
            blocks: node.chain.blocks().collect(),
        };
        fs::write(
            nodes_dir.join(format!("{}_blockchain.json", node.id)),
            serde_json::to_string_pretty(&dump)?,
        )?;
    }

    log::info!("reports written to {:?}", report_dir);
    Ok(report_dir)
}
