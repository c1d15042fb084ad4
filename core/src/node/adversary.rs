use super::{Node, NodeLabel};
use crate::block::Block;

/// Block-withholding reactions. The adversary mines like any other node but
/// keeps its blocks in `withheld` (oldest first) instead of publishing them;
/// releases happen here, in reaction to honest blocks entering its store.
impl Node {
    /// React to an honest block this node just accepted. Returns the
    /// withheld blocks to publish now, oldest first.
    ///
    /// Selfish: a matched 2-lead publishes the whole queue at once (the
    /// private chain becomes the public one); any other matched head
    /// publishes exactly one block. Stubborn: always one block, never bulk.
    /// Either way, the queue is abandoned once the honest chain takes the
    /// tip from under it.
    pub fn release_withheld(&mut self, honest: &Block) -> Vec<Block> {
        if self.label == NodeLabel::Honest || self.withheld.is_empty() {
            return Vec::new();
        }

        // Outpaced: the honest block is now our tip, the private lead is gone.
        if self.chain.tip_id() == honest.id {
            log::debug!(
                "node {}: public chain took the tip, discarding {} withheld block(s)",
                self.id,
                self.withheld.len()
            );
            self.withheld.clear();
            return Vec::new();
        }

        let head_position = match self.withheld.front() {
            Some(block) => block.position,
            None => return Vec::new(),
        };
        if head_position != honest.position {
            return Vec::new();
        }

        match self.label {
            NodeLabel::Selfish if self.withheld.len() == 2 => {
                log::debug!(
                    "node {}: 2-lead matched at position {}, releasing the full private chain",
                    self.id,
                    honest.position
                );
                self.withheld.drain(..).collect()
            }
            NodeLabel::Selfish | NodeLabel::Stubborn => {
                log::debug!(
                    "node {}: matched at position {}, releasing one withheld block",
                    self.id,
                    honest.position
                );
                self.withheld.pop_front().into_iter().collect()
            }
            NodeLabel::Honest => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, NodeId, Transaction};
    use crate::node::{Bandwidth, ReceiveOutcome};
    use std::collections::HashMap;

    fn genesis() -> Block {
        Block::genesis(
            vec![Transaction::grant(0, 100.0), Transaction::grant(1, 100.0)],
            HashMap::from([(0, 100.0), (1, 100.0)]),
        )
    }

    fn adversary(label: NodeLabel) -> Node {
        Node::new(0, Bandwidth::Fast, label, 0.4, 10, genesis())
    }

    fn honest_miner(id: NodeId) -> Node {
        Node::new(id, Bandwidth::Fast, NodeLabel::Honest, 0.6, 10, genesis())
    }

    /// Mine one block privately and queue it, the way the driver does on a
    /// mining completion for a withholding node.
    fn mine_withheld(node: &mut Node, now: f64) -> Block {
        let block = node.mine_block(node.build_candidate(), now).unwrap();
        node.withheld.push_back(block.clone());
        block
    }

    #[test]
    fn matched_lead_of_one_releases_the_block() {
        let mut adv = adversary(NodeLabel::Selfish);
        let mut miner = honest_miner(1);

        let private = mine_withheld(&mut adv, 1.0);
        let public = miner.mine_block(miner.build_candidate(), 1.2).unwrap();

        match adv.receive_block(public.clone()) {
            ReceiveOutcome::Accepted { tip_advanced, .. } => assert!(!tip_advanced),
            outcome => panic!("expected stored sibling, got {outcome:?}"),
        }
        let released = adv.release_withheld(&public);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, private.id);
        assert!(adv.withheld.is_empty());
    }

    #[test]
    fn matched_two_lead_releases_everything_for_selfish() {
        let mut adv = adversary(NodeLabel::Selfish);
        let mut miner = honest_miner(1);

        let p1 = mine_withheld(&mut adv, 1.0);
        let p2 = mine_withheld(&mut adv, 2.0);
        let public = miner.mine_block(miner.build_candidate(), 2.5).unwrap();

        adv.receive_block(public.clone());
        let released = adv.release_withheld(&public);
        assert_eq!(released.len(), 2);
        assert_eq!(released[0].id, p1.id);
        assert_eq!(released[1].id, p2.id);
        assert!(adv.withheld.is_empty());
    }

    #[test]
    fn stubborn_never_bulk_releases() {
        let mut adv = adversary(NodeLabel::Stubborn);
        let mut miner = honest_miner(1);

        mine_withheld(&mut adv, 1.0);
        let p2 = mine_withheld(&mut adv, 2.0);
        let public = miner.mine_block(miner.build_candidate(), 2.5).unwrap();

        adv.receive_block(public.clone());
        let released = adv.release_withheld(&public);
        assert_eq!(released.len(), 1);
        assert_eq!(adv.withheld.len(), 1);
        assert_eq!(adv.withheld.front().unwrap().id, p2.id);
    }

    #[test]
    fn long_lead_drips_one_block_per_match() {
        let mut adv = adversary(NodeLabel::Selfish);
        let mut miner = honest_miner(1);

        let p1 = mine_withheld(&mut adv, 1.0);
        mine_withheld(&mut adv, 2.0);
        mine_withheld(&mut adv, 3.0);
        let public = miner.mine_block(miner.build_candidate(), 3.5).unwrap();

        adv.receive_block(public.clone());
        let released = adv.release_withheld(&public);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, p1.id);
        assert_eq!(adv.withheld.len(), 2);
    }

    #[test]
    fn unmatched_honest_block_releases_nothing() {
        let mut adv = adversary(NodeLabel::Selfish);
        let mut miner = honest_miner(1);

        // Private chain two deep; honest chain arrives only at depth 1 but
        // the queue head is ahead of it after an earlier release.
        mine_withheld(&mut adv, 1.0);
        let p2 = mine_withheld(&mut adv, 2.0);
        adv.withheld.pop_front();
        assert_eq!(adv.withheld.front().unwrap().id, p2.id);

        let public = miner.mine_block(miner.build_candidate(), 2.5).unwrap();
        adv.receive_block(public.clone());
        assert!(adv.release_withheld(&public).is_empty());
        assert_eq!(adv.withheld.len(), 1);
    }

    #[test]
    fn queue_is_abandoned_when_public_chain_takes_the_tip() {
        let mut adv = adversary(NodeLabel::Stubborn);
        let mut miner = honest_miner(1);

        // A stale private block that no longer matches the public frontier.
        let stale = mine_withheld(&mut adv, 1.0);
        adv.withheld.clear();
        adv.withheld.push_back(stale);

        // Public chain overtakes: depth 1 sibling then depth 2 on top of it.
        let h1 = miner.mine_block(miner.build_candidate(), 1.2).unwrap();
        let h2 = miner.mine_block(miner.build_candidate(), 2.2).unwrap();
        adv.receive_block(h1);
        match adv.receive_block(h2.clone()) {
            ReceiveOutcome::Accepted { tip_advanced, .. } => assert!(tip_advanced),
            outcome => panic!("expected reorg onto public chain, got {outcome:?}"),
        }

        assert!(adv.release_withheld(&h2).is_empty());
        assert!(adv.withheld.is_empty());
    }

    #[test]
    fn honest_nodes_never_release() {
        let mut honest = honest_miner(1);
        let mut miner = honest_miner(0);
        let public = miner.mine_block(miner.build_candidate(), 1.0).unwrap();
        honest.receive_block(public.clone());
        assert!(honest.release_withheld(&public).is_empty());
    }
}
