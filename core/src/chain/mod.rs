use crate::block::Block;
use std::collections::{HashMap, HashSet};

/// Per-node view of the block tree.
///
/// The store is a tree keyed by block id, not a linear chain: siblings
/// coexist and children are found by walking parent links. `tip` is the
/// block this node currently treats as head of its best chain. Blocks whose
/// parent has not arrived yet are parked in `orphans`, keyed by the missing
/// parent id (one orphan per missing parent).
#[derive(Debug, Clone)]
pub struct ChainStore {
    blocks: HashMap<String, Block>,
    tip: String,
    orphans: HashMap<String, Block>,
}

impl ChainStore {
    pub fn new(genesis: Block) -> Self {
        let tip = genesis.id.clone();
        let mut blocks = HashMap::new();
        blocks.insert(genesis.id.clone(), genesis);
        ChainStore {
            blocks,
            tip,
            orphans: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn tip(&self) -> &Block {
        &self.blocks[&self.tip]
    }

    pub fn tip_id(&self) -> &str {
        &self.tip
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Insert a block whose parent is already present. Tip promotion is a
    /// separate decision taken by the caller.
    pub fn insert(&mut self, block: Block) {
        self.blocks.insert(block.id.clone(), block);
    }

    pub fn promote(&mut self, id: &str) {
        debug_assert!(self.blocks.contains_key(id));
        self.tip = id.to_string();
    }

    /// Park a block that arrived before its parent. First arrival wins the slot.
    pub fn park_orphan(&mut self, block: Block) {
        if let Some(parent) = block.parent_id.clone() {
            self.orphans.entry(parent).or_insert(block);
        }
    }

    /// Remove and return the orphan waiting on `parent_id`, if any.
    pub fn take_orphan_of(&mut self, parent_id: &str) -> Option<Block> {
        self.orphans.remove(parent_id)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Walk from `id` back to genesis, inclusive.
    pub fn ancestry(&self, id: &str) -> Vec<&Block> {
        let mut path = Vec::new();
        let mut current = self.blocks.get(id);
        while let Some(block) = current {
            path.push(block);
            current = block.parent_id.as_deref().and_then(|p| self.blocks.get(p));
        }
        path
    }

    /// First common block on the ancestries of `a` and `b` (possibly one of
    /// them). Both chains share genesis, so a result always exists for
    /// blocks in the store.
    pub fn common_ancestor(&self, a: &str, b: &str) -> Option<String> {
        let on_a: HashSet<&str> = self.ancestry(a).iter().map(|blk| blk.id.as_str()).collect();

        let mut current = self.blocks.get(b);
        while let Some(block) = current {
            if on_a.contains(block.id.as_str()) {
                return Some(block.id.clone());
            }
            current = block.parent_id.as_deref().and_then(|p| self.blocks.get(p));
        }
        None
    }

    /// Block ids from `descendant` down to `ancestor`, newest first,
    /// excluding `ancestor` itself. Empty when the two coincide.
    pub fn path_between(&self, descendant: &str, ancestor: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = descendant;
        while current != ancestor {
            let Some(block) = self.blocks.get(current) else {
                break;
            };
            path.push(block.id.clone());
            match block.parent_id.as_deref() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        path
    }

    pub fn max_position(&self) -> u64 {
        self.blocks.values().map(|b| b.position).max().unwrap_or(0)
    }
}
