use anyhow::Result;
use bincode::config;
use once_cell::sync::Lazy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub static BINCODE_CONFIG: Lazy<config::Configuration> = Lazy::new(|| config::standard());

/// Simulated node identifier. Node 0 is the adversary when an attack is configured.
pub type NodeId = u64;

/// Coinbase reward credited to a block creator.
pub const BLOCK_REWARD: f64 = 50.0;

/// Transaction: payer / payee / value / simulated timestamp / content-derived id.
/// A coinbase (or genesis grant) carries no payer.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String, // hex
    pub payer: Option<NodeId>,
    pub payee: NodeId,
    pub value: f64,
    pub timestamp: f64,
}

impl Transaction {
    /// Ordinary value transfer between two nodes.
    pub fn transfer(payer: NodeId, payee: NodeId, value: f64, timestamp: f64) -> Self {
        Transaction {
            id: String::new(),
            payer: Some(payer),
            payee,
            value,
            timestamp,
        }
        .with_id()
    }

    /// Reward transaction paying the block creator.
    pub fn coinbase(creator: NodeId, timestamp: f64) -> Self {
        Transaction {
            id: String::new(),
            payer: None,
            payee: creator,
            value: BLOCK_REWARD,
            timestamp,
        }
        .with_id()
    }

    /// Initial coin grant used to seed genesis balances.
    pub fn grant(payee: NodeId, value: f64) -> Self {
        Transaction {
            id: String::new(),
            payer: None,
            payee,
            value,
            timestamp: 0.0,
        }
        .with_id()
    }

    /// Deterministic serialization for hashing: floats go in as raw bits.
    fn serialize_for_hash(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        Ok(bincode::encode_to_vec(
            &(
                self.payer,
                self.payee,
                self.value.to_bits(),
                self.timestamp.to_bits(),
            ),
            *BINCODE_CONFIG,
        )?)
    }

    pub fn compute_id(&self) -> Result<String> {
        let bytes = self.serialize_for_hash()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub fn with_id(mut self) -> Self {
        if let Ok(id) = self.compute_id() {
            self.id = id;
        }
        self
    }

    pub fn is_coinbase(&self) -> bool {
        self.payer.is_none()
    }
}

/// Block: parent link, depth, transactions, coinbase, and a full snapshot of
/// account balances as of this block. Blocks are value types; every delivery
/// between nodes is a clone.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub id: String, // hex
    pub parent_id: Option<String>,
    pub position: u64,
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    /// None only for genesis.
    pub coinbase: Option<Transaction>,
    /// node id -> balance at this block
    pub balances: HashMap<NodeId, f64>,
    /// None only for genesis.
    pub creator: Option<NodeId>,
}

impl Block {
    pub fn new(
        parent_id: String,
        position: u64,
        transactions: Vec<Transaction>,
        coinbase: Transaction,
        balances: HashMap<NodeId, f64>,
        creator: NodeId,
    ) -> Self {
        Block {
            id: String::new(),
            parent_id: Some(parent_id),
            position,
            timestamp: 0.0,
            transactions,
            coinbase: Some(coinbase),
            balances,
            creator: Some(creator),
        }
        .with_id()
    }

    /// Genesis: position 0, no parent, no coinbase, balances seeded from grants.
    pub fn genesis(grants: Vec<Transaction>, balances: HashMap<NodeId, f64>) -> Self {
        Block {
            id: String::new(),
            parent_id: None,
            position: 0,
            timestamp: 0.0,
            transactions: grants,
            coinbase: None,
            balances,
            creator: None,
        }
        .with_id()
    }

    /// Stable hash over (timestamp, transaction ids incl. coinbase).
    pub fn compute_id(&self) -> Result<String> {
        let mut txids: Vec<&str> = self.transactions.iter().map(|t| t.id.as_str()).collect();
        if let Some(cb) = &self.coinbase {
            txids.push(cb.id.as_str());
        }
        let bytes = bincode::encode_to_vec(&(self.timestamp.to_bits(), txids), *BINCODE_CONFIG)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub fn with_id(mut self) -> Self {
        if let Ok(id) = self.compute_id() {
            self.id = id;
        }
        self
    }

    /// Stamp the mining-completion time and refresh the derived ids.
    /// The coinbase id depends on the block timestamp, so it is rebuilt first.
    pub fn seal(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
        if let Some(cb) = &mut self.coinbase {
            cb.timestamp = timestamp;
            if let Ok(id) = cb.compute_id() {
                cb.id = id;
            }
        }
        if let Ok(id) = self.compute_id() {
            self.id = id;
        }
    }

    pub fn balance_sum(&self) -> f64 {
        self.balances.values().sum()
    }
}

/// Round a balance to 5 decimal places for snapshot comparison.
pub fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txid_is_stable() {
        let a = Transaction::transfer(1, 2, 12.5, 3.25);
        let b = Transaction::transfer(1, 2, 12.5, 3.25);
        assert_eq!(a.id.len(), 64);
        assert_eq!(a.id, b.id);

        let c = Transaction::transfer(1, 2, 12.5, 3.26);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn coinbase_ids_differ_per_creator_and_time() {
        let a = Transaction::coinbase(1, 10.0);
        let b = Transaction::coinbase(2, 10.0);
        let c = Transaction::coinbase(1, 11.0);
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn seal_refreshes_block_and_coinbase_ids() {
        let genesis = Block::genesis(
            vec![Transaction::grant(0, 100.0), Transaction::grant(1, 100.0)],
            HashMap::from([(0, 100.0), (1, 100.0)]),
        );
        let mut balances = genesis.balances.clone();
        *balances.get_mut(&0).unwrap() += BLOCK_REWARD;
        let mut block = Block::new(
            genesis.id.clone(),
            1,
            vec![],
            Transaction::coinbase(0, 0.0),
            balances,
            0,
        );

        let unsealed_id = block.id.clone();
        let unsealed_cb = block.coinbase.as_ref().unwrap().id.clone();
        block.seal(7.1234);

        assert_eq!(block.timestamp, 7.1234);
        assert_ne!(block.id, unsealed_id);
        assert_ne!(block.coinbase.as_ref().unwrap().id, unsealed_cb);
        assert_eq!(block.coinbase.as_ref().unwrap().timestamp, 7.1234);
    }

    #[test]
    fn genesis_sum_matches_grants() {
        let genesis = Block::genesis(
            vec![Transaction::grant(0, 60.0), Transaction::grant(1, 40.0)],
            HashMap::from([(0, 60.0), (1, 40.0)]),
        );
        assert_eq!(genesis.position, 0);
        assert!(genesis.parent_id.is_none());
        assert_eq!(genesis.balance_sum(), 100.0);
    }

    #[test]
    fn round5_snaps_float_noise() {
        assert_eq!(round5(10.000001), 10.0);
        assert_eq!(round5(0.1 + 0.2), 0.3);
    }
}
