pub mod block;
pub mod chain;
pub mod event;
pub mod mempool;
pub mod node;

// Explicit re-exports to avoid ambiguous glob re-exports
pub use block::{BLOCK_REWARD, Block, NodeId, Transaction};
pub use chain::ChainStore;
pub use event::{Event, EventKind, EventQueue, round4};
pub use mempool::Mempool;
pub use node::{Bandwidth, Node, NodeLabel, Peer, ReceiveOutcome};
