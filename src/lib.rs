//! In-memory append-only ledger.
//!
//! Blocks are chained by SHA-256 ids that satisfy a proof-of-work
//! predicate, commit to their transactions with a Merkle root, and carry the
//! balance table obtained by replaying their transfers.

pub mod blockchain;
pub mod config;

pub use blockchain::{Block, BlockchainError, Ledger};
pub use config::LedgerConfig;
