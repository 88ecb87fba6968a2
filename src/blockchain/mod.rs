// Blockchain module
//
// This module contains the ledger engine:
// - Hashing
// - Merkle tree over transaction hashes
// - Proof of work search
// - Transaction grammar and balance table
// - Block sealing
// - The append-only chain

pub mod account;
pub mod aggregate;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod merkle;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use account::BalanceTable;
pub use block::{Block, Rejection, Sealed};
pub use chain::{AppendReceipt, BlockchainError, ChainError, Ledger, SharedLedger};
pub use crypto::{digest, Hash};
pub use merkle::{MerkleProof, MerkleTree};
pub use pow::{CancellationToken, Difficulty, PowError, ProofOfWork};
pub use transaction::{TransactionError, Transfer};
