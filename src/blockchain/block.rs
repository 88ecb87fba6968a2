use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use std::fmt;

use super::account::BalanceTable;
use super::crypto::{digest, Hash};
use super::merkle::{MerkleProof, MerkleTree};
use super::pow::{CancellationToken, Difficulty, PowError, ProofOfWork};
use super::transaction::TransactionError;

/// A transaction skipped during balance replay, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position of the transaction in the submitted batch
    pub position: usize,

    /// The transaction as submitted
    pub transaction: String,

    /// Why it was skipped
    pub error: TransactionError,
}

/// A freshly sealed block together with the diagnostics produced while sealing it
#[derive(Debug, Clone)]
pub struct Sealed {
    pub block: Block,
    pub rejections: Vec<Rejection>,
}

/// Represents a sealed block in the chain
///
/// Fields are only readable; a block never changes after sealing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Index of the block in the chain
    index: u64,

    /// Hash of this block, satisfying the proof-of-work predicate
    id: Hash,

    /// Hash of the previous block
    previous_id: Hash,

    /// Timestamp taken when sealing started
    timestamp: DateTime<Utc>,

    /// Winning proof-of-work counter
    nonce: u64,

    /// Transactions in submitted order, rejected ones included
    transactions: Vec<String>,

    /// Merkle root over the hashes of `transactions`
    merkle_root: Hash,

    /// Balances after replaying the valid transactions
    balances: BalanceTable,
}

impl Block {
    /// Seals a new block
    ///
    /// Replays `transactions` against a copy of `previous_balances`, commits
    /// to the submitted batch with a Merkle root and mines the block id.
    /// Invalid transactions are skipped and reported; they never abort sealing.
    ///
    /// # Arguments
    ///
    /// * `index` - The index the block will take in the chain
    /// * `previous_id` - The id of the previous block
    /// * `transactions` - The submitted batch, in order
    /// * `previous_balances` - The previous block's balance snapshot
    /// * `pow` - The proof-of-work parameters
    /// * `token` - Cancels the proof-of-work search
    ///
    /// # Returns
    ///
    /// The sealed block and its rejections, or why mining stopped
    pub fn seal(
        index: u64,
        previous_id: &str,
        transactions: Vec<String>,
        previous_balances: &BalanceTable,
        pow: &ProofOfWork,
        token: &CancellationToken,
    ) -> Result<Sealed, PowError> {
        let timestamp = Utc::now();

        let (balances, rejections) = replay(previous_balances, &transactions);
        for rejection in &rejections {
            warn!(
                "Block {}: rejected transaction #{} {:?}: {}",
                index, rejection.position, rejection.transaction, rejection.error
            );
        }

        let merkle_root = MerkleTree::build(&hash_transactions(&transactions)).root();

        let (head, tail) = preimage(previous_id, &timestamp, &transactions);
        let solution = pow.solve_framed(&head, &tail, token)?;

        let block = Block {
            index,
            id: solution.hash,
            previous_id: previous_id.to_string(),
            timestamp,
            nonce: solution.nonce,
            transactions,
            merkle_root,
            balances,
        };

        Ok(Sealed { block, rejections })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn previous_id(&self) -> &str {
        &self.previous_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn transactions(&self) -> &[String] {
        &self.transactions
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    pub fn balances(&self) -> &BalanceTable {
        &self.balances
    }

    /// Recomputes the block hash from its fields and stored nonce
    pub fn calculate_hash(&self) -> Hash {
        let (head, tail) = preimage(&self.previous_id, &self.timestamp, &self.transactions);
        ProofOfWork::hash_at(&head, self.nonce, &tail)
    }

    /// Checks that the stored id matches the block's contents
    pub fn verify_id(&self) -> bool {
        self.calculate_hash() == self.id
    }

    /// Checks that the stored Merkle root matches the transactions
    pub fn verify_merkle_root(&self) -> bool {
        self.merkle_tree().root() == self.merkle_root
    }

    /// Checks the id against a difficulty
    pub fn meets_difficulty(&self, difficulty: Difficulty) -> bool {
        difficulty.is_met_by(&self.id)
    }

    /// Rebuilds the Merkle tree over this block's transactions
    pub fn merkle_tree(&self) -> MerkleTree {
        MerkleTree::build(&hash_transactions(&self.transactions))
    }

    /// Inclusion proof for the transaction at `position`
    pub fn transaction_proof(&self, position: usize) -> Option<MerkleProof> {
        self.merkle_tree().proof(position)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------------------------")?;
        writeln!(f, "Block #{}", self.index)?;
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, "Previous ID: {}", self.previous_id)?;
        writeln!(f, "Timestamp: {}", self.timestamp.to_rfc3339())?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        writeln!(f, "Merkle root: {}", self.merkle_root)?;
        writeln!(f, "Transactions:")?;
        for transaction in &self.transactions {
            writeln!(f, "  {}", transaction)?;
        }
        writeln!(f, "Balances:")?;
        for (account, balance) in self.balances.iter() {
            writeln!(f, "  {}: {}", account, balance)?;
        }
        write!(f, "-------------------------")
    }
}

/// Hashes every transaction of a batch, in order
pub fn hash_transactions(transactions: &[String]) -> Vec<Hash> {
    transactions.iter().map(|tx| digest(tx.as_bytes())).collect()
}

/// Replays a batch on a copy of `previous`, collecting rejected transactions
///
/// Does not log; validation replays historical blocks through here.
pub fn replay(previous: &BalanceTable, transactions: &[String]) -> (BalanceTable, Vec<Rejection>) {
    let mut balances = previous.clone();
    let mut rejections = Vec::new();

    for (position, transaction) in transactions.iter().enumerate() {
        if let Err(error) = balances.apply_raw(transaction) {
            rejections.push(Rejection {
                position,
                transaction: transaction.clone(),
                error,
            });
        }
    }

    (balances, rejections)
}

/// Splits the hash preimage around the nonce
///
/// The full preimage is `previous_id ‖ unix_seconds ‖ nonce ‖ tx_0 ‖ tx_1 ‖ ...`.
fn preimage(previous_id: &str, timestamp: &DateTime<Utc>, transactions: &[String]) -> (Vec<u8>, Vec<u8>) {
    let head = format!("{}{}", previous_id, timestamp.timestamp()).into_bytes();
    let tail = transactions.concat().into_bytes();
    (head, tail)
}
