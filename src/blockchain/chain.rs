use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{ConfigError, LedgerConfig};

use super::account::BalanceTable;
use super::block::{replay, Block, Rejection};
use super::crypto::Hash;
use super::pow::{CancellationToken, PowError, ProofOfWork};

/// Predecessor id recorded in the genesis block
pub const GENESIS_PREVIOUS_ID: &str = "0";

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Proof-of-work error: {0}")]
    ProofOfWork(#[from] PowError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid chain: {0}")]
    InvalidChain(#[from] ChainError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Reasons a chain fails validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Chain has no genesis block")]
    Empty,

    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(String),

    #[error("Block {index} has index {found}")]
    IndexMismatch { index: usize, found: u64 },

    #[error("Block {index} does not link to its predecessor")]
    BrokenLink { index: usize },

    #[error("Block {index} id does not match its contents")]
    IdMismatch { index: usize },

    #[error("Block {index} id does not meet difficulty {difficulty}")]
    InsufficientWork { index: usize, difficulty: usize },

    #[error("Block {index} Merkle root does not match its transactions")]
    MerkleRootMismatch { index: usize },

    #[error("Block {index} balances do not match a replay of its transactions")]
    BalanceMismatch { index: usize },
}

/// Outcome of a successful append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    /// Index of the new block
    pub index: u64,

    /// Id of the new block
    pub id: Hash,

    /// Winning nonce
    pub nonce: u64,

    /// Transactions skipped during balance replay
    pub rejections: Vec<Rejection>,
}

/// The append-only chain of sealed blocks
///
/// Blocks enter only through `append`; the chain is exposed read-only.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// Sealed blocks, genesis first; never empty
    chain: Vec<Block>,

    /// Configuration the ledger was built with
    config: LedgerConfig,

    /// Proof-of-work for blocks after genesis
    pow: ProofOfWork,

    /// Proof-of-work the genesis block was sealed with
    genesis_pow: ProofOfWork,
}

impl Ledger {
    /// Creates a ledger with the default configuration
    ///
    /// Difficulty 4, genesis balances `{A: 0, B: 10, C: 0}`, and a genesis
    /// block that satisfies the difficulty.
    pub fn new() -> Result<Self, BlockchainError> {
        Self::with_config(LedgerConfig::default())
    }

    /// Creates a ledger and seals its genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - The ledger configuration
    ///
    /// # Returns
    ///
    /// A ledger holding only the genesis block
    pub fn with_config(config: LedgerConfig) -> Result<Self, BlockchainError> {
        Self::with_config_and_token(config, &CancellationToken::new())
    }

    /// Creates a ledger, aborting the genesis search once `token` is cancelled
    pub fn with_config_and_token(
        config: LedgerConfig,
        token: &CancellationToken,
    ) -> Result<Self, BlockchainError> {
        config.validate()?;
        let pow = config.proof_of_work()?;
        let genesis_pow = config.genesis_proof_of_work()?;

        let genesis = Block::seal(
            0,
            GENESIS_PREVIOUS_ID,
            Vec::new(),
            &config.genesis_table(),
            &genesis_pow,
            token,
        )?
        .block;

        info!(
            "Created genesis block {} (nonce {}, difficulty {})",
            genesis.id(),
            genesis.nonce(),
            genesis_pow.difficulty()
        );

        Ok(Ledger {
            chain: vec![genesis],
            config,
            pow,
            genesis_pow,
        })
    }

    /// Seals a batch of transactions into a new block and appends it
    ///
    /// Invalid transactions are skipped and listed in the receipt.
    ///
    /// # Arguments
    ///
    /// * `transactions` - The batch, in order
    ///
    /// # Returns
    ///
    /// The receipt of the new block
    pub fn append<I, S>(&mut self, transactions: I) -> Result<AppendReceipt, BlockchainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.append_with_token(transactions, &CancellationToken::new())
    }

    /// Like `append`, giving up once `timeout` has elapsed
    pub fn append_with_timeout<I, S>(
        &mut self,
        transactions: I,
        timeout: Duration,
    ) -> Result<AppendReceipt, BlockchainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.append_with_token(transactions, &CancellationToken::with_timeout(timeout))
    }

    /// Like `append`, giving up once `token` is cancelled
    ///
    /// A cancelled append leaves the ledger unchanged.
    pub fn append_with_token<I, S>(
        &mut self,
        transactions: I,
        token: &CancellationToken,
    ) -> Result<AppendReceipt, BlockchainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transactions: Vec<String> = transactions.into_iter().map(Into::into).collect();
        let last = self.last_block();

        let sealed = Block::seal(
            last.index() + 1,
            last.id(),
            transactions,
            last.balances(),
            &self.pow,
            token,
        )?;

        let block = sealed.block;
        let receipt = AppendReceipt {
            index: block.index(),
            id: block.id().to_string(),
            nonce: block.nonce(),
            rejections: sealed.rejections,
        };

        info!(
            "Appended block {} with {} transactions ({} rejected), nonce {}, id {}",
            receipt.index,
            block.transactions().len(),
            receipt.rejections.len(),
            receipt.nonce,
            receipt.id
        );

        self.chain.push(block);
        Ok(receipt)
    }

    /// Gets the entire chain, genesis first
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Gets the genesis block
    pub fn genesis(&self) -> &Block {
        &self.chain[0]
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> &Block {
        // The genesis block is pushed at construction and nothing is ever removed
        &self.chain[self.chain.len() - 1]
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false; kept for the `len` convention
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Balances after the last block
    pub fn balances(&self) -> &BalanceTable {
        self.last_block().balances()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Every submitted transaction in chain order, rejected ones included
    pub fn transactions(&self) -> impl Iterator<Item = &str> {
        self.chain
            .iter()
            .flat_map(|block| block.transactions().iter().map(String::as_str))
    }

    /// Validates the chain
    ///
    /// Checks the genesis block, then for every block its index, id,
    /// proof-of-work, Merkle root, link to the predecessor and balances.
    pub fn validate(&self) -> Result<(), ChainError> {
        let genesis = self.chain.first().ok_or(ChainError::Empty)?;

        if genesis.previous_id() != GENESIS_PREVIOUS_ID {
            return Err(ChainError::InvalidGenesis(format!(
                "previous id is {:?}",
                genesis.previous_id()
            )));
        }
        if !genesis.transactions().is_empty() {
            return Err(ChainError::InvalidGenesis(
                "genesis block holds transactions".to_string(),
            ));
        }
        if *genesis.balances() != self.config.genesis_table() {
            return Err(ChainError::InvalidGenesis(
                "balances differ from the configured genesis balances".to_string(),
            ));
        }

        for (index, block) in self.chain.iter().enumerate() {
            if block.index() != index as u64 {
                return Err(ChainError::IndexMismatch {
                    index,
                    found: block.index(),
                });
            }

            if !block.verify_id() {
                return Err(ChainError::IdMismatch { index });
            }

            let difficulty = if index == 0 {
                self.genesis_pow.difficulty()
            } else {
                self.pow.difficulty()
            };
            if !block.meets_difficulty(difficulty) {
                return Err(ChainError::InsufficientWork {
                    index,
                    difficulty: difficulty.zeros(),
                });
            }

            if !block.verify_merkle_root() {
                return Err(ChainError::MerkleRootMismatch { index });
            }

            if index > 0 {
                let previous = &self.chain[index - 1];

                if block.previous_id() != previous.id() {
                    return Err(ChainError::BrokenLink { index });
                }

                let (expected, _) = replay(previous.balances(), block.transactions());
                if expected != *block.balances() {
                    return Err(ChainError::BalanceMismatch { index });
                }
            }
        }

        Ok(())
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if the blockchain is valid, false otherwise
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// A ledger shared between threads
///
/// `append` holds the lock across reading the last block, sealing and
/// pushing, so concurrent appends are serialised.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        SharedLedger {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Appends a batch under the ledger lock
    pub fn append<I, S>(&self, transactions: I) -> Result<AppendReceipt, BlockchainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()?.append(transactions)
    }

    /// Appends a batch under the ledger lock, giving up once `token` is cancelled
    pub fn append_with_token<I, S>(
        &self,
        transactions: I,
        token: &CancellationToken,
    ) -> Result<AppendReceipt, BlockchainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()?.append_with_token(transactions, token)
    }

    /// Gets a copy of the entire chain
    pub fn get_chain(&self) -> Result<Vec<Block>, BlockchainError> {
        Ok(self.lock()?.chain().to_vec())
    }

    /// Runs `f` against the ledger while holding the lock
    pub fn read<R>(&self, f: impl FnOnce(&Ledger) -> R) -> Result<R, BlockchainError> {
        let ledger = self.lock()?;
        Ok(f(&*ledger))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, BlockchainError> {
        self.inner
            .lock()
            .map_err(|_| BlockchainError::SystemError("ledger lock poisoned".to_string()))
    }
}
