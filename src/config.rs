use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeMap;
use std::path::Path;

use crate::blockchain::account::BalanceTable;
use crate::blockchain::pow::{Difficulty, ProofOfWork, DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use crate::blockchain::transaction::validate_identifier;

/// Errors that can occur while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Ledger configuration
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Leading zero hex characters required in every block id
    pub difficulty: usize,

    /// Balances recorded in the genesis block
    pub genesis_balances: BTreeMap<String, i64>,

    /// Whether the genesis block must satisfy the difficulty as well
    pub genesis_proof_of_work: bool,

    /// Threads used for the nonce search
    pub mining_workers: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: DEFAULT_DIFFICULTY,
            genesis_balances: default_genesis_balances(),
            genesis_proof_of_work: true,
            mining_workers: 1,
        }
    }
}

/// Three seed accounts: A and C empty, B holding 10
fn default_genesis_balances() -> BTreeMap<String, i64> {
    [("A", 0), ("B", 10), ("C", 0)]
        .into_iter()
        .map(|(account, balance)| (account.to_string(), balance))
        .collect()
}

impl LedgerConfig {
    /// Loads and validates a JSON config file
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the config file
    ///
    /// # Returns
    ///
    /// The validated configuration
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parses and validates a JSON config document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_difficulty(self, difficulty: usize) -> Self {
        LedgerConfig { difficulty, ..self }
    }

    pub fn with_genesis_balances<I, K>(self, balances: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        LedgerConfig {
            genesis_balances: balances
                .into_iter()
                .map(|(account, balance)| (account.into(), balance))
                .collect(),
            ..self
        }
    }

    pub fn with_genesis_proof_of_work(self, genesis_proof_of_work: bool) -> Self {
        LedgerConfig {
            genesis_proof_of_work,
            ..self
        }
    }

    pub fn with_mining_workers(self, mining_workers: usize) -> Self {
        LedgerConfig {
            mining_workers,
            ..self
        }
    }

    /// Checks every value against its valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds maximum {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }

        if self.mining_workers == 0 {
            return Err(ConfigError::Invalid(
                "mining_workers must be at least 1".to_string(),
            ));
        }

        for (account, &balance) in &self.genesis_balances {
            validate_identifier(account)
                .map_err(|e| ConfigError::Invalid(format!("genesis account: {}", e)))?;

            if balance < 0 {
                return Err(ConfigError::Invalid(format!(
                    "genesis balance of {} is negative: {}",
                    account, balance
                )));
            }
        }

        Ok(())
    }

    /// Proof-of-work parameters for every block after genesis
    pub fn proof_of_work(&self) -> Result<ProofOfWork, ConfigError> {
        let difficulty = Difficulty::new(self.difficulty)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(ProofOfWork::new(difficulty).with_workers(self.mining_workers))
    }

    /// Proof-of-work parameters for the genesis block
    ///
    /// With `genesis_proof_of_work` disabled the genesis block is sealed at
    /// zero difficulty, so the first nonce wins.
    pub fn genesis_proof_of_work(&self) -> Result<ProofOfWork, ConfigError> {
        if self.genesis_proof_of_work {
            self.proof_of_work()
        } else {
            Ok(ProofOfWork::new(Difficulty::none()))
        }
    }

    /// Genesis balances as a table
    pub fn genesis_table(&self) -> BalanceTable {
        BalanceTable::from(self.genesis_balances.clone())
    }
}
