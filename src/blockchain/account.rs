use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use super::transaction::{TransactionError, Transfer};

/// Mapping from account identifier to balance
///
/// Accounts that were never credited read as zero. A block carries its own
/// copy of the table; sealing the next block works on a clone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalanceTable {
    accounts: BTreeMap<String, i64>,
}

impl BalanceTable {
    /// Creates an empty balance table
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets an account's balance
    ///
    /// # Arguments
    ///
    /// * `account` - The account identifier
    ///
    /// # Returns
    ///
    /// The balance, or 0 for an unknown account
    pub fn balance(&self, account: &str) -> i64 {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    /// Sets an account's balance, creating the account if needed
    pub fn set_balance(&mut self, account: impl Into<String>, balance: i64) {
        self.accounts.insert(account.into(), balance);
    }

    /// Checks if the account has sufficient funds
    pub fn has_sufficient_funds(&self, account: &str, amount: i64) -> bool {
        self.balance(account) >= amount
    }

    /// Applies a transfer, leaving the table untouched on failure
    ///
    /// # Arguments
    ///
    /// * `transfer` - The parsed transfer to apply
    ///
    /// # Returns
    ///
    /// Ok(()) if both accounts were updated
    pub fn apply(&mut self, transfer: &Transfer) -> Result<(), TransactionError> {
        if transfer.amount <= 0 {
            return Err(TransactionError::NonPositiveAmount(transfer.amount));
        }

        let available = self.balance(&transfer.sender);
        if available < transfer.amount {
            return Err(TransactionError::InsufficientFunds {
                account: transfer.sender.clone(),
                required: transfer.amount,
                available,
            });
        }

        let debited = available - transfer.amount;

        // A self-transfer credits the already debited balance
        let receiver_before = if transfer.receiver == transfer.sender {
            debited
        } else {
            self.balance(&transfer.receiver)
        };
        let credited = receiver_before
            .checked_add(transfer.amount)
            .ok_or_else(|| TransactionError::BalanceOverflow(transfer.receiver.clone()))?;

        self.set_balance(transfer.sender.clone(), debited);
        self.set_balance(transfer.receiver.clone(), credited);

        Ok(())
    }

    /// Parses and applies a raw transaction string
    pub fn apply_raw(&mut self, raw: &str) -> Result<Transfer, TransactionError> {
        let transfer = Transfer::parse(raw)?;
        self.apply(&transfer)?;
        Ok(transfer)
    }

    /// Sum of all balances
    ///
    /// Widened to i128 so the sum itself cannot overflow.
    pub fn total(&self) -> i128 {
        self.accounts.values().map(|&balance| i128::from(balance)).sum()
    }

    /// Iterates accounts in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.accounts.iter().map(|(account, &balance)| (account.as_str(), balance))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for BalanceTable {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        BalanceTable {
            accounts: iter
                .into_iter()
                .map(|(account, balance)| (account.into(), balance))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, i64>> for BalanceTable {
    fn from(accounts: BTreeMap<String, i64>) -> Self {
        BalanceTable { accounts }
    }
}
