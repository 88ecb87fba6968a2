use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Separates the sender from the receiver
const TRANSFER_ARROW: &str = "->";

/// Separates the receiver from the amount
const AMOUNT_SEPARATOR: char = ':';

/// Characters an account identifier may not contain
const RESERVED_CHARS: [char; 3] = ['-', '>', ':'];

/// Reasons a single transaction is rejected during balance replay
///
/// None of these abort block sealing; the offending transaction is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Parse(String),

    #[error("Amount must be positive: {0}")]
    NonPositiveAmount(i64),

    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: String,
        required: i64,
        available: i64,
    },

    #[error("Balance of {0} would overflow")]
    BalanceOverflow(String),
}

/// A parsed `sender->receiver:amount` transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transfer {
    /// Account debited
    pub sender: String,

    /// Account credited
    pub receiver: String,

    /// Amount moved, always positive
    pub amount: i64,
}

impl Transfer {
    /// Creates a transfer, checking identifiers and amount
    pub fn new(sender: &str, receiver: &str, amount: i64) -> Result<Self, TransactionError> {
        validate_identifier(sender)?;
        validate_identifier(receiver)?;

        if amount <= 0 {
            return Err(TransactionError::NonPositiveAmount(amount));
        }

        Ok(Transfer {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
        })
    }

    /// Parses the textual form of a transaction
    ///
    /// # Arguments
    ///
    /// * `raw` - A string of the form `sender->receiver:amount`
    ///
    /// # Returns
    ///
    /// The parsed transfer, `Parse` for grammar violations, or
    /// `NonPositiveAmount` for a well-formed amount that is zero or negative
    pub fn parse(raw: &str) -> Result<Self, TransactionError> {
        let (sender, rest) = raw
            .split_once(TRANSFER_ARROW)
            .ok_or_else(|| TransactionError::Parse(format!("missing '->' in {:?}", raw)))?;

        let (receiver, amount) = rest
            .split_once(AMOUNT_SEPARATOR)
            .ok_or_else(|| TransactionError::Parse(format!("missing ':' in {:?}", raw)))?;

        let amount = parse_amount(amount)?;

        Transfer::new(sender, receiver, amount)
    }
}

/// Parses a base-10 amount: ASCII digits, optionally preceded by a single `-`
///
/// Signs other than `-` and surrounding whitespace are grammar violations.
fn parse_amount(text: &str) -> Result<i64, TransactionError> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TransactionError::Parse(format!("invalid amount {:?}", text)));
    }

    text.parse()
        .map_err(|e| TransactionError::Parse(format!("invalid amount {:?}: {}", text, e)))
}

impl FromStr for Transfer {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transfer::parse(s)
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.sender, TRANSFER_ARROW, self.receiver, AMOUNT_SEPARATOR, self.amount
        )
    }
}

/// Checks that an account identifier is non-empty and free of grammar characters
pub fn validate_identifier(identifier: &str) -> Result<(), TransactionError> {
    if identifier.is_empty() {
        return Err(TransactionError::Parse("empty account identifier".to_string()));
    }

    if let Some(c) = identifier.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(TransactionError::Parse(format!(
            "account identifier {:?} contains reserved character {:?}",
            identifier, c
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::account::BalanceTable;

    #[test]
    fn test_parse_transaction() {
        let transfer = Transfer::parse("B->A:5").unwrap();

        assert_eq!(transfer.sender, "B");
        assert_eq!(transfer.receiver, "A");
        assert_eq!(transfer.amount, 5);
        assert_eq!(transfer.to_string(), "B->A:5");
    }

    #[test]
    fn test_parse_multi_character_identifiers() {
        let transfer: Transfer = "alice->bob_2:1200".parse().unwrap();

        assert_eq!(transfer.sender, "alice");
        assert_eq!(transfer.receiver, "bob_2");
        assert_eq!(transfer.amount, 1200);
    }

    #[test]
    fn test_malformed_transactions() {
        for raw in [
            "",
            "B-A:5",
            "B->A5",
            "->A:5",
            "B->:5",
            "B->A:",
            "B->A:five",
            "B->A:5.0",
            "B->A->C:5",
            "B->A:C:5",
            "B->A:99999999999999999999",
            "B->A:+5",
            "B->A: 5",
            "B->A:5 ",
            "B->A:--5",
            "B->A:-",
        ] {
            match Transfer::parse(raw) {
                Err(TransactionError::Parse(_)) => {}
                other => panic!("expected parse error for {:?}, got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_non_positive_amounts() {
        assert_eq!(
            Transfer::parse("B->A:0"),
            Err(TransactionError::NonPositiveAmount(0))
        );
        assert_eq!(
            Transfer::parse("B->A:-5"),
            Err(TransactionError::NonPositiveAmount(-5))
        );
        assert_eq!(
            Transfer::parse("B->A:-0"),
            Err(TransactionError::NonPositiveAmount(0))
        );
    }

    #[test]
    fn test_signed_amount_leaves_balances_untouched() {
        let mut balances: BalanceTable = [("A", 0), ("B", 10)].into_iter().collect();

        assert!(matches!(
            balances.apply_raw("B->A:+5"),
            Err(TransactionError::Parse(_))
        ));
        assert_eq!(balances.balance("A"), 0);
        assert_eq!(balances.balance("B"), 10);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("voter42").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("a>b").is_err());
        assert!(validate_identifier("a:b").is_err());
    }
}
