use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use pow_ledger::blockchain::aggregate;
use pow_ledger::{Ledger, LedgerConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "ledger",
    version,
    about = "Append transaction batches to an in-memory proof-of-work ledger"
)]
struct Cli {
    /// JSON config file (difficulty, genesis_balances, genesis_proof_of_work, mining_workers)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured difficulty
    #[arg(long)]
    difficulty: Option<usize>,

    /// Override the number of mining threads
    #[arg(long)]
    workers: Option<usize>,

    /// Give up on a block after this many seconds of mining
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Comma-separated batch of `sender->receiver:amount` transactions; repeat for more blocks
    #[arg(short, long = "batch")]
    batches: Vec<String>,

    /// Count transactions containing this text (first match wins); repeatable
    #[arg(long = "tally")]
    tallies: Vec<String>,

    /// Count transactions per receiver
    #[arg(long)]
    by_receiver: bool,

    /// Print the chain as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn load_config(cli: &Cli) -> Result<LedgerConfig> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => LedgerConfig::default(),
    };

    if let Some(difficulty) = cli.difficulty {
        config = config.with_difficulty(difficulty);
    }
    if let Some(workers) = cli.workers {
        config = config.with_mining_workers(workers);
    }

    config.validate()?;
    Ok(config)
}

fn split_batch(batch: &str) -> Vec<String> {
    batch
        .split(',')
        .map(str::trim)
        .filter(|tx| !tx.is_empty())
        .map(str::to_string)
        .collect()
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(
        "Starting ledger with difficulty {} and {} mining worker(s)",
        config.difficulty, config.mining_workers
    );

    let mut ledger = Ledger::with_config(config)?;

    for batch in &cli.batches {
        let transactions = split_batch(batch);
        // Rejected transactions are logged while sealing
        match cli.timeout_secs {
            Some(secs) => ledger.append_with_timeout(transactions, Duration::from_secs(secs)),
            None => ledger.append(transactions),
        }
        .with_context(|| format!("sealing batch {:?}", batch))?;
    }

    if let Err(err) = ledger.validate() {
        bail!("ledger failed validation: {}", err);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(ledger.chain())?);
    } else {
        println!("=== Blockchain ===");
        for block in ledger.chain() {
            println!("{}", block);
        }
    }

    if !cli.tallies.is_empty() {
        println!("\n=== Tally ===");
        for (needle, count) in aggregate::count_matching(ledger.chain(), cli.tallies.as_slice()) {
            println!("{}: {}", needle, count);
        }
    }

    if cli.by_receiver {
        println!("\n=== Transactions per receiver ===");
        for (receiver, count) in aggregate::count_by_receiver(ledger.chain()) {
            println!("{}: {}", receiver, count);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_batch() {
        assert_eq!(
            split_batch(" B->A:5, B->C:3 ,,"),
            vec!["B->A:5".to_string(), "B->C:3".to_string()]
        );
        assert!(split_batch("").is_empty());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["ledger", "--difficulty", "2", "--workers", "3", "-b", "B->A:1"]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.difficulty, 2);
        assert_eq!(config.mining_workers, 3);
        assert_eq!(cli.batches, vec!["B->A:1".to_string()]);
    }

    #[test]
    fn test_cli_rejects_invalid_override() {
        let cli = Cli::parse_from(["ledger", "--workers", "0"]);

        assert!(load_config(&cli).is_err());
    }
}
