//! Read-only scans over a chain for callers that tally transactions.
//!
//! What a tally means is left to the caller; these helpers only walk every
//! submitted transaction of every block in chain order.

use std::collections::BTreeMap;

use super::block::Block;
use super::transaction::Transfer;

/// Counts transactions by the first needle they contain
///
/// Each transaction counts at most once, for the earliest needle in
/// `needles` that occurs in it. Needles that never match still appear with
/// a count of zero.
pub fn count_matching<S: AsRef<str>>(blocks: &[Block], needles: &[S]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = needles
        .iter()
        .map(|needle| (needle.as_ref().to_string(), 0))
        .collect();

    for transaction in transactions(blocks) {
        if let Some(needle) = needles
            .iter()
            .map(|needle| needle.as_ref())
            .find(|needle: &&str| transaction.contains(*needle))
        {
            if let Some(count) = counts.get_mut(needle) {
                *count += 1;
            }
        }
    }

    counts
}

/// Counts transactions per parsed receiver; unparsable ones are skipped
pub fn count_by_receiver(blocks: &[Block]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for transfer in transfers(blocks) {
        *counts.entry(transfer.receiver).or_insert(0) += 1;
    }
    counts
}

/// Sums amounts per parsed receiver; unparsable ones are skipped
pub fn volume_by_receiver(blocks: &[Block]) -> BTreeMap<String, i128> {
    let mut volumes = BTreeMap::new();
    for transfer in transfers(blocks) {
        *volumes.entry(transfer.receiver).or_insert(0) += i128::from(transfer.amount);
    }
    volumes
}

fn transactions(blocks: &[Block]) -> impl Iterator<Item = &str> {
    blocks
        .iter()
        .flat_map(|block| block.transactions().iter().map(String::as_str))
}

fn transfers(blocks: &[Block]) -> impl Iterator<Item = Transfer> + '_ {
    transactions(blocks).filter_map(|raw| Transfer::parse(raw).ok())
}
