use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use tokio_util::sync;

use std::fmt;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::crypto::{meets_difficulty, Hash};

/// Longest zero run a 64-character hex digest can carry
pub const MAX_DIFFICULTY: usize = 64;

/// Difficulty used when none is configured
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Attempts between two polls of the cancellation token
const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Errors that can occur during proof-of-work search
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PowError {
    #[error("Proof-of-work search was cancelled")]
    Cancelled,

    #[error("Nonce space exhausted without a satisfying hash")]
    Exhausted,

    #[error("Invalid difficulty {0} (maximum {MAX_DIFFICULTY})")]
    InvalidDifficulty(usize),
}

/// Number of leading `'0'` hex characters a hash must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Difficulty(usize);

impl Difficulty {
    /// Creates a difficulty, rejecting values a SHA-256 hex digest can never meet
    pub fn new(zeros: usize) -> Result<Self, PowError> {
        if zeros > MAX_DIFFICULTY {
            return Err(PowError::InvalidDifficulty(zeros));
        }
        Ok(Difficulty(zeros))
    }

    /// A difficulty every hash satisfies
    pub fn none() -> Self {
        Difficulty(0)
    }

    pub fn zeros(&self) -> usize {
        self.0
    }

    /// Checks whether `hash` satisfies this difficulty
    pub fn is_met_by(&self, hash: &str) -> bool {
        meets_difficulty(hash, self.0)
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty(DEFAULT_DIFFICULTY)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cooperative cancellation for a proof-of-work search
///
/// Wraps a `tokio_util` token, so clones share the same flag and a caller
/// holding the inner token can stop a search from async code. An optional
/// deadline cancels the search once it has passed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: sync::CancellationToken,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Creates a token that only cancels when `cancel` is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that also cancels once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        CancellationToken {
            inner: sync::CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Signals every holder of this token and its children to stop
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.is_cancelled() {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Creates a token cancelled along with this one, but which can also be
    /// cancelled on its own; the deadline is inherited
    pub fn child_token(&self) -> Self {
        CancellationToken {
            inner: self.inner.child_token(),
            deadline: self.deadline,
        }
    }
}

impl From<sync::CancellationToken> for CancellationToken {
    fn from(inner: sync::CancellationToken) -> Self {
        CancellationToken {
            inner,
            deadline: None,
        }
    }
}

/// A satisfying nonce and the digest it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: Hash,
}

/// Nonce search against a difficulty predicate
///
/// With one worker the smallest satisfying nonce is returned. With several
/// workers the nonce space is interleaved across threads and the first
/// winner is returned, which is a satisfying nonce but not necessarily the
/// smallest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: Difficulty,
    workers: usize,
}

impl ProofOfWork {
    pub fn new(difficulty: Difficulty) -> Self {
        ProofOfWork {
            difficulty,
            workers: 1,
        }
    }

    /// Sets the number of search threads (at least one)
    pub fn with_workers(self, workers: usize) -> Self {
        ProofOfWork {
            workers: workers.max(1),
            ..self
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Searches for a nonce such that `digest(prefix ‖ nonce)` meets the difficulty
    ///
    /// The nonce is appended in decimal form.
    pub fn solve(&self, prefix: &[u8], token: &CancellationToken) -> Result<Solution, PowError> {
        self.solve_framed(prefix, &[], token)
    }

    /// Searches for a nonce such that `digest(head ‖ nonce ‖ tail)` meets the difficulty
    ///
    /// # Arguments
    ///
    /// * `head` - Bytes hashed before the nonce
    /// * `tail` - Bytes hashed after the nonce
    /// * `token` - Polled periodically; the search stops once it is cancelled
    ///
    /// # Returns
    ///
    /// The winning nonce and digest, or why the search stopped
    pub fn solve_framed(
        &self,
        head: &[u8],
        tail: &[u8],
        token: &CancellationToken,
    ) -> Result<Solution, PowError> {
        let mut base = Sha256::new();
        base.update(head);

        if self.workers == 1 {
            return search(&base, tail, self.difficulty, 0, 1, token);
        }

        // Cancelled by the caller, or by the first worker to win
        let stop = token.child_token();
        let winner: Mutex<Option<Solution>> = Mutex::new(None);
        let stride = self.workers as u64;

        thread::scope(|scope| {
            for start in 0..stride {
                let base = &base;
                let stop = &stop;
                let winner = &winner;
                scope.spawn(move || {
                    if let Ok(solution) = search(base, tail, self.difficulty, start, stride, stop) {
                        if let Ok(mut slot) = winner.lock() {
                            slot.get_or_insert(solution);
                        }
                        stop.cancel();
                    }
                });
            }
        });

        let found = winner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match found {
            Some(solution) => Ok(solution),
            None if token.is_cancelled() => Err(PowError::Cancelled),
            None => Err(PowError::Exhausted),
        }
    }

    /// Recomputes `digest(head ‖ nonce ‖ tail)` for a known nonce
    pub fn hash_at(head: &[u8], nonce: u64, tail: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(head);
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(tail);
        hex::encode(hasher.finalize())
    }
}

/// Tries `start`, `start + stride`, `start + 2 * stride`, ... until a hash meets the difficulty
fn search(
    base: &Sha256,
    tail: &[u8],
    difficulty: Difficulty,
    start: u64,
    stride: u64,
    token: &CancellationToken,
) -> Result<Solution, PowError> {
    let mut nonce = start;
    let mut attempts: u64 = 0;

    loop {
        if attempts % CANCEL_POLL_INTERVAL == 0 && token.is_cancelled() {
            debug!("Proof-of-work search stopped after {} attempts", attempts);
            return Err(PowError::Cancelled);
        }

        let mut hasher = base.clone();
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(tail);
        let hash = hex::encode(hasher.finalize());

        if difficulty.is_met_by(&hash) {
            debug!("Found nonce {} after {} attempts", nonce, attempts + 1);
            return Ok(Solution { nonce, hash });
        }

        attempts += 1;
        nonce = nonce.checked_add(stride).ok_or(PowError::Exhausted)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::digest;

    #[test]
    fn test_difficulty_bounds() {
        assert!(Difficulty::new(0).is_ok());
        assert!(Difficulty::new(MAX_DIFFICULTY).is_ok());
        assert_eq!(Difficulty::new(65), Err(PowError::InvalidDifficulty(65)));
        assert_eq!(Difficulty::default().zeros(), DEFAULT_DIFFICULTY);
    }

    #[test]
    fn test_solve_finds_smallest_nonce() {
        let pow = ProofOfWork::new(Difficulty::new(2).unwrap());
        let solution = pow.solve(b"prefix", &CancellationToken::new()).unwrap();

        assert!(solution.hash.starts_with("00"));
        assert_eq!(solution.hash, digest(format!("prefix{}", solution.nonce).as_bytes()));

        // No smaller nonce satisfies the predicate
        for nonce in 0..solution.nonce {
            let hash = digest(format!("prefix{}", nonce).as_bytes());
            assert!(!hash.starts_with("00"));
        }
    }

    #[test]
    fn test_zero_difficulty_accepts_first_nonce() {
        let pow = ProofOfWork::new(Difficulty::none());
        let solution = pow.solve(b"anything", &CancellationToken::new()).unwrap();

        assert_eq!(solution.nonce, 0);
    }

    #[test]
    fn test_solve_framed_places_nonce_between_head_and_tail() {
        let pow = ProofOfWork::new(Difficulty::new(1).unwrap());
        let solution = pow
            .solve_framed(b"head", b"tail", &CancellationToken::new())
            .unwrap();

        assert_eq!(solution.hash, ProofOfWork::hash_at(b"head", solution.nonce, b"tail"));
        assert_eq!(
            solution.hash,
            digest(format!("head{}tail", solution.nonce).as_bytes())
        );
    }

    #[test]
    fn test_parallel_search_returns_a_valid_nonce() {
        let pow = ProofOfWork::new(Difficulty::new(3).unwrap()).with_workers(4);
        let solution = pow
            .solve_framed(b"parallel", b"search", &CancellationToken::new())
            .unwrap();

        assert!(solution.hash.starts_with("000"));
        assert_eq!(
            solution.hash,
            ProofOfWork::hash_at(b"parallel", solution.nonce, b"search")
        );
    }

    #[test]
    fn test_cancelled_token_stops_search() {
        let token = CancellationToken::new();
        token.cancel();

        // Unreachable difficulty: only cancellation ends the search
        let pow = ProofOfWork::new(Difficulty::new(MAX_DIFFICULTY).unwrap());
        assert_eq!(pow.solve(b"never", &token), Err(PowError::Cancelled));

        let parallel = pow.with_workers(3);
        assert_eq!(parallel.solve(b"never", &token), Err(PowError::Cancelled));
    }

    #[test]
    fn test_timeout_stops_search() {
        let token = CancellationToken::with_timeout(Duration::from_millis(20));
        let pow = ProofOfWork::new(Difficulty::new(MAX_DIFFICULTY).unwrap());

        assert_eq!(pow.solve(b"never", &token), Err(PowError::Cancelled));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_child_token_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let second = parent.child_token();
        parent.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_external_token_stops_search() {
        let external = tokio_util::sync::CancellationToken::new();
        let token = CancellationToken::from(external.clone());
        external.cancel();

        let pow = ProofOfWork::new(Difficulty::new(MAX_DIFFICULTY).unwrap()).with_workers(2);
        assert_eq!(pow.solve(b"never", &token), Err(PowError::Cancelled));
    }

    #[test]
    fn test_parallel_win_leaves_caller_token_untouched() {
        let token = CancellationToken::new();
        let pow = ProofOfWork::new(Difficulty::new(1).unwrap()).with_workers(3);

        assert!(pow.solve(b"winner", &token).is_ok());
        assert!(!token.is_cancelled());
    }
}
