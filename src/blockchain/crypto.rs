use sha2::{Digest, Sha256};

/// SHA-256 digest rendered as 64 lowercase hexadecimal characters
pub type Hash = String;

/// Digest of empty input, used as the root of a Merkle tree with no leaves
pub const EMPTY_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Computes the SHA-256 digest of arbitrary bytes
///
/// # Arguments
///
/// * `data` - The bytes to hash (may be empty)
///
/// # Returns
///
/// The digest as a lowercase hexadecimal string
pub fn digest(data: &[u8]) -> Hash {
    hex::encode(Sha256::digest(data))
}

/// Hashes the concatenation of two hashes, left first
///
/// The hex text of both inputs is concatenated, not their raw bytes.
pub fn digest_concat(left: &str, right: &str) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks whether a hash starts with `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let first = digest(b"B->A:5");
        let second = digest(b"B->A:5");

        assert_eq!(first, second);
        assert_eq!(first.len(), 64); // SHA-256 hash is 64 characters in hex
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_empty_input_matches_sentinel() {
        assert_eq!(digest(b""), EMPTY_HASH);
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_concat_matches_manual_concatenation() {
        let left = digest(b"left");
        let right = digest(b"right");

        let expected = digest(format!("{}{}", left, right).as_bytes());
        assert_eq!(digest_concat(&left, &right), expected);

        // Order matters
        assert_ne!(digest_concat(&left, &right), digest_concat(&right, &left));
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("0000abcd", 4));
        assert!(meets_difficulty("0000abcd", 0));
        assert!(!meets_difficulty("000abcde", 4));
        assert!(!meets_difficulty("00", 4));
    }
}
