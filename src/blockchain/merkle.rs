use serde::{Deserialize, Serialize};

use super::crypto::{digest_concat, Hash, EMPTY_HASH};

/// Index of a node inside a tree's arena
pub type NodeId = usize;

/// A node of the Merkle tree
///
/// Leaves have no children. An internal node built from an odd trailing node
/// holds the same child index in both slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub hash: Hash,
    pub children: Option<(NodeId, NodeId)>,
}

/// Binary hash tree over an ordered sequence of transaction hashes
///
/// Nodes live in an arena owned by the tree; parents refer to children by
/// index. The tree is immutable once built.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    /// Node ids per level, leaves first, root level last
    levels: Vec<Vec<NodeId>>,
}

impl MerkleTree {
    /// Builds a tree from leaf hashes
    ///
    /// Each level is reduced pairwise, left to right. When a level has an odd
    /// number of nodes the last one is paired with itself.
    ///
    /// # Arguments
    ///
    /// * `leaves` - The ordered leaf hashes
    ///
    /// # Returns
    ///
    /// The built tree; for empty input its root is `EMPTY_HASH`
    pub fn build(leaves: &[Hash]) -> Self {
        let mut nodes: Vec<MerkleNode> = leaves
            .iter()
            .map(|hash| MerkleNode {
                hash: hash.clone(),
                children: None,
            })
            .collect();

        let mut levels = Vec::new();
        if nodes.is_empty() {
            return MerkleTree { nodes, levels };
        }

        let mut current: Vec<NodeId> = (0..nodes.len()).collect();
        while current.len() > 1 {
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };

                let hash = digest_concat(&nodes[left].hash, &nodes[right].hash);
                nodes.push(MerkleNode {
                    hash,
                    children: Some((left, right)),
                });
                next.push(nodes.len() - 1);
            }
            levels.push(current);
            current = next;
        }
        levels.push(current);

        MerkleTree { nodes, levels }
    }

    /// Returns the root hash, or `EMPTY_HASH` for an empty tree
    pub fn root(&self) -> Hash {
        self.root_node()
            .map(|node| node.hash.clone())
            .unwrap_or_else(|| EMPTY_HASH.to_string())
    }

    /// Returns the root node, if the tree has any leaves
    pub fn root_node(&self) -> Option<&MerkleNode> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(|&id| &self.nodes[id])
    }

    /// Looks up a node by id
    pub fn node(&self, id: NodeId) -> Option<&MerkleNode> {
        self.nodes.get(id)
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of levels above the leaves
    pub fn depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Generates an inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.len() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.depth());
        let mut position = index;

        for level in &self.levels[..self.depth()] {
            let step = if position % 2 == 0 {
                // An orphan at the end of the level is its own sibling
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                ProofStep {
                    sibling: self.nodes[*sibling].hash.clone(),
                    side: Side::Right,
                }
            } else {
                ProofStep {
                    sibling: self.nodes[level[position - 1]].hash.clone(),
                    side: Side::Left,
                }
            };
            steps.push(step);
            position /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf_hash: self.nodes[self.levels[0][index]].hash.clone(),
            steps,
        })
    }
}

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One sibling on the path from a leaf to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash,
    pub side: Side,
}

/// Merkle inclusion proof for a single leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the leaf in the submitted order
    pub leaf_index: usize,
    /// Hash of the leaf
    pub leaf_hash: Hash,
    /// Siblings from the leaf level up to just below the root
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recomputes the root from the leaf and compares it with `expected_root`
    pub fn verify(&self, expected_root: &str) -> bool {
        let computed = self.steps.iter().fold(self.leaf_hash.clone(), |current, step| {
            match step.side {
                Side::Left => digest_concat(&step.sibling, &current),
                Side::Right => digest_concat(&current, &step.sibling),
            }
        });

        computed == expected_root
    }
}

/// Computes a Merkle root without keeping the tree around
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return EMPTY_HASH.to_string();
    }
    MerkleTree::build(leaves).root()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::digest;

    fn leaves(items: &[&str]) -> Vec<Hash> {
        items.iter().map(|item| digest(item.as_bytes())).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::build(&[]);

        assert_eq!(tree.root(), EMPTY_HASH);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.root_node().is_none());
        assert!(tree.proof(0).is_none());
    }

    #[test]
    fn test_single_leaf() {
        let hashes = leaves(&["a"]);
        let tree = MerkleTree::build(&hashes);

        // Single leaf: root equals leaf
        assert_eq!(tree.root(), hashes[0]);
        assert_eq!(tree.depth(), 0);

        let proof = tree.proof(0).unwrap();
        assert!(proof.steps.is_empty());
        assert!(proof.verify(&tree.root()));
    }

    #[test]
    fn test_two_leaves() {
        let hashes = leaves(&["a", "b"]);
        let tree = MerkleTree::build(&hashes);

        assert_eq!(tree.root(), digest_concat(&hashes[0], &hashes[1]));
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let hashes = leaves(&["a", "b", "c"]);
        let tree = MerkleTree::build(&hashes);

        let left = digest_concat(&hashes[0], &hashes[1]);
        let right = digest_concat(&hashes[2], &hashes[2]);
        assert_eq!(tree.root(), digest_concat(&left, &right));

        // The duplicated parent points at the same leaf twice
        let root = tree.root_node().unwrap();
        let (_, right_id) = root.children.unwrap();
        let right_node = tree.node(right_id).unwrap();
        assert_eq!(right_node.children, Some((2, 2)));
    }

    #[test]
    fn test_five_leaves_duplicate_at_every_odd_level() {
        let hashes = leaves(&["a", "b", "c", "d", "e"]);
        let tree = MerkleTree::build(&hashes);

        let ab = digest_concat(&hashes[0], &hashes[1]);
        let cd = digest_concat(&hashes[2], &hashes[3]);
        let ee = digest_concat(&hashes[4], &hashes[4]);
        let abcd = digest_concat(&ab, &cd);
        let eeee = digest_concat(&ee, &ee);

        assert_eq!(tree.root(), digest_concat(&abcd, &eeee));
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn test_deterministic_build() {
        let hashes = leaves(&["B->A:5", "B->C:3", "A->B:2"]);

        assert_eq!(MerkleTree::build(&hashes).root(), MerkleTree::build(&hashes).root());
        assert_eq!(merkle_root(&hashes), MerkleTree::build(&hashes).root());
    }

    #[test]
    fn test_permutation_changes_root() {
        let hashes = leaves(&["a", "b", "c"]);
        let mut swapped = hashes.clone();
        swapped.swap(0, 1);

        assert_ne!(merkle_root(&hashes), merkle_root(&swapped));
    }

    #[test]
    fn test_proofs_verify_for_every_leaf_count() {
        for count in 1..=9 {
            let items: Vec<String> = (0..count).map(|i| format!("tx{}", i)).collect();
            let hashes: Vec<Hash> = items.iter().map(|i| digest(i.as_bytes())).collect();
            let tree = MerkleTree::build(&hashes);

            for index in 0..count {
                let proof = tree.proof(index).unwrap();
                assert!(proof.verify(&tree.root()), "proof {} of {} failed", index, count);
            }
            assert!(tree.proof(count).is_none());
        }
    }

    #[test]
    fn test_proof_rejects_wrong_root() {
        let hashes = leaves(&["a", "b", "c", "d"]);
        let tree = MerkleTree::build(&hashes);
        let proof = tree.proof(2).unwrap();

        assert!(!proof.verify(EMPTY_HASH));

        let mut tampered = proof.clone();
        tampered.leaf_hash = digest(b"x");
        assert!(!tampered.verify(&tree.root()));
    }
}
