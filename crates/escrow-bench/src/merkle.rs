use alloy_primitives::{keccak256, Address, B256, U256};

use crate::error::{BenchError, Result};

/// Merkle tree over deposit leaves, compatible with the escrow contract's
/// on-chain commitment.
///
/// - Leaves stay in the order given; `proof(i)` authenticates `leaves[i]`.
/// - Parent = `keccak256(min(a, b) || max(a, b))`, so the contract can verify
///   a bare `bytes32[]` proof without position bits.
/// - The unpaired last node of an odd level is promoted unchanged.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `layers[0]` are the leaves, the last layer holds only the root.
    layers: Vec<Vec<B256>>,
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofNode {
    pub sibling: B256,
    pub side: Side,
}

/// Authentication path for one leaf, ordered bottom to top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub index: usize,
    pub nodes: Vec<ProofNode>,
}

impl Proof {
    /// Recomputes the root from `leaf` and checks it against `root`.
    pub fn verify(&self, leaf: B256, root: B256) -> bool {
        self.compute_root(leaf) == root
    }

    pub fn compute_root(&self, leaf: B256) -> B256 {
        self.nodes
            .iter()
            .fold(leaf, |acc, node| hash_pair(acc, node.sibling))
    }

    /// Sibling digests in the shape the contract's `withdraw` expects.
    pub fn siblings(&self) -> Vec<B256> {
        self.nodes.iter().map(|node| node.sibling).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl MerkleTree {
    /// Builds the tree bottom-up from ordered leaf digests.
    pub fn build(leaves: &[B256]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(BenchError::MalformedInput(
                "cannot build a Merkle tree without leaves".into(),
            ));
        }

        let mut layers = vec![leaves.to_vec()];
        while layers.last().map_or(0, Vec::len) > 1 {
            let current = &layers[layers.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match *pair {
                    [left, right] => hash_pair(left, right),
                    [odd] => odd,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            layers.push(next);
        }

        Ok(Self { layers })
    }

    pub fn root(&self) -> B256 {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn leaves(&self) -> &[B256] {
        &self.layers[0]
    }

    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    /// Returns the proof for the leaf at `index`, or `None` if out of range.
    pub fn proof(&self, index: usize) -> Option<Proof> {
        if index >= self.len() {
            return None;
        }

        let mut nodes = Vec::with_capacity(self.layers.len() - 1);
        let mut position = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling_index = position ^ 1;
            // A promoted odd node has no sibling on this level.
            if let Some(&sibling) = layer.get(sibling_index) {
                let side = if position % 2 == 0 { Side::Right } else { Side::Left };
                nodes.push(ProofNode { sibling, side });
            }
            position /= 2;
        }

        Some(Proof { index, nodes })
    }

    /// Proofs for every leaf, in leaf order.
    pub fn proofs(&self) -> Vec<Proof> {
        (0..self.len()).filter_map(|i| self.proof(i)).collect()
    }
}

/// Leaf digest for one deposit.
///
/// `leaf = keccak256(payee (20B) || amount (32B big-endian))`, identical to
/// Solidity's `keccak256(abi.encodePacked(address, uint256))`.
pub fn leaf_digest(payee: Address, amount: U256) -> B256 {
    let mut data = Vec::with_capacity(52);
    data.extend_from_slice(payee.as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    keccak256(&data)
}

/// Commutative node hash over the sorted pair.
pub fn hash_pair(a: B256, b: B256) -> B256 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(low.as_slice());
    data[32..].copy_from_slice(high.as_slice());
    keccak256(data)
}
