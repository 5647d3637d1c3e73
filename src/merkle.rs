//! SHA-256 Merkle helpers shared by the ledger state root and attestation
//! inclusion proofs.
//!
//! Interior nodes hash the *sorted* pair of children, so a proof is just the
//! list of sibling hashes from leaf to root and carries no direction bits.
//! Levels with an odd number of nodes pair the last node with itself.

use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

/// Leaf hash with a caller-chosen domain tag.
pub fn leaf_hash(domain: &[u8], data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

pub fn node_hash(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(b"node");
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

pub fn empty_root() -> Hash {
    Sha256::digest(b"pot-merkle-empty").into()
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    let mut next = Vec::with_capacity((level.len() + 1) / 2);
    for chunk in level.chunks(2) {
        let right = chunk.get(1).unwrap_or(&chunk[0]);
        next.push(node_hash(&chunk[0], right));
    }
    next
}

pub fn root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return empty_root();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Sibling path for the leaf at `index`, or `None` when out of range.
pub fn proof(leaves: &[Hash], mut index: usize) -> Option<Vec<Hash>> {
    if index >= leaves.len() {
        return None;
    }
    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let sibling = level.get(index ^ 1).unwrap_or(&level[index]);
        path.push(*sibling);
        level = next_level(&level);
        index /= 2;
    }
    Some(path)
}

pub fn verify(leaf: &Hash, path: &[Hash], expected_root: &Hash) -> bool {
    let computed = path
        .iter()
        .fold(*leaf, |acc, sibling| node_hash(&acc, sibling));
    &computed == expected_root
}

/// Hex (de)serialization for 32-byte hashes.
pub(crate) mod serde_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Hash;

    pub fn serialize<S>(value: &Hash, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Hash, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(encoded.trim_start_matches("0x")).map_err(D::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected 32 bytes, got {}", bytes.len())))
    }
}
