//! Host-side verification of attested feed responses.
//!
//! A response is accepted when (1) its leaf hash is included under the
//! round's Merkle root and (2) that root carries signatures from a quorum of
//! the configured attestation committee. The ledger never sees unverified
//! data; it trusts whatever [`AttestationProof::verify`] lets through.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::merkle::{self, Hash};

pub const LEAF_DOMAIN: &[u8] = b"pot-attestation-leaf";

pub fn response_leaf(response: &[u8]) -> Hash {
    merkle::leaf_hash(LEAF_DOMAIN, response)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSignature {
    pub member_id: String,
    #[serde(with = "crate::attestation::serde_bytes")]
    pub signature: Vec<u8>,
}

/// Merkle root of one voting round, signed by committee members.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedRoundRoot {
    pub voting_round_id: u64,
    #[serde(with = "crate::merkle::serde_hash")]
    pub merkle_root: Hash,
    #[serde(default)]
    pub signatures: Vec<MemberSignature>,
}

impl SignedRoundRoot {
    pub fn new(voting_round_id: u64, merkle_root: Hash) -> Self {
        Self {
            voting_round_id,
            merkle_root,
            signatures: Vec::new(),
        }
    }

    pub fn digest(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(b"pot-round-root-v1");
        hasher.update(self.voting_round_id.to_le_bytes());
        hasher.update(self.merkle_root);
        hasher.finalize().into()
    }

    /// Add (or replace) `member_id`'s signature over the round digest.
    pub fn sign(&mut self, member_id: &str, key: &SigningKey) {
        let signature = key.sign(&self.digest());
        self.signatures.retain(|sig| sig.member_id != member_id);
        self.signatures.push(MemberSignature {
            member_id: member_id.to_string(),
            signature: signature.to_bytes().to_vec(),
        });
    }
}

/// Proof bundle returned by the data-availability layer for one request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationProof {
    pub voting_round_id: u64,
    pub response_hex: String,
    pub proof: Vec<String>,
    pub round_root: SignedRoundRoot,
}

impl AttestationProof {
    pub fn response_bytes(&self) -> Result<Vec<u8>, VerificationError> {
        hex::decode(self.response_hex.trim_start_matches("0x"))
            .map_err(|e| VerificationError::MalformedProof(format!("response_hex: {e}")))
    }

    fn proof_path(&self) -> Result<Vec<Hash>, VerificationError> {
        self.proof
            .iter()
            .map(|node| {
                let bytes = hex::decode(node.trim_start_matches("0x"))
                    .map_err(|e| VerificationError::MalformedProof(format!("proof node: {e}")))?;
                bytes.as_slice().try_into().map_err(|_| {
                    VerificationError::MalformedProof(format!(
                        "proof node must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })
            })
            .collect()
    }

    /// Check inclusion and committee quorum, returning the attested response.
    pub fn verify(&self, committee: &CommitteeConfig) -> Result<Vec<u8>, VerificationError> {
        if self.voting_round_id != self.round_root.voting_round_id {
            return Err(VerificationError::RoundMismatch {
                proof: self.voting_round_id,
                root: self.round_root.voting_round_id,
            });
        }
        let response = self.response_bytes()?;
        let path = self.proof_path()?;
        if !merkle::verify(&response_leaf(&response), &path, &self.round_root.merkle_root) {
            return Err(VerificationError::InclusionMismatch);
        }
        committee.verify(&self.round_root)?;
        debug!(
            round = self.voting_round_id,
            bytes = response.len(),
            "attestation proof verified"
        );
        Ok(response)
    }
}

/// Build proofs for a whole round of responses and sign the root once.
pub fn build_round(
    voting_round_id: u64,
    responses: &[Vec<u8>],
    member_id: &str,
    key: &SigningKey,
) -> Vec<AttestationProof> {
    let leaves: Vec<Hash> = responses.iter().map(|r| response_leaf(r)).collect();
    let mut round_root = SignedRoundRoot::new(voting_round_id, merkle::root(&leaves));
    round_root.sign(member_id, key);
    responses
        .iter()
        .enumerate()
        .filter_map(|(idx, response)| {
            let path = merkle::proof(&leaves, idx)?;
            Some(AttestationProof {
                voting_round_id,
                response_hex: hex::encode(response),
                proof: path.iter().map(hex::encode).collect(),
                round_root: round_root.clone(),
            })
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct CommitteeConfig {
    pub quorum: usize,
    pub members: BTreeMap<String, VerifyingKey>,
}

impl CommitteeConfig {
    pub fn new(members: Vec<(String, VerifyingKey)>, quorum: usize) -> Self {
        Self {
            quorum,
            members: members.into_iter().collect(),
        }
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn verify(&self, root: &SignedRoundRoot) -> Result<(), VerificationError> {
        if self.quorum == 0 {
            return Err(VerificationError::EmptyQuorum);
        }
        let digest = root.digest();
        let mut verified = BTreeSet::new();
        for sig in &root.signatures {
            let key = self
                .members
                .get(&sig.member_id)
                .ok_or_else(|| VerificationError::UnknownMember(sig.member_id.clone()))?;
            let signature = Signature::from_slice(&sig.signature)
                .map_err(|_| VerificationError::MalformedSignature(sig.member_id.clone()))?;
            key.verify_strict(&digest, &signature)
                .map_err(|_| VerificationError::InvalidSignature(sig.member_id.clone()))?;
            verified.insert(sig.member_id.clone());
        }
        if verified.len() < self.quorum {
            return Err(VerificationError::InsufficientQuorum {
                expected: self.quorum,
                actual: verified.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("signature from unknown committee member {0}")]
    UnknownMember(String),
    #[error("malformed signature from member {0}")]
    MalformedSignature(String),
    #[error("invalid signature from member {0}")]
    InvalidSignature(String),
    #[error("round root signed by {actual} members, quorum {expected}")]
    InsufficientQuorum { expected: usize, actual: usize },
    #[error("committee quorum must be at least 1")]
    EmptyQuorum,
    #[error("proof is for round {proof} but root is for round {root}")]
    RoundMismatch { proof: u64, root: u64 },
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    #[error("response is not included under the round root")]
    InclusionMismatch,
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded.trim_start_matches("0x")).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::OsRng;

    fn random_committee(size: usize, quorum: usize) -> (CommitteeConfig, Vec<SigningKey>) {
        let mut rng = OsRng;
        let mut members = Vec::new();
        let mut signing_keys = Vec::new();
        for idx in 0..size {
            let sk = SigningKey::generate(&mut rng);
            members.push((format!("member-{idx}"), sk.verifying_key()));
            signing_keys.push(sk);
        }
        (CommitteeConfig::new(members, quorum), signing_keys)
    }

    fn responses() -> Vec<Vec<u8>> {
        vec![
            br#"{"title1":"a","totalArticles":3}"#.to_vec(),
            br#"{"title1":"b","totalArticles":3}"#.to_vec(),
            br#"{"title1":"c","totalArticles":3}"#.to_vec(),
        ]
    }

    #[test]
    fn round_proofs_verify_with_quorum() {
        let (committee, sks) = random_committee(3, 2);
        let mut proofs = build_round(42, &responses(), "member-0", &sks[0]);
        assert_eq!(proofs.len(), 3);
        for proof in &mut proofs {
            proof.round_root.sign("member-1", &sks[1]);
        }
        for (proof, expected) in proofs.iter().zip(responses()) {
            assert_eq!(proof.verify(&committee).unwrap(), expected);
        }
    }

    #[test]
    fn insufficient_quorum_fails() {
        let (committee, sks) = random_committee(3, 3);
        let proofs = build_round(7, &responses(), "member-0", &sks[0]);
        match proofs[0].verify(&committee).unwrap_err() {
            VerificationError::InsufficientQuorum { expected, actual } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn resigning_does_not_double_count_a_member() {
        let (committee, sks) = random_committee(2, 2);
        let mut proofs = build_round(7, &responses(), "member-0", &sks[0]);
        proofs[0].round_root.sign("member-0", &sks[0]);
        assert_eq!(proofs[0].round_root.signatures.len(), 1);
        assert!(matches!(
            proofs[0].verify(&committee),
            Err(VerificationError::InsufficientQuorum { actual: 1, .. })
        ));
    }

    #[test]
    fn tampered_response_is_rejected() {
        let (committee, sks) = random_committee(1, 1);
        let mut proofs = build_round(1, &responses(), "member-0", &sks[0]);
        proofs[1].response_hex = hex::encode(br#"{"title1":"forged","totalArticles":3}"#);
        assert!(matches!(
            proofs[1].verify(&committee),
            Err(VerificationError::InclusionMismatch)
        ));
    }

    #[test]
    fn signature_by_outsider_is_rejected() {
        let (committee, sks) = random_committee(1, 1);
        let outsider = SigningKey::generate(&mut OsRng);
        let mut proofs = build_round(1, &responses(), "member-0", &sks[0]);
        proofs[0].round_root.sign("stranger", &outsider);
        assert!(matches!(
            proofs[0].verify(&committee),
            Err(VerificationError::UnknownMember(id)) if id == "stranger"
        ));

        // a known member id with the wrong key
        let mut proofs = build_round(1, &responses(), "member-0", &outsider);
        assert!(matches!(
            proofs[0].verify(&committee),
            Err(VerificationError::InvalidSignature(_))
        ));
        proofs[0].round_root.signatures[0].signature.truncate(10);
        assert!(matches!(
            proofs[0].verify(&committee),
            Err(VerificationError::MalformedSignature(_))
        ));
    }

    #[test]
    fn round_mismatch_and_bad_hex_are_reported() {
        let (committee, sks) = random_committee(1, 1);
        let mut proofs = build_round(5, &responses(), "member-0", &sks[0]);
        proofs[0].voting_round_id = 6;
        assert!(matches!(
            proofs[0].verify(&committee),
            Err(VerificationError::RoundMismatch { proof: 6, root: 5 })
        ));
        proofs[1].proof.push("abcd".into());
        assert!(matches!(
            proofs[1].verify(&committee),
            Err(VerificationError::MalformedProof(_))
        ));
    }

    #[test]
    fn prefixed_hex_fields_are_accepted() {
        let (committee, sks) = random_committee(1, 1);
        let proofs = build_round(3, &responses(), "member-0", &sks[0]);
        let mut json = serde_json::to_value(&proofs[0]).unwrap();
        let root = &mut json["round_root"];
        root["merkle_root"] = format!("0x{}", root["merkle_root"].as_str().unwrap()).into();
        let sig = &mut root["signatures"][0]["signature"];
        *sig = format!("0x{}", sig.as_str().unwrap()).into();
        json["response_hex"] = format!("0x{}", json["response_hex"].as_str().unwrap()).into();

        let parsed: AttestationProof = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.round_root, proofs[0].round_root);
        assert_eq!(parsed.verify(&committee).unwrap(), responses()[0]);
    }

    #[test]
    fn proof_survives_json() {
        let (committee, sks) = random_committee(1, 1);
        let proofs = build_round(9, &responses(), "member-0", &sks[0]);
        let json = serde_json::to_string(&proofs[2]).unwrap();
        let parsed: AttestationProof = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.verify(&committee).unwrap(), responses()[2]);
    }
}
