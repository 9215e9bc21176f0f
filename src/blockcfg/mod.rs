//! Types making up the chain data model.
//!
//! A [`Block`] bundles the consensus metadata with the web-of-trust
//! documents it carries (identities, certifications, memberships,
//! transactions). Blocks are immutable once admitted, except for the
//! `fork` flag (which side of the chain they currently live on) and the
//! `wrong` flag (set when a branch they belong to failed a switch).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-addressed identifier of a block: the uppercase hexadecimal
/// SHA-256 fingerprint of its signable payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(String);

impl BlockHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of leading zeroes of the hexadecimal fingerprint, the
    /// quantity proof-of-work difficulty is measured in.
    pub fn leading_zeros(&self) -> usize {
        self.0.chars().take_while(|c| *c == '0').count()
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BlockHash {
    fn from(s: String) -> Self {
        BlockHash(s)
    }
}

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        BlockHash(s.to_owned())
    }
}

/// Base58 public key of an identity, produced by the out-of-scope
/// cryptography layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PublicKey {
    fn from(s: String) -> Self {
        PublicKey(s)
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        PublicKey(s.to_owned())
    }
}

/// Kind of a money source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Universal dividend emission.
    #[serde(rename = "D")]
    Dividend,
    /// Transaction output.
    #[serde(rename = "T")]
    Transaction,
}

/// A spendable amount of currency attributed to a public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    pub pubkey: PublicKey,
    pub identifier: String,
    pub block_number: u64,
    pub amount: u64,
    pub base: u64,
    pub conditions: String,
    pub consumed: bool,
}

/// One input of a transaction. The `issuer` is denormalized onto the
/// input by the admission pipeline before any rule runs on the block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub kind: SourceKind,
    pub identifier: String,
    pub block_number: u64,
    pub amount: u64,
    pub base: u64,
    #[serde(default)]
    pub issuer: Option<PublicKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub issuers: Vec<PublicKey>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<String>,
    pub signatures: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

/// Self-signed declaration binding a public key to a user identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDoc {
    pub pubkey: PublicKey,
    pub uid: String,
    /// Block identifier ("buid") the identity was signed against.
    pub buid: String,
    pub signature: String,
}

/// A member vouching for another identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationDoc {
    pub from: PublicKey,
    pub to: PublicKey,
    /// Number of the block the certification was signed against.
    pub block_number: u64,
    pub signature: String,
}

/// Membership document carried by the joiners / actives / leavers arrays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipDoc {
    pub issuer: PublicKey,
    pub uid: String,
    /// Number of the block the membership was signed against.
    pub block_number: u64,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationDoc {
    pub pubkey: PublicKey,
    pub signature: String,
}

/// A block of the chain, either canonical (`fork == false`) or recorded
/// on a side chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: BlockHash,
    /// Absent only on the root block.
    pub previous_hash: Option<BlockHash>,
    pub issuer: PublicKey,
    pub median_time: u64,
    pub pow_min: usize,
    pub nonce: u64,
    pub members_count: u64,
    /// Currency parameters, present on the root block only.
    #[serde(default)]
    pub parameters: Option<String>,

    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub identities: Vec<IdentityDoc>,
    #[serde(default)]
    pub certifications: Vec<CertificationDoc>,
    #[serde(default)]
    pub joiners: Vec<MembershipDoc>,
    #[serde(default)]
    pub actives: Vec<MembershipDoc>,
    #[serde(default)]
    pub leavers: Vec<MembershipDoc>,
    #[serde(default)]
    pub revoked: Vec<RevocationDoc>,
    #[serde(default)]
    pub excluded: Vec<PublicKey>,

    pub dividend: Option<u64>,
    #[serde(default)]
    pub unit_base: u64,

    /// Derived during main-chain insertion.
    #[serde(default)]
    pub monetary_mass: u64,
    /// Timestamp of the last dividend emission up to this block,
    /// derived during main-chain insertion.
    #[serde(default)]
    pub ud_time: Option<u64>,

    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub wrong: bool,
}

impl Block {
    /// `true` iff `self` is the direct successor of `other`.
    pub fn follows(&self, other: &Block) -> bool {
        self.number == other.number + 1 && self.previous_hash.as_ref() == Some(&other.hash)
    }

    /// The payload the proof-of-work fingerprint is computed over. The
    /// inner fields are bound by the issuer signature, checked by the
    /// rules engine; only the nonce varies during proving.
    pub fn signable_payload(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}",
            self.number,
            self.previous_hash
                .as_ref()
                .map(|h| h.as_str())
                .unwrap_or(""),
            self.issuer,
            self.median_time,
            self.pow_min,
            self.nonce,
        )
    }

    /// Recompute the fingerprint of this block from its payload.
    pub fn computed_hash(&self) -> BlockHash {
        let digest = Sha256::digest(self.signable_payload().as_bytes());
        BlockHash(hex::encode_upper(digest))
    }

    /// Short description used in logs.
    pub fn description(&self) -> String {
        format!("#{}-{}", self.number, self.hash)
    }
}

/// A current member of the web of trust.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub pubkey: PublicKey,
    pub uid: String,
}

/// A certification materialized into the web-of-trust graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub source: PublicKey,
    pub target: PublicKey,
    /// Median time of the block that materialized the link.
    pub timestamp: u64,
    pub obsolete: bool,
}
