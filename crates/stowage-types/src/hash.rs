use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest as _};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::StowageError;

type Blake2b256 = Blake2b<U32>;

/// Block and volume hash algorithms. The digest size is fixed per algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "blake2b-256")]
    Blake2b256,
    #[serde(rename = "blake2b-512")]
    Blake2b512,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    pub fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Blake2b256 => 32,
            HashAlgorithm::Blake2b512 => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Blake2b256 => "blake2b-256",
            HashAlgorithm::Blake2b512 => "blake2b-512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = StowageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake2b-256" | "blake2b256" => Ok(HashAlgorithm::Blake2b256),
            "blake2b-512" | "blake2b512" => Ok(HashAlgorithm::Blake2b512),
            other => Err(StowageError::User(format!(
                "invalid hash algorithm: {other}"
            ))),
        }
    }
}

/// Black-box content hash: `hash(bytes) -> digest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest_size(&self) -> usize {
        self.algorithm.digest_size()
    }

    pub fn hash(&self, data: &[u8]) -> Digest {
        match self.algorithm {
            HashAlgorithm::Blake2b256 => Digest(Blake2b256::digest(data).to_vec()),
            HashAlgorithm::Blake2b512 => Digest(Blake2b512::digest(data).to_vec()),
        }
    }
}
