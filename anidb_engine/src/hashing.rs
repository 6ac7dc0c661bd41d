//! Hash algorithms supported by the engine
//!
//! Every algorithm is exposed as a [`StreamingHasher`] so one pass over a file
//! can feed several of them at once (see [`crate::pipeline::HashPipeline`]).

use crate::{Error, Result, error::ValidationError};
use serde::{Deserialize, Serialize};

mod algorithms;
mod traits;

pub use algorithms::ed2k::ED2K_BLOCK_SIZE;
pub use algorithms::tth::TTH_LEAF_SIZE;
pub use traits::StreamingHasher;

/// Hash algorithms supported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// ED2K hash algorithm
    ED2K,
    /// CRC32 hash algorithm
    CRC32,
    /// MD5 hash algorithm
    MD5,
    /// SHA1 hash algorithm
    SHA1,
    /// Tiger Tree Hash algorithm
    TTH,
}

impl HashAlgorithm {
    /// All algorithms in their numeric id order
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::ED2K,
        HashAlgorithm::CRC32,
        HashAlgorithm::MD5,
        HashAlgorithm::SHA1,
        HashAlgorithm::TTH,
    ];

    /// Stable numeric identifier used across the ABI
    pub fn id(self) -> i32 {
        match self {
            HashAlgorithm::ED2K => 1,
            HashAlgorithm::CRC32 => 2,
            HashAlgorithm::MD5 => 3,
            HashAlgorithm::SHA1 => 4,
            HashAlgorithm::TTH => 5,
        }
    }

    /// Look up an algorithm by its numeric identifier
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.id() == id)
    }

    /// Raw digest length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::ED2K | HashAlgorithm::MD5 => 16,
            HashAlgorithm::CRC32 => 4,
            HashAlgorithm::SHA1 => 20,
            HashAlgorithm::TTH => 24,
        }
    }

    /// Length of the lowercase hex digest
    pub fn hex_len(self) -> usize {
        self.digest_len() * 2
    }

    /// Buffer size needed to hold the hex digest plus a NUL terminator
    pub fn buffer_size(self) -> usize {
        self.hex_len() + 1
    }

    /// Display name used in messages and by `algorithm_name`
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::ED2K => "ED2K",
            HashAlgorithm::CRC32 => "CRC32",
            HashAlgorithm::MD5 => "MD5",
            HashAlgorithm::SHA1 => "SHA1",
            HashAlgorithm::TTH => "TTH",
        }
    }

    /// Create a fresh streaming hasher for this algorithm
    pub fn create_hasher(self, variant: Ed2kVariant) -> Box<dyn StreamingHasher> {
        match self {
            HashAlgorithm::ED2K => Box::new(algorithms::ed2k::Ed2kHasher::new(variant)),
            HashAlgorithm::CRC32 => Box::new(algorithms::crc32::Crc32Hasher::new()),
            HashAlgorithm::MD5 => Box::new(algorithms::md5::Md5Hasher::new()),
            HashAlgorithm::SHA1 => Box::new(algorithms::sha1::Sha1Hasher::new()),
            HashAlgorithm::TTH => Box::new(algorithms::tth::TthHasher::new()),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::ED2K => write!(f, "ed2k"),
            HashAlgorithm::CRC32 => write!(f, "crc32"),
            HashAlgorithm::MD5 => write!(f, "md5"),
            HashAlgorithm::SHA1 => write!(f, "sha1"),
            HashAlgorithm::TTH => write!(f, "tth"),
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ed2k" => Ok(HashAlgorithm::ED2K),
            "crc32" => Ok(HashAlgorithm::CRC32),
            "md5" => Ok(HashAlgorithm::MD5),
            "sha1" => Ok(HashAlgorithm::SHA1),
            "tth" => Ok(HashAlgorithm::TTH),
            _ => Err(Error::Validation(ValidationError::invalid_parameter(
                "algorithm",
                &format!("unknown hash algorithm: {s}"),
            ))),
        }
    }
}

/// ED2K hash variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ed2kVariant {
    /// Blue variant: never appends the empty-data digest
    Blue,
    /// Red variant: AniDB-compatible, appends MD4 of empty data when the
    /// file spans two or more whole blocks exactly
    #[default]
    Red,
}

/// A finalized digest for one algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashRecord {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub hash: String,
    /// Raw digest length in bytes
    pub byte_len: usize,
}

impl HashRecord {
    pub fn new(algorithm: HashAlgorithm, hash: String) -> Self {
        Self {
            algorithm,
            hash,
            byte_len: algorithm.digest_len(),
        }
    }
}

/// Hash an in-memory buffer with a single algorithm
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    hash_bytes_with_variant(algorithm, Ed2kVariant::default(), data)
}

/// Hash an in-memory buffer, selecting the ED2K variant explicitly
pub fn hash_bytes_with_variant(
    algorithm: HashAlgorithm,
    variant: Ed2kVariant,
    data: &[u8],
) -> String {
    let mut hasher = algorithm.create_hasher(variant);
    hasher.update(data);
    hasher.finalize()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
