use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SigningError;

/// Size of the SHA-256 digests handed to providers.
pub const HASH_DIGEST_SIZE: usize = 32;

/// Upper bound of a DER encoded secp256k1 ECDSA signature.
pub const ECDSA_MAX_SIGNATURE_SIZE: usize = 72;

/// Signing algorithm selected when a session is opened.
///
/// Both algorithms sign SHA-256 digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignAlgorithm {
    /// RSA PKCS#1 v1.5.
    Rsa,
    /// ECDSA over secp256k1, DER encoded.
    Ecdsa,
}

impl SignAlgorithm {
    pub fn digest_size(self) -> usize {
        HASH_DIGEST_SIZE
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignAlgorithm::Rsa => "rsa-pkcs1v15-sha256",
            SignAlgorithm::Ecdsa => "ecdsa-secp256k1-sha256",
        }
    }

    /// Rejects digests whose length does not match this algorithm.
    pub fn check_digest(self, hash: &[u8]) -> Result<(), SigningError> {
        if hash.len() != self.digest_size() {
            return Err(SigningError::InvalidArgument(format!(
                "{} expects a {}-byte digest, got {} bytes",
                self.as_str(),
                self.digest_size(),
                hash.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" | "rsa-pkcs1v15-sha256" => Ok(SignAlgorithm::Rsa),
            "ecdsa" | "ecdsa-secp256k1-sha256" => Ok(SignAlgorithm::Ecdsa),
            other => Err(SigningError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}
