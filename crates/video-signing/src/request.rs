use std::fmt;
use std::sync::Arc;

use crate::algorithm::SignAlgorithm;
use crate::alloc::SignatureBuffer;
use crate::error::SigningError;

/// Immutable, shareable key buffer in PEM encoding.
///
/// Clones share the same bytes; the buffer is freed when the last clone goes.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Arc<[u8]>);

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        KeyMaterial(Arc::from(bytes.into().into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key as PEM text.
    pub fn as_pem(&self) -> Result<&str, SigningError> {
        std::str::from_utf8(&self.0)
            .map_err(|e| SigningError::Key(format!("key is not PEM text: {e}")))
    }
}

impl From<&str> for KeyMaterial {
    fn from(pem: &str) -> Self {
        KeyMaterial::new(pem.as_bytes())
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        KeyMaterial::new(bytes)
    }
}

// Never print key bytes.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

/// Everything a provider needs to produce one signature.
///
/// The session owns the record. Providers only read `hash` and the keys; the
/// `signature` field is where the session collects the delivered result.
#[derive(Debug)]
pub struct SignatureRequest {
    hash: Vec<u8>,
    algorithm: SignAlgorithm,
    private_key: KeyMaterial,
    public_key: KeyMaterial,
    signature: SignatureBuffer,
}

impl SignatureRequest {
    pub fn new(
        algorithm: SignAlgorithm,
        private_key: KeyMaterial,
        public_key: KeyMaterial,
        signature: SignatureBuffer,
    ) -> Self {
        Self {
            hash: Vec::with_capacity(algorithm.digest_size()),
            algorithm,
            private_key,
            public_key,
            signature,
        }
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn algorithm(&self) -> SignAlgorithm {
        self.algorithm
    }

    pub fn private_key(&self) -> &KeyMaterial {
        &self.private_key
    }

    pub fn public_key(&self) -> &KeyMaterial {
        &self.public_key
    }

    pub fn signature(&self) -> &SignatureBuffer {
        &self.signature
    }

    pub fn signature_mut(&mut self) -> &mut SignatureBuffer {
        &mut self.signature
    }

    pub fn max_signature_size(&self) -> usize {
        self.signature.capacity()
    }

    /// Overwrites the hash for the next unit and clears the previous signature.
    pub fn prepare(&mut self, hash: &[u8]) -> Result<(), SigningError> {
        self.algorithm.check_digest(hash)?;
        self.hash.clear();
        self.hash.extend_from_slice(hash);
        self.signature.reset();
        Ok(())
    }

    pub(crate) fn into_signature(self) -> SignatureBuffer {
        self.signature
    }
}
