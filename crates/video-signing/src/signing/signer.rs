use crate::error::SigningError;

/// Signs pre-computed digests with a decoded private key.
///
/// Implementations are sync and CPU-bound. Providers decide whether the call
/// runs on the caller's thread or somewhere else.
pub trait HashSigner: Send + Sync {
    /// Sign a digest of the algorithm's digest size. Returns raw signature bytes.
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// DER SubjectPublicKeyInfo of the paired public key.
    fn public_key_der(&self) -> Result<Vec<u8>, SigningError>;

    /// Largest signature `sign_digest` can return for this key.
    fn max_signature_size(&self) -> usize;
}
