use std::fmt;

use k256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner};
use k256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use k256::{PublicKey, SecretKey};

use super::signer::HashSigner;
use crate::algorithm::{ECDSA_MAX_SIGNATURE_SIZE, SignAlgorithm};
use crate::error::SigningError;

/// ECDSA signer using the secp256k1 curve.
///
/// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or SEC1 (`BEGIN EC PRIVATE KEY`) PEM.
/// Signatures are low-S and DER encoded, so their length varies up to
/// [`ECDSA_MAX_SIGNATURE_SIZE`].
pub struct EcdsaSigner {
    signing_key: SigningKey,
}

impl EcdsaSigner {
    pub fn from_pem(pem: &str) -> Result<Self, SigningError> {
        let secret = match SecretKey::from_pkcs8_pem(pem) {
            Ok(secret) => secret,
            Err(_) => SecretKey::from_sec1_pem(pem)
                .map_err(|e| SigningError::Key(format!("decoding secp256k1 private key: {e}")))?,
        };
        Ok(Self {
            signing_key: SigningKey::from(secret),
        })
    }
}

impl fmt::Debug for EcdsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EcdsaSigner(secp256k1)")
    }
}

impl HashSigner for EcdsaSigner {
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        SignAlgorithm::Ecdsa.check_digest(digest)?;
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| SigningError::Backend(format!("secp256k1 sign_prehash failed: {e}")))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn public_key_der(&self) -> Result<Vec<u8>, SigningError> {
        PublicKey::from(self.signing_key.verifying_key())
            .to_public_key_der()
            .map(|doc| doc.into_vec())
            .map_err(|e| SigningError::Key(format!("encoding secp256k1 public key: {e}")))
    }

    fn max_signature_size(&self) -> usize {
        ECDSA_MAX_SIGNATURE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::VerifyingKey;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use sha2::{Digest, Sha256};

    const PKCS8_PEM: &str = include_str!("../../tests/fixtures/ecdsa_private.pem");
    const SEC1_PEM: &str = include_str!("../../tests/fixtures/ecdsa_sec1_private.pem");

    #[test]
    fn deterministic_signing() {
        let signer = EcdsaSigner::from_pem(PKCS8_PEM).unwrap();
        let digest = Sha256::digest(b"hello");
        let sig1 = signer.sign_digest(&digest).unwrap();
        let sig2 = signer.sign_digest(&digest).unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signature_fits_der_bound() {
        let signer = EcdsaSigner::from_pem(PKCS8_PEM).unwrap();
        let sig = signer.sign_digest(&Sha256::digest(b"data")).unwrap();
        assert!(!sig.is_empty());
        assert!(sig.len() <= ECDSA_MAX_SIGNATURE_SIZE);
        assert_eq!(sig[0], 0x30, "DER sequence tag");
    }

    #[test]
    fn sec1_and_pkcs8_encodings_are_the_same_key() {
        let pkcs8 = EcdsaSigner::from_pem(PKCS8_PEM).unwrap();
        let sec1 = EcdsaSigner::from_pem(SEC1_PEM).unwrap();
        assert_eq!(pkcs8.public_key_der().unwrap(), sec1.public_key_der().unwrap());
    }

    #[test]
    fn signature_over_zero_digest_verifies() {
        let signer = EcdsaSigner::from_pem(PKCS8_PEM).unwrap();
        let digest = [0u8; 32];
        let sig = signer.sign_digest(&digest).unwrap();

        let verifying_key: &VerifyingKey = signer.signing_key.verifying_key();
        let signature = Signature::from_der(&sig).unwrap();
        verifying_key.verify_prehash(&digest, &signature).unwrap();
    }

    #[test]
    fn rsa_pem_is_key_error() {
        let rsa_pem = include_str!("../../tests/fixtures/rsa_private.pem");
        assert!(EcdsaSigner::from_pem(rsa_pem).is_err());
    }
}
