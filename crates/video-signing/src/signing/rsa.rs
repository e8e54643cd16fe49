use std::fmt;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::signature::SignatureEncoding;
use rsa::signature::hazmat::PrehashSigner;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::Sha256;

use super::signer::HashSigner;
use crate::algorithm::SignAlgorithm;
use crate::error::SigningError;

/// Smallest modulus accepted for signing keys.
pub const RSA_MIN_KEY_BITS: usize = 2048;

/// RSA PKCS#1 v1.5 signer over SHA-256 digests.
///
/// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
pub struct RsaSigner {
    signing_key: SigningKey<Sha256>,
    private_key: RsaPrivateKey,
}

impl RsaSigner {
    pub fn from_pem(pem: &str) -> Result<Self, SigningError> {
        let private_key = match RsaPrivateKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(_) => RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| SigningError::Key(format!("decoding RSA private key: {e}")))?,
        };
        let bits = private_key.size() * 8;
        if bits < RSA_MIN_KEY_BITS {
            return Err(SigningError::Key(format!(
                "RSA key is {bits} bits, at least {RSA_MIN_KEY_BITS} required"
            )));
        }
        let signing_key = SigningKey::<Sha256>::new(private_key.clone());
        Ok(Self { signing_key, private_key })
    }
}

impl fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RsaSigner({} bits)", self.private_key.size() * 8)
    }
}

impl HashSigner for RsaSigner {
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        SignAlgorithm::Rsa.check_digest(digest)?;
        let signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| SigningError::Backend(format!("RSA sign_prehash failed: {e}")))?;
        Ok(signature.to_vec())
    }

    fn public_key_der(&self) -> Result<Vec<u8>, SigningError> {
        self.private_key
            .to_public_key()
            .to_public_key_der()
            .map(|doc| doc.into_vec())
            .map_err(|e| SigningError::Key(format!("encoding RSA public key: {e}")))
    }

    fn max_signature_size(&self) -> usize {
        self.private_key.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::hazmat::PrehashVerifier;
    use sha2::Digest;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/rsa_private.pem");

    fn test_signer() -> RsaSigner {
        RsaSigner::from_pem(PRIVATE_PEM).unwrap()
    }

    #[test]
    fn deterministic_signing() {
        let signer = test_signer();
        let digest = Sha256::digest(b"hello");
        let sig1 = signer.sign_digest(&digest).unwrap();
        let sig2 = signer.sign_digest(&digest).unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signature_is_256_bytes() {
        let signer = test_signer();
        let sig = signer.sign_digest(&Sha256::digest(b"data")).unwrap();
        assert_eq!(sig.len(), RSA_MIN_KEY_BITS / 8);
        assert_eq!(signer.max_signature_size(), sig.len());
    }

    #[test]
    fn signature_verifies() {
        let signer = test_signer();
        let digest = Sha256::digest(b"verify me");
        let sig_bytes = signer.sign_digest(&digest).unwrap();

        let verifying_key = VerifyingKey::<Sha256>::new(signer.private_key.to_public_key());
        let signature = Signature::try_from(sig_bytes.as_slice()).unwrap();
        verifying_key.verify_prehash(&digest, &signature).unwrap();
    }

    #[test]
    fn wrong_digest_length_is_rejected() {
        let err = test_signer().sign_digest(&[0u8; 31]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn garbage_pem_is_key_error() {
        let err = RsaSigner::from_pem("not a key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyError);
    }

    #[test]
    fn debug_shows_size_not_key() {
        let rendered = format!("{:?}", test_signer());
        assert_eq!(rendered, "RsaSigner(2048 bits)");
    }
}
