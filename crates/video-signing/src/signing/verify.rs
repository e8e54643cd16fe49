use k256::ecdsa::VerifyingKey as EcdsaVerifyingKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::hazmat::PrehashVerifier;
use rsa::RsaPublicKey;
use sha2::Sha256;

use crate::algorithm::SignAlgorithm;
use crate::error::SigningError;

/// Reference verifier for signatures produced by the built-in signers.
pub enum SignatureVerifier {
    Rsa(RsaVerifyingKey<Sha256>, Vec<u8>),
    Ecdsa(EcdsaVerifyingKey),
}

impl SignatureVerifier {
    /// Decodes a SubjectPublicKeyInfo (`BEGIN PUBLIC KEY`) PEM, or for RSA also
    /// a PKCS#1 `BEGIN RSA PUBLIC KEY` PEM.
    pub fn from_pem(algorithm: SignAlgorithm, pem: &str) -> Result<Self, SigningError> {
        match algorithm {
            SignAlgorithm::Rsa => {
                let public_key = match RsaPublicKey::from_public_key_pem(pem) {
                    Ok(key) => key,
                    Err(_) => RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| {
                        SigningError::Key(format!("decoding RSA public key: {e}"))
                    })?,
                };
                let der = public_key
                    .to_public_key_der()
                    .map_err(|e| SigningError::Key(format!("encoding RSA public key: {e}")))?
                    .into_vec();
                Ok(SignatureVerifier::Rsa(RsaVerifyingKey::new(public_key), der))
            }
            SignAlgorithm::Ecdsa => {
                let public_key = k256::PublicKey::from_public_key_pem(pem).map_err(|e| {
                    SigningError::Key(format!("decoding secp256k1 public key: {e}"))
                })?;
                Ok(SignatureVerifier::Ecdsa(EcdsaVerifyingKey::from(public_key)))
            }
        }
    }

    pub fn algorithm(&self) -> SignAlgorithm {
        match self {
            SignatureVerifier::Rsa(..) => SignAlgorithm::Rsa,
            SignatureVerifier::Ecdsa(_) => SignAlgorithm::Ecdsa,
        }
    }

    /// DER SubjectPublicKeyInfo of the key, used to match it against a signer.
    pub fn public_key_der(&self) -> Result<Vec<u8>, SigningError> {
        match self {
            SignatureVerifier::Rsa(_, der) => Ok(der.clone()),
            SignatureVerifier::Ecdsa(key) => k256::PublicKey::from(key)
                .to_public_key_der()
                .map(|doc| doc.into_vec())
                .map_err(|e| SigningError::Key(format!("encoding secp256k1 public key: {e}"))),
        }
    }

    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<(), SigningError> {
        self.algorithm().check_digest(digest)?;
        let invalid = |e: rsa::signature::Error| {
            SigningError::InvalidArgument(format!("signature rejected: {e}"))
        };
        match self {
            SignatureVerifier::Rsa(key, _) => {
                let signature = RsaSignature::try_from(signature).map_err(invalid)?;
                key.verify_prehash(digest, &signature).map_err(invalid)
            }
            SignatureVerifier::Ecdsa(key) => {
                let signature = k256::ecdsa::Signature::from_der(signature).map_err(invalid)?;
                key.verify_prehash(digest, &signature).map_err(invalid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{EcdsaSigner, HashSigner, RsaSigner};

    const RSA_PRIVATE: &str = include_str!("../../tests/fixtures/rsa_private.pem");
    const RSA_PUBLIC: &str = include_str!("../../tests/fixtures/rsa_public.pem");
    const EC_PRIVATE: &str = include_str!("../../tests/fixtures/ecdsa_private.pem");
    const EC_PUBLIC: &str = include_str!("../../tests/fixtures/ecdsa_public.pem");
    const EC_OTHER_PUBLIC: &str = include_str!("../../tests/fixtures/ecdsa_other_public.pem");

    #[test]
    fn rsa_signature_verifies_with_paired_key() {
        let signer = RsaSigner::from_pem(RSA_PRIVATE).unwrap();
        let verifier = SignatureVerifier::from_pem(SignAlgorithm::Rsa, RSA_PUBLIC).unwrap();
        let digest = [0x42u8; 32];
        let sig = signer.sign_digest(&digest).unwrap();
        verifier.verify(&digest, &sig).unwrap();
        assert_eq!(verifier.public_key_der().unwrap(), signer.public_key_der().unwrap());
    }

    #[test]
    fn ecdsa_signature_fails_with_other_key() {
        let signer = EcdsaSigner::from_pem(EC_PRIVATE).unwrap();
        let verifier = SignatureVerifier::from_pem(SignAlgorithm::Ecdsa, EC_OTHER_PUBLIC).unwrap();
        let digest = [0u8; 32];
        let sig = signer.sign_digest(&digest).unwrap();
        assert!(verifier.verify(&digest, &sig).is_err());
    }

    #[test]
    fn tampered_digest_is_rejected() {
        let signer = EcdsaSigner::from_pem(EC_PRIVATE).unwrap();
        let verifier = SignatureVerifier::from_pem(SignAlgorithm::Ecdsa, EC_PUBLIC).unwrap();
        let sig = signer.sign_digest(&[1u8; 32]).unwrap();
        assert!(verifier.verify(&[2u8; 32], &sig).is_err());
    }

    #[test]
    fn rsa_public_key_for_ecdsa_is_key_error() {
        let err = SignatureVerifier::from_pem(SignAlgorithm::Ecdsa, RSA_PUBLIC).err().unwrap();
        assert!(err.is_configuration());
    }
}
