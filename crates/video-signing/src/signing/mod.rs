mod signer;
mod ecdsa;
mod rsa;
mod verify;

pub use signer::HashSigner;
pub use ecdsa::EcdsaSigner;
pub use self::rsa::{RSA_MIN_KEY_BITS, RsaSigner};
pub use verify::SignatureVerifier;

use crate::algorithm::SignAlgorithm;
use crate::error::SigningError;
use crate::request::KeyMaterial;

/// Decodes `private_key` into the signer for `algorithm`.
pub fn load_signer(
    algorithm: SignAlgorithm,
    private_key: &KeyMaterial,
) -> Result<Box<dyn HashSigner>, SigningError> {
    let pem = private_key.as_pem()?;
    let signer: Box<dyn HashSigner> = match algorithm {
        SignAlgorithm::Rsa => Box::new(RsaSigner::from_pem(pem)?),
        SignAlgorithm::Ecdsa => Box::new(EcdsaSigner::from_pem(pem)?),
    };
    Ok(signer)
}

/// Checks that the two keys decode for `algorithm` and belong together.
/// Returns the signer so callers can size buffers from it.
pub fn check_key_pair(
    algorithm: SignAlgorithm,
    private_key: &KeyMaterial,
    public_key: &KeyMaterial,
) -> Result<Box<dyn HashSigner>, SigningError> {
    let signer = load_signer(algorithm, private_key)?;
    let verifier = SignatureVerifier::from_pem(algorithm, public_key.as_pem()?)?;
    if signer.public_key_der()? != verifier.public_key_der()? {
        return Err(SigningError::Key(
            "public key does not match the private key".to_string(),
        ));
    }
    Ok(signer)
}
