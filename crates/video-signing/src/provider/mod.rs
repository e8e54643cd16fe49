//! The contract between a signing session and a signing backend.
//!
//! A provider is driven through `setup`, any number of `sign_hash` /
//! `get_signature` rounds, and `teardown`. Polling is the only completion
//! channel, so synchronous and asynchronous backends look the same to the
//! session.

mod inline;
mod worker;

pub use inline::InlineProvider;
pub use worker::{WorkerConfig, WorkerProvider};

use std::sync::Arc;

use crate::algorithm::SignAlgorithm;
use crate::alloc::{SignatureAllocator, SignatureBuffer};
use crate::error::SigningError;
use crate::request::{KeyMaterial, SignatureRequest};
use crate::signing::{HashSigner, load_signer};

/// Outcome of a non-blocking poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// No request is outstanding. The output buffer was not touched.
    Idle,
    /// A request is outstanding and has not finished.
    Pending,
    /// The signature was copied into the output buffer. Reported once per request.
    Complete,
    /// The request finished without a signature. Reported once per request.
    Failed(SigningError),
}

impl SignatureStatus {
    /// The two-state view: true only when a new signature was delivered.
    pub fn is_complete(&self) -> bool {
        matches!(self, SignatureStatus::Complete)
    }
}

/// A pluggable signing backend, one instance per session.
pub trait SigningProvider: Send {
    /// Human-readable provider name, e.g. "inline" or "worker".
    fn name(&self) -> &str;

    /// Allocator the session must use for signature buffers handed to this provider.
    fn allocator(&self) -> Arc<dyn SignatureAllocator>;

    /// Acquire provider resources. Called once before any signing.
    fn setup(&mut self) -> Result<(), SigningError>;

    /// Submit `request` for signing.
    ///
    /// `Ok` means accepted: the signature may already be computed, or may be
    /// computed later. Either way it is delivered through [`get_signature`].
    /// The provider must not keep a reference to `request`.
    ///
    /// [`get_signature`]: SigningProvider::get_signature
    fn sign_hash(&mut self, request: &SignatureRequest) -> Result<(), SigningError>;

    /// Poll for the outstanding request without blocking.
    ///
    /// On [`SignatureStatus::Complete`] the signature has been written to `output`.
    /// For every other status `output` is left untouched.
    fn get_signature(&mut self, output: &mut SignatureBuffer) -> SignatureStatus;

    /// Release everything the provider holds. An outstanding request is
    /// cancelled and its signature is never delivered.
    fn teardown(&mut self);
}

impl<P: SigningProvider + ?Sized> SigningProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn allocator(&self) -> Arc<dyn SignatureAllocator> {
        (**self).allocator()
    }

    fn setup(&mut self) -> Result<(), SigningError> {
        (**self).setup()
    }

    fn sign_hash(&mut self, request: &SignatureRequest) -> Result<(), SigningError> {
        (**self).sign_hash(request)
    }

    fn get_signature(&mut self, output: &mut SignatureBuffer) -> SignatureStatus {
        (**self).get_signature(output)
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

/// Keeps the last decoded private key so a session does not re-parse its PEM
/// for every unit.
#[derive(Default)]
struct SignerCache {
    entry: Option<(SignAlgorithm, KeyMaterial, Arc<dyn HashSigner>)>,
}

impl SignerCache {
    fn signer_for(&mut self, request: &SignatureRequest) -> Result<Arc<dyn HashSigner>, SigningError> {
        if let Some((algorithm, key, signer)) = &self.entry {
            if *algorithm == request.algorithm() && key == request.private_key() {
                return Ok(Arc::clone(signer));
            }
        }
        let signer: Arc<dyn HashSigner> =
            Arc::from(load_signer(request.algorithm(), request.private_key())?);
        self.entry = Some((
            request.algorithm(),
            request.private_key().clone(),
            Arc::clone(&signer),
        ));
        Ok(signer)
    }

    fn clear(&mut self) {
        self.entry = None;
    }
}

/// Copies a finished signature into the caller's buffer.
fn deliver(output: &mut SignatureBuffer, signature: &[u8]) -> SignatureStatus {
    match output.write(signature) {
        Ok(()) => SignatureStatus::Complete,
        Err(e) => SignatureStatus::Failed(e),
    }
}
