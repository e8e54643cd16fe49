use std::sync::Arc;

use tracing::debug;

use super::{SignatureStatus, SignerCache, SigningProvider, deliver};
use crate::alloc::{HeapAllocator, SignatureAllocator, SignatureBuffer};
use crate::error::SigningError;
use crate::request::SignatureRequest;

enum Slot {
    Empty,
    Ready(Vec<u8>),
}

/// Provider that signs on the caller's thread inside `sign_hash`.
///
/// The signature is held until the next poll picks it up.
pub struct InlineProvider {
    allocator: Arc<dyn SignatureAllocator>,
    signers: SignerCache,
    slot: Slot,
    ready: bool,
}

impl InlineProvider {
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(HeapAllocator::new()))
    }

    pub fn with_allocator(allocator: Arc<dyn SignatureAllocator>) -> Self {
        Self {
            allocator,
            signers: SignerCache::default(),
            slot: Slot::Empty,
            ready: false,
        }
    }
}

impl Default for InlineProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningProvider for InlineProvider {
    fn name(&self) -> &str {
        "inline"
    }

    fn allocator(&self) -> Arc<dyn SignatureAllocator> {
        Arc::clone(&self.allocator)
    }

    fn setup(&mut self) -> Result<(), SigningError> {
        if self.ready {
            return Err(SigningError::NotReady("provider is already set up".to_string()));
        }
        self.ready = true;
        debug!(provider = self.name(), "provider set up");
        Ok(())
    }

    fn sign_hash(&mut self, request: &SignatureRequest) -> Result<(), SigningError> {
        if !self.ready {
            return Err(SigningError::NotReady("provider is not set up".to_string()));
        }
        if let Slot::Ready(_) = self.slot {
            return Err(SigningError::NotReady(
                "previous signature has not been collected".to_string(),
            ));
        }
        request.algorithm().check_digest(request.hash())?;

        let signer = self.signers.signer_for(request)?;
        let signature = signer.sign_digest(request.hash())?;
        debug!(bytes = signature.len(), "signed inline");
        self.slot = Slot::Ready(signature);
        Ok(())
    }

    fn get_signature(&mut self, output: &mut SignatureBuffer) -> SignatureStatus {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Empty => SignatureStatus::Idle,
            Slot::Ready(signature) => deliver(output, &signature),
        }
    }

    fn teardown(&mut self) {
        if let Slot::Ready(_) = self.slot {
            debug!("discarding uncollected signature at teardown");
        }
        self.slot = Slot::Empty;
        self.signers.clear();
        self.ready = false;
        debug!(provider = self.name(), "provider torn down");
    }
}
