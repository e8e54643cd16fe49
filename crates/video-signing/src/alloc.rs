//! Signature buffer allocation.
//!
//! A provider hands its allocator to the session, which sizes the signature
//! buffers with it and gives them back to the same allocator at close. Every
//! buffer remembers which allocator produced it, so a buffer can never be
//! released through the wrong one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SigningError;

/// Largest buffer any built-in allocator will hand out.
pub const MAX_ALLOCATION: usize = 64 * 1024;

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorId(u64);

impl AllocatorId {
    pub fn next() -> Self {
        AllocatorId(NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Fixed-capacity output buffer for a signature.
///
/// `signature_size` stays zero until a provider writes a completed signature.
#[derive(Debug)]
pub struct SignatureBuffer {
    data: Box<[u8]>,
    len: usize,
    owner: AllocatorId,
    handle: u64,
}

impl SignatureBuffer {
    /// Builds a zeroed buffer owned by `owner`. Allocator implementations
    /// call this; everyone else goes through [`SignatureAllocator::allocate`].
    pub fn new(owner: AllocatorId, handle: u64, capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            owner,
            handle,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn signature_size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The completed signature, empty before completion.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn owner(&self) -> AllocatorId {
        self.owner
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }

    /// Stores `signature`, failing without touching the buffer if it does not fit.
    pub fn write(&mut self, signature: &[u8]) -> Result<(), SigningError> {
        if signature.len() > self.data.len() {
            return Err(SigningError::InvalidArgument(format!(
                "signature of {} bytes exceeds buffer capacity {}",
                signature.len(),
                self.data.len()
            )));
        }
        self.data[..signature.len()].copy_from_slice(signature);
        self.data[signature.len()..].fill(0);
        self.len = signature.len();
        Ok(())
    }
}

/// Allocator capability injected into a provider.
pub trait SignatureAllocator: Send + Sync {
    fn id(&self) -> AllocatorId;

    fn allocate(&self, size: usize) -> Result<SignatureBuffer, SigningError>;

    /// Takes back a buffer produced by this allocator.
    fn release(&self, buffer: SignatureBuffer) -> Result<(), SigningError>;
}

fn check_size(size: usize) -> Result<(), SigningError> {
    if size == 0 {
        return Err(SigningError::InvalidArgument(
            "cannot allocate an empty signature buffer".to_string(),
        ));
    }
    if size > MAX_ALLOCATION {
        return Err(SigningError::ResourceExhausted(format!(
            "requested {size} bytes, limit is {MAX_ALLOCATION}"
        )));
    }
    Ok(())
}

fn check_owner(id: AllocatorId, buffer: &SignatureBuffer) -> Result<(), SigningError> {
    if buffer.owner() != id {
        return Err(SigningError::InvalidArgument(format!(
            "buffer {} belongs to allocator {:?}, not {:?}",
            buffer.handle(),
            buffer.owner(),
            id
        )));
    }
    Ok(())
}

/// Plain heap allocator, the default for software providers.
#[derive(Debug)]
pub struct HeapAllocator {
    id: AllocatorId,
    next_handle: AtomicU64,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self {
            id: AllocatorId::next(),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureAllocator for HeapAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn allocate(&self, size: usize) -> Result<SignatureBuffer, SigningError> {
        check_size(size)?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        Ok(SignatureBuffer::new(self.id, handle, size))
    }

    fn release(&self, buffer: SignatureBuffer) -> Result<(), SigningError> {
        check_owner(self.id, &buffer)?;
        drop(buffer);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Ledger {
    next_handle: u64,
    outstanding: HashMap<u64, usize>,
    total_allocations: u64,
}

/// Allocator that records every live buffer, used to check for leaks.
#[derive(Debug)]
pub struct TrackingAllocator {
    id: AllocatorId,
    ledger: Mutex<Ledger>,
}

impl TrackingAllocator {
    pub fn new() -> Self {
        Self {
            id: AllocatorId::next(),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> Result<std::sync::MutexGuard<'_, Ledger>, SigningError> {
        self.ledger
            .lock()
            .map_err(|e| SigningError::ResourceExhausted(format!("Lock poisoned: {e}")))
    }

    /// Number of buffers handed out and not yet released.
    pub fn outstanding(&self) -> Result<usize, SigningError> {
        Ok(self.ledger()?.outstanding.len())
    }

    pub fn outstanding_bytes(&self) -> Result<usize, SigningError> {
        Ok(self.ledger()?.outstanding.values().sum())
    }

    pub fn total_allocations(&self) -> Result<u64, SigningError> {
        Ok(self.ledger()?.total_allocations)
    }
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureAllocator for TrackingAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn allocate(&self, size: usize) -> Result<SignatureBuffer, SigningError> {
        check_size(size)?;
        let mut ledger = self.ledger()?;
        ledger.next_handle += 1;
        let handle = ledger.next_handle;
        ledger.outstanding.insert(handle, size);
        ledger.total_allocations += 1;
        Ok(SignatureBuffer::new(self.id, handle, size))
    }

    fn release(&self, buffer: SignatureBuffer) -> Result<(), SigningError> {
        check_owner(self.id, &buffer)?;
        let mut ledger = self.ledger()?;
        match ledger.outstanding.remove(&buffer.handle()) {
            Some(_) => Ok(()),
            None => Err(SigningError::InvalidArgument(format!(
                "buffer {} is not outstanding",
                buffer.handle()
            ))),
        }
    }
}
