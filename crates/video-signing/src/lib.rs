pub mod algorithm;
pub mod alloc;
pub mod error;
pub mod provider;
pub mod request;
pub mod session;
pub mod signing;

pub use algorithm::{HASH_DIGEST_SIZE, SignAlgorithm};
pub use alloc::{HeapAllocator, SignatureAllocator, SignatureBuffer, TrackingAllocator};
pub use error::{ErrorKind, SigningError};
pub use provider::{InlineProvider, SignatureStatus, SigningProvider, WorkerConfig, WorkerProvider};
pub use request::{KeyMaterial, SignatureRequest};
pub use session::{SessionConfig, SharedSession, SigningSession, UnitSignature};
pub use signing::{EcdsaSigner, HashSigner, RsaSigner, SignatureVerifier};
