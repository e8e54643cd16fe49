use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::algorithm::SignAlgorithm;
use crate::alloc::SignatureAllocator;
use crate::error::SigningError;
use crate::provider::{SignatureStatus, SigningProvider};
use crate::request::{KeyMaterial, SignatureRequest};
use crate::signing::check_key_pair;

/// Interval used by [`SigningSession::sign_unit`] between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Algorithm and key pair a session signs with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub algorithm: SignAlgorithm,
    pub private_key: KeyMaterial,
    pub public_key: KeyMaterial,
}

impl SessionConfig {
    pub fn new(
        algorithm: SignAlgorithm,
        private_key: impl Into<KeyMaterial>,
        public_key: impl Into<KeyMaterial>,
    ) -> Self {
        Self {
            algorithm,
            private_key: private_key.into(),
            public_key: public_key.into(),
        }
    }
}

/// Result of signing one unit of video. Signing failures never abort the
/// pipeline; the unit is simply left unsigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSignature {
    Signed(Vec<u8>),
    Unsigned(SigningError),
}

impl UnitSignature {
    pub fn is_signed(&self) -> bool {
        matches!(self, UnitSignature::Signed(_))
    }

    pub fn signature(&self) -> Option<&[u8]> {
        match self {
            UnitSignature::Signed(signature) => Some(signature.as_slice()),
            UnitSignature::Unsigned(_) => None,
        }
    }
}

fn closed() -> SigningError {
    SigningError::NotReady("session is closed".to_string())
}

/// Drives one provider through setup, sign/poll rounds and teardown.
///
/// The session owns the request record and its signature buffer. It keeps at
/// most one request in flight.
pub struct SigningSession<P: SigningProvider> {
    provider: P,
    allocator: Arc<dyn SignatureAllocator>,
    request: Option<SignatureRequest>,
    in_flight: bool,
}

impl<P: SigningProvider> SigningSession<P> {
    /// Validates the key pair, sizes the signature buffer with the provider's
    /// allocator and sets the provider up.
    pub fn open(mut provider: P, config: SessionConfig) -> Result<Self, SigningError> {
        let SessionConfig {
            algorithm,
            private_key,
            public_key,
        } = config;
        let max_signature_size =
            check_key_pair(algorithm, &private_key, &public_key)?.max_signature_size();

        let allocator = provider.allocator();
        let buffer = allocator.allocate(max_signature_size)?;
        if let Err(e) = provider.setup() {
            if let Err(release) = allocator.release(buffer) {
                warn!(error = %release, "releasing signature buffer after failed setup");
            }
            return Err(e);
        }

        info!(
            provider = provider.name(),
            %algorithm,
            max_signature_size,
            "signing session opened"
        );
        Ok(Self {
            provider,
            allocator,
            request: Some(SignatureRequest::new(algorithm, private_key, public_key, buffer)),
            in_flight: false,
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn max_signature_size(&self) -> usize {
        self.request
            .as_ref()
            .map(SignatureRequest::max_signature_size)
            .unwrap_or(0)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Submits `hash` for signing.
    ///
    /// Fails with `NotReady` while an earlier request is still in flight.
    pub fn request_signature(&mut self, hash: &[u8]) -> Result<(), SigningError> {
        if self.in_flight {
            return Err(SigningError::NotReady(
                "previous signature has not completed".to_string(),
            ));
        }
        let request = self.request.as_mut().ok_or_else(closed)?;
        request.prepare(hash)?;
        self.provider.sign_hash(request).inspect_err(|e| {
            debug!(error = %e, "provider refused signing request");
        })?;
        self.in_flight = true;
        Ok(())
    }

    /// Polls once. Returns the signature on completion and `None` while pending
    /// or when nothing was requested.
    pub fn poll_signature(&mut self) -> Result<Option<Vec<u8>>, SigningError> {
        let request = self.request.as_mut().ok_or_else(closed)?;
        match self.provider.get_signature(request.signature_mut()) {
            SignatureStatus::Pending => Ok(None),
            SignatureStatus::Idle if !self.in_flight => Ok(None),
            SignatureStatus::Idle => {
                self.in_flight = false;
                warn!(provider = self.provider.name(), "provider lost the in-flight request");
                Err(SigningError::Backend(
                    "provider reported no outstanding request".to_string(),
                ))
            }
            SignatureStatus::Complete => {
                self.in_flight = false;
                let signature = request.signature().as_bytes();
                if signature.is_empty() {
                    return Err(SigningError::Backend(
                        "provider delivered an empty signature".to_string(),
                    ));
                }
                debug!(bytes = signature.len(), "signature collected");
                Ok(Some(signature.to_vec()))
            }
            SignatureStatus::Failed(e) => {
                self.in_flight = false;
                debug!(error = %e, "signing request failed");
                Err(e)
            }
        }
    }

    /// Polls every `interval` until the signature arrives or `timeout` passes.
    ///
    /// A timed-out request stays in flight; see [`abandon_request`].
    ///
    /// [`abandon_request`]: SigningSession::abandon_request
    pub fn wait_for_signature(
        &mut self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Vec<u8>, SigningError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(signature) = self.poll_signature()? {
                return Ok(signature);
            }
            if !self.in_flight {
                return Err(SigningError::NotReady("no request in flight".to_string()));
            }
            if Instant::now() >= deadline {
                return Err(SigningError::Timeout(timeout));
            }
            thread::sleep(interval);
        }
    }

    /// Async flavour of [`wait_for_signature`] for callers on a tokio runtime.
    ///
    /// [`wait_for_signature`]: SigningSession::wait_for_signature
    pub async fn signature_ready(
        &mut self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Vec<u8>, SigningError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(signature) = self.poll_signature()? {
                return Ok(signature);
            }
            if !self.in_flight {
                return Err(SigningError::NotReady("no request in flight".to_string()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SigningError::Timeout(timeout));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Gives up on the in-flight request by restarting the provider.
    pub fn abandon_request(&mut self) -> Result<(), SigningError> {
        if !self.in_flight {
            return Ok(());
        }
        info!(provider = self.provider.name(), "abandoning in-flight signing request");
        self.provider.teardown();
        self.in_flight = false;
        if let Some(request) = self.request.as_mut() {
            request.signature_mut().reset();
        }
        self.provider.setup()
    }

    /// Requests and waits for one signature. A unit that cannot be signed in
    /// time is reported unsigned and the pending request is abandoned.
    pub fn sign_unit(&mut self, hash: &[u8], timeout: Duration) -> UnitSignature {
        if let Err(e) = self.request_signature(hash) {
            return UnitSignature::Unsigned(e);
        }
        match self.wait_for_signature(timeout, DEFAULT_POLL_INTERVAL) {
            Ok(signature) => UnitSignature::Signed(signature),
            Err(e) => {
                if self.in_flight {
                    if let Err(restart) = self.abandon_request() {
                        warn!(error = %restart, "restarting provider after timeout");
                    }
                }
                UnitSignature::Unsigned(e)
            }
        }
    }

    /// Tears the provider down and returns the signature buffer to its allocator.
    pub fn close(mut self) -> Result<(), SigningError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), SigningError> {
        let Some(request) = self.request.take() else {
            return Ok(());
        };
        if self.in_flight {
            debug!("closing session with a request in flight");
        }
        self.provider.teardown();
        self.in_flight = false;
        let result = self.allocator.release(request.into_signature());
        info!(provider = self.provider.name(), "signing session closed");
        result
    }
}

impl<P: SigningProvider> Drop for SigningSession<P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "closing signing session");
        }
    }
}

/// A session shared between threads. Every operation holds the session lock,
/// so requests are serialized here rather than inside the provider.
pub struct SharedSession<P: SigningProvider> {
    inner: Arc<Mutex<SigningSession<P>>>,
}

impl<P: SigningProvider> Clone for SharedSession<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: SigningProvider> SharedSession<P> {
    pub fn new(session: SigningSession<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SigningSession<P>>, SigningError> {
        self.inner
            .lock()
            .map_err(|e| SigningError::ResourceExhausted(format!("Lock poisoned: {e}")))
    }

    pub fn request_signature(&self, hash: &[u8]) -> Result<(), SigningError> {
        self.lock()?.request_signature(hash)
    }

    pub fn poll_signature(&self) -> Result<Option<Vec<u8>>, SigningError> {
        self.lock()?.poll_signature()
    }

    /// Signs one unit while holding the lock for the whole request lifecycle.
    pub fn sign_unit(&self, hash: &[u8], timeout: Duration) -> UnitSignature {
        match self.lock() {
            Ok(mut session) => session.sign_unit(hash, timeout),
            Err(e) => UnitSignature::Unsigned(e),
        }
    }

    /// Closes the session once this is the last handle.
    pub fn close(self) -> Result<(), SigningError> {
        let mutex = Arc::try_unwrap(self.inner).map_err(|_| {
            SigningError::NotReady("session is still shared".to_string())
        })?;
        let session = mutex
            .into_inner()
            .map_err(|e| SigningError::ResourceExhausted(format!("Lock poisoned: {e}")))?;
        session.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::TrackingAllocator;
    use crate::error::ErrorKind;
    use crate::provider::{InlineProvider, WorkerConfig, WorkerProvider};

    const EC_PRIVATE: &str = include_str!("../tests/fixtures/ecdsa_private.pem");
    const EC_PUBLIC: &str = include_str!("../tests/fixtures/ecdsa_public.pem");
    const EC_OTHER_PUBLIC: &str = include_str!("../tests/fixtures/ecdsa_other_public.pem");
    const RSA_PRIVATE: &str = include_str!("../tests/fixtures/rsa_private.pem");
    const RSA_PUBLIC: &str = include_str!("../tests/fixtures/rsa_public.pem");

    fn ecdsa_config() -> SessionConfig {
        SessionConfig::new(SignAlgorithm::Ecdsa, EC_PRIVATE, EC_PUBLIC)
    }

    #[test]
    fn open_sizes_buffer_from_key() {
        let rsa = SigningSession::open(
            InlineProvider::new(),
            SessionConfig::new(SignAlgorithm::Rsa, RSA_PRIVATE, RSA_PUBLIC),
        )
        .unwrap();
        assert_eq!(rsa.max_signature_size(), 256);

        let ecdsa = SigningSession::open(InlineProvider::new(), ecdsa_config()).unwrap();
        assert_eq!(ecdsa.max_signature_size(), 72);
    }

    #[test]
    fn open_rejects_mismatched_public_key() {
        let err = SigningSession::open(
            InlineProvider::new(),
            SessionConfig::new(SignAlgorithm::Ecdsa, EC_PRIVATE, EC_OTHER_PUBLIC),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::KeyError);
    }

    #[test]
    fn open_rejects_key_of_other_algorithm() {
        let err = SigningSession::open(
            InlineProvider::new(),
            SessionConfig::new(SignAlgorithm::Rsa, EC_PRIVATE, EC_PUBLIC),
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn poll_before_request_is_none() {
        let mut session = SigningSession::open(InlineProvider::new(), ecdsa_config()).unwrap();
        assert_eq!(session.poll_signature().unwrap(), None);
    }

    #[test]
    fn request_then_poll_yields_bounded_signature() {
        let mut session = SigningSession::open(InlineProvider::new(), ecdsa_config()).unwrap();
        session.request_signature(&[0u8; 32]).unwrap();
        assert!(session.is_in_flight());

        let signature = session.poll_signature().unwrap().unwrap();
        assert!(!signature.is_empty());
        assert!(signature.len() <= session.max_signature_size());
        assert!(!session.is_in_flight());
        assert_eq!(session.poll_signature().unwrap(), None);
    }

    #[test]
    fn second_request_while_in_flight_is_refused() {
        let provider = WorkerProvider::new(WorkerConfig {
            latency_ms: 500,
            ..WorkerConfig::default()
        });
        let mut session = SigningSession::open(provider, ecdsa_config()).unwrap();
        session.request_signature(&[1u8; 32]).unwrap();
        let err = session.request_signature(&[2u8; 32]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn wrong_hash_length_leaves_session_usable() {
        let mut session = SigningSession::open(InlineProvider::new(), ecdsa_config()).unwrap();
        let err = session.request_signature(&[0u8; 20]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!session.is_in_flight());

        session.request_signature(&[0u8; 32]).unwrap();
        assert!(session.poll_signature().unwrap().is_some());
    }

    #[test]
    fn wait_times_out_and_unit_is_unsigned() {
        let provider = WorkerProvider::new(WorkerConfig {
            latency_ms: 60_000,
            teardown_grace_ms: 1_000,
        });
        let mut session = SigningSession::open(provider, ecdsa_config()).unwrap();

        let unit = session.sign_unit(&[5u8; 32], Duration::from_millis(20));
        assert!(matches!(unit, UnitSignature::Unsigned(SigningError::Timeout(_))));
        assert!(!session.is_in_flight(), "timed-out request is abandoned");
    }

    #[test]
    fn unit_after_timeout_is_signed_by_restarted_provider() {
        let provider = WorkerProvider::new(WorkerConfig {
            latency_ms: 300,
            teardown_grace_ms: 1_000,
        });
        let mut session = SigningSession::open(provider, ecdsa_config()).unwrap();

        let first = session.sign_unit(&[6u8; 32], Duration::from_millis(20));
        assert!(matches!(first, UnitSignature::Unsigned(SigningError::Timeout(_))));

        let hash = [7u8; 32];
        let second = session.sign_unit(&hash, Duration::from_secs(10));
        let signature = second.signature().expect("next unit should be signed");
        crate::signing::SignatureVerifier::from_pem(SignAlgorithm::Ecdsa, EC_PUBLIC)
            .unwrap()
            .verify(&hash, signature)
            .unwrap();
        assert!(!session.is_in_flight());
        session.close().unwrap();
    }

    #[test]
    fn close_returns_buffer_to_provider_allocator() {
        let tracking = Arc::new(TrackingAllocator::new());
        let provider = InlineProvider::with_allocator(tracking.clone());
        let mut session = SigningSession::open(provider, ecdsa_config()).unwrap();
        assert_eq!(tracking.outstanding().unwrap(), 1);

        session.request_signature(&[0u8; 32]).unwrap();
        session.close().unwrap();
        assert_eq!(tracking.outstanding().unwrap(), 0);
    }

    #[test]
    fn drop_releases_buffer() {
        let tracking = Arc::new(TrackingAllocator::new());
        {
            let provider = InlineProvider::with_allocator(tracking.clone());
            let _session = SigningSession::open(provider, ecdsa_config()).unwrap();
        }
        assert_eq!(tracking.outstanding().unwrap(), 0);
        assert_eq!(tracking.total_allocations().unwrap(), 1);
    }

    #[test]
    fn shared_session_close_requires_last_handle() {
        let session = SigningSession::open(InlineProvider::new(), ecdsa_config()).unwrap();
        let shared = SharedSession::new(session);
        let other = shared.clone();

        assert!(shared.sign_unit(&[0u8; 32], Duration::from_secs(1)).is_signed());
        assert_eq!(shared.close().unwrap_err().kind(), ErrorKind::NotReady);
        other.close().unwrap();
    }

    #[tokio::test]
    async fn signature_ready_awaits_worker() {
        let provider = WorkerProvider::new(WorkerConfig {
            latency_ms: 50,
            ..WorkerConfig::default()
        });
        let mut session = SigningSession::open(provider, ecdsa_config()).unwrap();
        session.request_signature(&[0u8; 32]).unwrap();

        let signature = session
            .signature_ready(Duration::from_secs(10), Duration::from_millis(2))
            .await
            .unwrap();
        assert!(signature.len() <= 72);
    }
}
