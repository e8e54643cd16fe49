use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{SignatureStatus, SignerCache, SigningProvider, deliver};
use crate::alloc::{HeapAllocator, SignatureAllocator, SignatureBuffer};
use crate::error::SigningError;
use crate::request::SignatureRequest;
use crate::signing::HashSigner;

/// Worker provider tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Extra delay before each signature, standing in for hardware latency.
    pub latency_ms: u64,
    /// How long teardown waits for the worker thread to exit.
    pub teardown_grace_ms: u64,
}

impl WorkerConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            teardown_grace_ms: 1_000,
        }
    }
}

type Reply = Result<Vec<u8>, SigningError>;

struct Job {
    signer: Arc<dyn HashSigner>,
    hash: Vec<u8>,
    reply: oneshot::Sender<Reply>,
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    cancelled: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Provider that signs on a dedicated background thread.
///
/// `sign_hash` only enqueues the job; the result is picked up by polling.
/// Teardown cancels an outstanding job: its signature is never delivered and
/// the worker drops the copied hash and key reference when it notices.
pub struct WorkerProvider {
    config: WorkerConfig,
    allocator: Arc<dyn SignatureAllocator>,
    signers: SignerCache,
    worker: Option<Worker>,
    pending: Option<oneshot::Receiver<Reply>>,
}

impl WorkerProvider {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_allocator(config, Arc::new(HeapAllocator::new()))
    }

    pub fn with_allocator(config: WorkerConfig, allocator: Arc<dyn SignatureAllocator>) -> Self {
        Self {
            config,
            allocator,
            signers: SignerCache::default(),
            worker: None,
            pending: None,
        }
    }

    /// Whether a request has been accepted and not yet reported.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }
}

impl SigningProvider for WorkerProvider {
    fn name(&self) -> &str {
        "worker"
    }

    fn allocator(&self) -> Arc<dyn SignatureAllocator> {
        Arc::clone(&self.allocator)
    }

    fn setup(&mut self) -> Result<(), SigningError> {
        if self.worker.is_some() {
            return Err(SigningError::NotReady("provider is already set up".to_string()));
        }
        let (jobs, queue) = mpsc::channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let latency = self.config.latency();
        let flag = Arc::clone(&cancelled);
        let handle = thread::Builder::new()
            .name("video-signing-worker".to_string())
            .spawn(move || run_worker(queue, latency, flag))
            .map_err(|e| SigningError::ResourceExhausted(format!("spawning signing worker: {e}")))?;

        self.worker = Some(Worker { jobs, cancelled, thread: handle });
        info!(latency_ms = self.config.latency_ms, "signing worker started");
        Ok(())
    }

    fn sign_hash(&mut self, request: &SignatureRequest) -> Result<(), SigningError> {
        let Some(worker) = &self.worker else {
            return Err(SigningError::NotReady("provider is not set up".to_string()));
        };
        if self.pending.is_some() {
            return Err(SigningError::NotReady("a request is already in flight".to_string()));
        }
        request.algorithm().check_digest(request.hash())?;

        let signer = self.signers.signer_for(request)?;
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            signer,
            hash: request.hash().to_vec(),
            reply,
        };
        worker.jobs.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SigningError::ResourceExhausted("signing queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SigningError::ResourceExhausted("signing worker has stopped".to_string())
            }
        })?;

        self.pending = Some(receiver);
        debug!("request queued for signing worker");
        Ok(())
    }

    fn get_signature(&mut self, output: &mut SignatureBuffer) -> SignatureStatus {
        let Some(mut receiver) = self.pending.take() else {
            return SignatureStatus::Idle;
        };
        match receiver.try_recv() {
            Ok(Ok(signature)) => deliver(output, &signature),
            Ok(Err(e)) => {
                warn!(error = %e, "signing worker reported a failure");
                SignatureStatus::Failed(e)
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                self.pending = Some(receiver);
                SignatureStatus::Pending
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("signing worker dropped the request");
                SignatureStatus::Failed(SigningError::Backend(
                    "signing worker dropped the request".to_string(),
                ))
            }
        }
    }

    fn teardown(&mut self) {
        if self.pending.take().is_some() {
            info!("cancelling in-flight signing request");
        }
        self.signers.clear();

        let Some(Worker { jobs, cancelled, thread: handle }) = self.worker.take() else {
            return;
        };
        cancelled.store(true, Ordering::Release);
        drop(jobs);
        handle.thread().unpark();

        let deadline = Instant::now() + self.config.teardown_grace();
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("signing worker panicked");
            }
            debug!("signing worker stopped");
        } else {
            // The thread exits on its own once the current signature finishes.
            warn!(
                grace_ms = self.config.teardown_grace_ms,
                "signing worker still busy after teardown grace, detaching"
            );
        }
    }
}

impl Drop for WorkerProvider {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_worker(mut queue: mpsc::Receiver<Job>, latency: Duration, cancelled: Arc<AtomicBool>) {
    while let Some(job) = queue.blocking_recv() {
        if !latency.is_zero() {
            let deadline = Instant::now() + latency;
            while !cancelled.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::park_timeout(deadline - now);
            }
        }
        if cancelled.load(Ordering::Acquire) {
            debug!("dropping job cancelled by teardown");
            break;
        }
        let result = job.signer.sign_digest(&job.hash);
        if job.reply.send(result).is_err() {
            debug!("requester went away before the signature was ready");
        }
    }
}
