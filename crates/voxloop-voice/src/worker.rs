//! Worker runtime: isolated engine units reached only by message passing.
//!
//! A [`WorkerUnit`] is a tokio task that owns one handler (and therefore one
//! engine). It drains a bounded request channel strictly in arrival order and
//! posts every reply, wrapped in a [`WorkerEnvelope`], onto a reply channel
//! owned by its [`WorkerClient`].
//!
//! Correlation happens in the client: a reply is accepted only when it comes
//! from the current generation ([`WorkerId`]) and answers the request the
//! client is waiting on ([`RequestId`]). Everything else is stale and is
//! dropped without side effects. This is what makes `terminate()` safe: a
//! unit that is aborted mid-request can still have replies queued, and those
//! replies no longer match anything.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::VoiceError;
use crate::protocol::{ReplyKind, WorkerReply, WorkerRequest};

// ── Identifiers ────────────────────────────────────────────────────

/// Generation stamp of a worker unit. A fresh id is issued on every spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Identifier of one request; unique for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A reply together with the identifiers needed to correlate it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEnvelope<R> {
    pub worker: WorkerId,
    pub request: RequestId,
    pub message: R,
}

// ── Handler ────────────────────────────────────────────────────────

/// The logic running inside a worker unit.
///
/// `handle` returns `None` when a request needs no reply (a repeated `init`).
#[async_trait]
pub trait WorkerHandler: Send + 'static {
    type Request: WorkerRequest;
    type Reply: WorkerReply;

    async fn handle(&mut self, request: Self::Request) -> Option<Self::Reply>;
}

// ── Unit ───────────────────────────────────────────────────────────

/// One running worker generation.
struct WorkerUnit<Req> {
    id: WorkerId,
    requests: mpsc::Sender<(RequestId, Req)>,
    task: JoinHandle<()>,
}

impl<Req: WorkerRequest> WorkerUnit<Req> {
    fn spawn<H>(
        id: WorkerId,
        mut handler: H,
        replies: mpsc::Sender<WorkerEnvelope<H::Reply>>,
        capacity: usize,
    ) -> Self
    where
        H: WorkerHandler<Request = Req>,
    {
        let (requests, mut rx) = mpsc::channel::<(RequestId, Req)>(capacity.max(1));

        let task = tokio::spawn(async move {
            while let Some((request, message)) = rx.recv().await {
                let Some(reply) = handler.handle(message).await else {
                    continue;
                };
                let envelope = WorkerEnvelope {
                    worker: id,
                    request,
                    message: reply,
                };
                if replies.send(envelope).await.is_err() {
                    break;
                }
            }
            tracing::debug!(worker = %id, "Worker unit exiting");
        });

        Self { id, requests, task }
    }

    fn post(&self, request: RequestId, message: Req, label: &str) -> Result<(), VoiceError> {
        self.requests
            .try_send((request, message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    VoiceError::WorkerUnavailable(format!("{label} worker queue is full"))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    VoiceError::WorkerUnavailable(format!("{label} worker has exited"))
                }
            })
    }
}

impl<Req> Drop for WorkerUnit<Req> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Engine readiness as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No `init` sent to the current generation (or no generation yet).
    Uninitialized,
    /// `init` sent, `ready` not yet received.
    Initializing,
    /// `ready` received.
    Ready,
    /// The last `init` was answered with an error.
    Failed,
}

/// Outcome of offering a reply envelope to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    /// The engine finished loading.
    Ready,
    /// The engine failed to load.
    InitFailed(String),
    /// The reply to the outstanding request.
    Reply(T),
    /// From a terminated generation, or answering nothing we asked for.
    Stale,
}

impl<T> Delivery<T> {
    /// Transform the payload of a [`Delivery::Reply`].
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delivery<U> {
        match self {
            Self::Ready => Delivery::Ready,
            Self::InitFailed(e) => Delivery::InitFailed(e),
            Self::Reply(reply) => Delivery::Reply(f(reply)),
            Self::Stale => Delivery::Stale,
        }
    }
}

type HandlerFactory<H> = Box<dyn Fn() -> H + Send + Sync>;

/// Exclusive owner of one worker slot.
///
/// Spawns generations on demand, issues request ids, and enforces
/// single-flight: at most one non-`init` request is outstanding.
pub struct WorkerClient<H: WorkerHandler> {
    label: &'static str,
    factory: HandlerFactory<H>,
    capacity: usize,
    unit: Option<WorkerUnit<H::Request>>,
    readiness: Readiness,
    next_worker: u64,
    next_request: u64,
    init_request: Option<RequestId>,
    outstanding: Option<RequestId>,
    replies_tx: mpsc::Sender<WorkerEnvelope<H::Reply>>,
    replies_rx: mpsc::Receiver<WorkerEnvelope<H::Reply>>,
}

impl<H: WorkerHandler> WorkerClient<H> {
    /// Create a client. No unit is spawned until [`initialize`](Self::initialize).
    pub fn new(
        label: &'static str,
        capacity: usize,
        factory: impl Fn() -> H + Send + Sync + 'static,
    ) -> Self {
        let capacity = capacity.max(1);
        let (replies_tx, replies_rx) = mpsc::channel(capacity);
        Self {
            label,
            factory: Box::new(factory),
            capacity,
            unit: None,
            readiness: Readiness::Uninitialized,
            next_worker: 0,
            next_request: 0,
            init_request: None,
            outstanding: None,
            replies_tx,
            replies_rx,
        }
    }

    /// Human-readable worker label, used in errors and logs.
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Current readiness.
    pub const fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// Generation id of the live unit, if any.
    pub fn worker_id(&self) -> Option<WorkerId> {
        self.unit.as_ref().map(|u| u.id)
    }

    /// Whether a non-`init` request is awaiting its reply.
    pub const fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Whether a request may be submitted right now.
    pub const fn can_accept(&self) -> bool {
        matches!(self.readiness, Readiness::Ready | Readiness::Initializing) && !self.is_busy()
    }

    /// Spawn a unit if needed and send it `init`.
    ///
    /// A no-op while initializing or ready. After a failed `init` this
    /// retries on the same unit.
    pub fn initialize(&mut self) -> Result<(), VoiceError> {
        if matches!(self.readiness, Readiness::Ready | Readiness::Initializing) {
            return Ok(());
        }

        if self.unit.is_none() {
            self.next_worker += 1;
            let id = WorkerId(self.next_worker);
            let handler = (self.factory)();
            self.unit = Some(WorkerUnit::spawn(
                id,
                handler,
                self.replies_tx.clone(),
                self.capacity,
            ));
            tracing::debug!(worker = %id, label = self.label, "Spawned worker unit");
        }

        let request = self.post(H::Request::init())?;
        self.init_request = Some(request);
        self.readiness = Readiness::Initializing;
        Ok(())
    }

    /// Submit a request. Requires a prior [`initialize`](Self::initialize).
    pub fn submit(&mut self, message: H::Request) -> Result<RequestId, VoiceError> {
        if !matches!(self.readiness, Readiness::Ready | Readiness::Initializing) {
            return Err(VoiceError::WorkerInit(format!(
                "{} worker not initialized",
                self.label
            )));
        }
        if self.outstanding.is_some() {
            return Err(VoiceError::WorkerUnavailable(format!(
                "{} worker is busy",
                self.label
            )));
        }

        let request = self.post(message)?;
        self.outstanding = Some(request);
        Ok(request)
    }

    /// Correlate a reply envelope against the current generation.
    pub fn accept(&mut self, envelope: WorkerEnvelope<H::Reply>) -> Delivery<H::Reply> {
        let current = self.worker_id();
        if current != Some(envelope.worker) {
            tracing::debug!(
                label = self.label,
                from = %envelope.worker,
                current = ?current,
                "Discarding reply from terminated worker"
            );
            return Delivery::Stale;
        }

        if self.init_request == Some(envelope.request) {
            self.init_request = None;
            return match envelope.message.kind() {
                ReplyKind::Ready => {
                    self.readiness = Readiness::Ready;
                    tracing::debug!(label = self.label, worker = %envelope.worker, "Worker ready");
                    Delivery::Ready
                }
                ReplyKind::Error(error) => {
                    let error = error.to_string();
                    self.readiness = Readiness::Failed;
                    self.outstanding = None;
                    Delivery::InitFailed(error)
                }
                ReplyKind::Result => {
                    tracing::warn!(label = self.label, "Worker answered init with a result");
                    Delivery::Stale
                }
            };
        }

        if self.outstanding == Some(envelope.request) {
            self.outstanding = None;
            return Delivery::Reply(envelope.message);
        }

        tracing::debug!(
            label = self.label,
            request = %envelope.request,
            "Discarding uncorrelated worker reply"
        );
        Delivery::Stale
    }

    /// Wait for the next reply envelope from any generation.
    ///
    /// Cancel-safe: nothing is lost if the future is dropped.
    pub async fn next_reply(&mut self) -> Option<WorkerEnvelope<H::Reply>> {
        self.replies_rx.recv().await
    }

    /// Abort the live unit. Its queued replies become stale.
    pub fn terminate(&mut self) {
        if let Some(unit) = self.unit.take() {
            tracing::debug!(label = self.label, worker = %unit.id, "Terminating worker unit");
            // Dropping the unit aborts its task.
            drop(unit);
        }
        self.readiness = Readiness::Uninitialized;
        self.init_request = None;
        self.outstanding = None;
    }

    /// Initialize and wait for `ready`, driving replies inline.
    pub async fn wait_ready(&mut self) -> Result<(), VoiceError> {
        self.initialize()?;
        while self.readiness == Readiness::Initializing {
            let envelope = self.next_reply().await.ok_or_else(|| {
                VoiceError::WorkerUnavailable(format!("{} reply channel closed", self.label))
            })?;
            if let Delivery::InitFailed(error) = self.accept(envelope) {
                return Err(VoiceError::WorkerInit(error));
            }
        }
        Ok(())
    }

    /// Submit one request and wait for its reply, driving replies inline.
    pub async fn request(&mut self, message: H::Request) -> Result<H::Reply, VoiceError> {
        self.wait_ready().await?;
        self.submit(message)?;
        loop {
            let envelope = self.next_reply().await.ok_or_else(|| {
                VoiceError::WorkerUnavailable(format!("{} reply channel closed", self.label))
            })?;
            match self.accept(envelope) {
                Delivery::Reply(reply) => return Ok(reply),
                Delivery::InitFailed(error) => return Err(VoiceError::WorkerInit(error)),
                Delivery::Ready | Delivery::Stale => {}
            }
        }
    }

    fn post(&mut self, message: H::Request) -> Result<RequestId, VoiceError> {
        let unit = self.unit.as_ref().ok_or_else(|| {
            VoiceError::WorkerInit(format!("{} worker not initialized", self.label))
        })?;
        self.next_request += 1;
        let request = RequestId(self.next_request);
        unit.post(request, message, self.label)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{SttReply, SttRequest};

    /// Echoes the byte count back as text, after an optional delay.
    struct EchoHandler {
        ready: bool,
        delay: Duration,
        fail_init: bool,
    }

    #[async_trait]
    impl WorkerHandler for EchoHandler {
        type Request = SttRequest;
        type Reply = SttReply;

        async fn handle(&mut self, request: SttRequest) -> Option<SttReply> {
            match request {
                SttRequest::Init if self.ready => None,
                SttRequest::Init if self.fail_init => Some(SttReply::Error {
                    error: "model missing".to_string(),
                }),
                SttRequest::Init => {
                    self.ready = true;
                    Some(SttReply::Ready)
                }
                SttRequest::Transcribe { audio_buffer } => {
                    tokio::time::sleep(self.delay).await;
                    Some(SttReply::Result {
                        text: audio_buffer.len().to_string(),
                        duration: None,
                    })
                }
            }
        }
    }

    fn client(delay: Duration, fail_init: bool) -> WorkerClient<EchoHandler> {
        WorkerClient::new("Echo", 4, move || EchoHandler {
            ready: false,
            delay,
            fail_init,
        })
    }

    #[tokio::test]
    async fn submit_before_initialize_is_rejected() {
        let mut client = client(Duration::ZERO, false);
        let err = client
            .submit(SttRequest::Transcribe {
                audio_buffer: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, VoiceError::WorkerInit(msg) if msg.contains("not initialized")));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let mut client = client(Duration::ZERO, false);
        client.initialize().unwrap();
        client.initialize().unwrap();
        assert_eq!(client.readiness(), Readiness::Initializing);

        client.wait_ready().await.unwrap();
        assert_eq!(client.readiness(), Readiness::Ready);
        assert_eq!(client.worker_id(), Some(WorkerId(1)));

        client.initialize().unwrap();
        assert_eq!(client.readiness(), Readiness::Ready);
    }

    #[tokio::test]
    async fn single_flight_rejects_second_request() {
        let mut client = client(Duration::from_millis(10), false);
        client.wait_ready().await.unwrap();

        client
            .submit(SttRequest::Transcribe {
                audio_buffer: vec![0; 4],
            })
            .unwrap();
        let err = client
            .submit(SttRequest::Transcribe {
                audio_buffer: vec![0; 8],
            })
            .unwrap_err();
        assert!(matches!(err, VoiceError::WorkerUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_generation_replies_are_stale() {
        let mut client = client(Duration::ZERO, false);
        client.wait_ready().await.unwrap();
        let old = client.worker_id().unwrap();

        client.terminate();
        assert_eq!(client.readiness(), Readiness::Uninitialized);
        assert_eq!(client.worker_id(), None);

        client.initialize().unwrap();
        let fresh = client.worker_id().unwrap();
        assert_ne!(old, fresh);

        let stale = WorkerEnvelope {
            worker: old,
            request: RequestId(99),
            message: SttReply::Result {
                text: "late".to_string(),
                duration: None,
            },
        };
        assert_eq!(client.accept(stale), Delivery::Stale);
        assert_eq!(client.readiness(), Readiness::Initializing);
    }

    #[tokio::test]
    async fn failed_init_can_be_retried() {
        let mut client = client(Duration::ZERO, true);
        let err = client.wait_ready().await.unwrap_err();
        assert!(matches!(err, VoiceError::WorkerInit(msg) if msg == "model missing"));
        assert_eq!(client.readiness(), Readiness::Failed);

        // Same generation, new init request.
        client.initialize().unwrap();
        assert_eq!(client.readiness(), Readiness::Initializing);
        assert_eq!(client.worker_id(), Some(WorkerId(1)));
    }

    #[tokio::test]
    async fn request_round_trips_through_unit() {
        let mut client = client(Duration::ZERO, false);
        let reply = client
            .request(SttRequest::Transcribe {
                audio_buffer: vec![0; 12],
            })
            .await
            .unwrap();
        assert_eq!(
            reply,
            SttReply::Result {
                text: "12".to_string(),
                duration: None
            }
        );
        assert!(!client.is_busy());
    }

    #[test]
    fn delivery_map_only_touches_replies() {
        assert_eq!(Delivery::Reply(2).map(|n| n * 2), Delivery::Reply(4));
        assert_eq!(Delivery::<i32>::Stale.map(|n| n * 2), Delivery::Stale);
        assert_eq!(
            Delivery::<i32>::InitFailed("x".into()).map(|n| n * 2),
            Delivery::InitFailed("x".into())
        );
    }
}
