//! Investigation worker pool.
//!
//! Submissions go into a bounded queue and run on at most `max_concurrent`
//! tasks at once. Each submission returns an [`InvestigationTicket`] that
//! resolves to the final [`InvestigationResult`].

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use reid_core::defaults::{
    EVENT_BUS_CAPACITY, INVESTIGATION_MAX_CONCURRENT, INVESTIGATION_QUEUE_CAPACITY,
};
use reid_core::{Error, EventSink, InvestigationEvent, InvestigationStatus, Result};

use crate::orchestrator::{CancellationFlag, InvestigationRequest, InvestigationResult, Orchestrator};

/// Configuration for the investigation worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of investigations running at once.
    pub max_concurrent: usize,
    /// Submissions that may wait before `submit` reports the queue full.
    pub queue_capacity: usize,
    /// Whether to process investigations at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: INVESTIGATION_MAX_CONCURRENT,
            queue_capacity: INVESTIGATION_QUEUE_CAPACITY,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INVESTIGATION_WORKER_ENABLED` | `true` | Enable/disable processing |
    /// | `INVESTIGATION_MAX_CONCURRENT` | `4` | Max concurrent investigations |
    /// | `INVESTIGATION_QUEUE_CAPACITY` | `64` | Bounded submission queue |
    pub fn from_env() -> Self {
        let enabled = std::env::var("INVESTIGATION_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("INVESTIGATION_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(INVESTIGATION_MAX_CONCURRENT)
            .max(1);

        let queue_capacity = std::env::var("INVESTIGATION_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(INVESTIGATION_QUEUE_CAPACITY)
            .max(1);

        Self {
            max_concurrent,
            queue_capacity,
            enabled,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the investigation worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted,
    InvestigationStarted {
        investigation_id: Uuid,
    },
    InvestigationFinished {
        investigation_id: Uuid,
        status: InvestigationStatus,
        duration_ms: u64,
    },
    WorkerStopped,
}

/// A queued investigation.
struct Job {
    request: InvestigationRequest,
    cancel: CancellationFlag,
    reply: oneshot::Sender<InvestigationResult>,
}

/// Claim on a submitted investigation.
pub struct InvestigationTicket {
    id: Uuid,
    cancel: CancellationFlag,
    result_rx: oneshot::Receiver<InvestigationResult>,
}

impl InvestigationTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation; takes effect at the next phase boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the investigation to finish.
    pub async fn wait(self) -> Result<InvestigationResult> {
        self.result_rx.await.map_err(|_| {
            Error::Internal(format!("investigation {} was dropped by the worker", self.id))
        })
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    events: Arc<dyn EventSink>,
}

impl WorkerHandle {
    /// Queue an investigation.
    ///
    /// Fails with [`Error::QueueFull`] when the bounded queue is at capacity.
    pub fn submit(&self, request: InvestigationRequest) -> Result<InvestigationTicket> {
        let id = request.id;
        let cancel = CancellationFlag::new();
        let (reply, result_rx) = oneshot::channel();

        self.job_tx
            .try_send(Job {
                request,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull(format!(
                    "investigation queue holds {} submissions",
                    self.job_tx.max_capacity()
                )),
                mpsc::error::TrySendError::Closed(_) => {
                    Error::Internal("investigation worker is not running".into())
                }
            })?;

        self.events
            .emit(InvestigationEvent::InvestigationQueued { investigation_id: id });
        debug!(
            subsystem = "worker",
            component = "queue",
            op = "submit",
            investigation_id = %id,
            "Investigation queued"
        );
        Ok(InvestigationTicket {
            id,
            cancel,
            result_rx,
        })
    }

    /// Signal the worker to shut down gracefully.
    ///
    /// Running investigations finish; queued ones are cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Runs submitted investigations on a bounded pool of tasks.
pub struct InvestigationWorker {
    orchestrator: Arc<Orchestrator>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl InvestigationWorker {
    pub fn new(orchestrator: Arc<Orchestrator>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            orchestrator,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let (job_tx, mut job_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let event_rx = self.event_tx.subscribe();
        let events = self.orchestrator.events().clone();

        tokio::spawn(async move {
            self.run(&mut job_rx, &mut shutdown_rx).await;
        });

        WorkerHandle {
            job_tx,
            shutdown_tx,
            event_rx,
            events,
        }
    }

    #[instrument(skip_all)]
    async fn run(&self, job_rx: &mut mpsc::Receiver<Job>, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Investigation worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "worker",
            max_concurrent = self.config.max_concurrent,
            queue_capacity = self.config.queue_capacity,
            "Investigation worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Investigation task panicked");
                    }
                    continue;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                job = job_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let orchestrator = self.orchestrator.clone();
            let event_tx = self.event_tx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                execute(orchestrator, event_tx, job).await;
            });
        }

        info!(subsystem = "worker", "Investigation worker received shutdown signal");

        // Whatever is still queued finishes as cancelled so tickets resolve.
        job_rx.close();
        let mut drained = 0usize;
        while let Ok(job) = job_rx.try_recv() {
            job.cancel.cancel();
            drained += 1;
            let orchestrator = self.orchestrator.clone();
            let event_tx = self.event_tx.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                execute(orchestrator, event_tx, job).await;
            });
        }
        if drained > 0 {
            warn!(
                subsystem = "worker",
                cancelled = drained,
                "Cancelled queued investigations on shutdown"
            );
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Investigation task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "worker", "Investigation worker stopped");
    }
}

async fn execute(
    orchestrator: Arc<Orchestrator>,
    event_tx: broadcast::Sender<WorkerEvent>,
    job: Job,
) {
    let start = Instant::now();
    let investigation_id = job.request.id;
    let _ = event_tx.send(WorkerEvent::InvestigationStarted { investigation_id });

    let result = orchestrator.run(job.request, &job.cancel).await;

    let _ = event_tx.send(WorkerEvent::InvestigationFinished {
        investigation_id,
        status: result.status,
        duration_ms: start.elapsed().as_millis() as u64,
    });
    if job.reply.send(result).is_err() {
        debug!(
            subsystem = "worker",
            investigation_id = %investigation_id,
            "Ticket dropped before the result arrived"
        );
    }
}
