//! The deployment engine

use crate::error::{EngineError, Result};
use convoy_approval::{ApprovalGate, ApprovalNotifier, ApprovalStore, ApprovalSweeper};
use convoy_deployment::{create_strategy, RolloutContext, RolloutResult, SmokeCheck};
use convoy_lock::LockManager;
use convoy_metrics::MetricsProvider;
use convoy_pipeline::{BuildCapability, ExecutionBoard, Pipeline, TestCapability};
use convoy_registry::ClusterRegistry;
use convoy_signature::SignatureVerifier;
use convoy_tracker::{DeploymentTracker, Page, TrackerSweeper};
use convoy_types::{
    ArtifactDescriptor, ClusterStatus, ConvoyConfig, ConvoyEvent, ConvoyEventEnvelope,
    DeploymentRequest, Environment, ExecutionId, ExecutionStatus, PipelineExecution,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// A new deployment as submitted by the API collaborator.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub artifact: ArtifactDescriptor,
    pub environment: Environment,
    pub requester: String,
    pub approval_timeout_override: Option<Duration>,
}

/// What `get` returns: the terminal state when the execution finished, or
/// the accepted request plus the live pipeline snapshot while it runs.
#[derive(Debug, Clone)]
pub enum ExecutionView {
    InProgress {
        request: DeploymentRequest,
        pipeline: Option<PipelineExecution>,
    },
    Terminal(PipelineExecution),
}

/// Acknowledgement of a rollback request.
#[derive(Debug)]
pub enum RollbackAck {
    /// A running pipeline was signalled; it rolls back cooperatively and
    /// the terminal state lands in the tracker.
    Cancelling,
    /// A completed execution was rolled back directly.
    RolledBack(RolloutResult),
}

/// Injected capabilities the engine is wired with.
pub struct EngineCapabilities {
    pub registry: Arc<dyn ClusterRegistry>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub verifier: Arc<SignatureVerifier>,
    pub approval_store: Arc<dyn ApprovalStore>,
    pub notifier: Arc<dyn ApprovalNotifier>,
    pub locks: Arc<dyn LockManager>,
    pub smoke: Arc<dyn SmokeCheck>,
    pub build: Arc<dyn BuildCapability>,
    pub tests: Arc<dyn TestCapability>,
}

/// Public orchestration surface.
pub struct DeploymentEngine {
    config: ConvoyConfig,
    pipeline: Arc<Pipeline>,
    tracker: Arc<DeploymentTracker>,
    gate: Arc<ApprovalGate>,
    board: Arc<ExecutionBoard>,
    registry: Arc<dyn ClusterRegistry>,
    metrics: Arc<dyn MetricsProvider>,
    smoke: Arc<dyn SmokeCheck>,
    locks: Arc<dyn LockManager>,
    /// Intake; `None` once shutdown started.
    queue_tx: Mutex<Option<mpsc::Sender<DeploymentRequest>>>,
    /// Cancellation tokens for queued and running executions.
    live: DashMap<ExecutionId, CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
    sweeper_cancel: CancellationToken,
    event_tx: broadcast::Sender<ConvoyEventEnvelope>,
}

impl DeploymentEngine {
    /// Wire the subsystems together and start the worker pool and
    /// sweepers.
    pub fn start(config: ConvoyConfig, caps: EngineCapabilities) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(4096);

        let tracker = Arc::new(DeploymentTracker::new(&config.tracker, caps.locks.clone()));
        let gate = Arc::new(ApprovalGate::new(
            caps.approval_store,
            caps.locks.clone(),
            caps.notifier,
            config.approval.clone(),
            event_tx.clone(),
        ));
        let board = Arc::new(ExecutionBoard::new());
        let pipeline = Arc::new(Pipeline::new(
            caps.registry.clone(),
            caps.metrics.clone(),
            caps.verifier,
            gate.clone(),
            tracker.clone(),
            board.clone(),
            caps.smoke.clone(),
            caps.build,
            caps.tests,
            config.clone(),
            event_tx.clone(),
        ));

        let (queue_tx, queue_rx) = mpsc::channel(config.engine.queue_depth.max(1));
        let sweeper_cancel = CancellationToken::new();

        let engine = Arc::new(Self {
            config: config.clone(),
            pipeline,
            tracker: tracker.clone(),
            gate: gate.clone(),
            board,
            registry: caps.registry,
            metrics: caps.metrics,
            smoke: caps.smoke,
            locks: caps.locks,
            queue_tx: Mutex::new(Some(queue_tx)),
            live: DashMap::new(),
            workers: Mutex::new(Vec::new()),
            sweepers: Mutex::new(Vec::new()),
            sweeper_cancel: sweeper_cancel.clone(),
            event_tx,
        });

        // Worker pool: a fixed set of tasks owns pipeline execution. The
        // request handler only enqueues.
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        {
            let mut workers = engine
                .workers
                .try_lock()
                .expect("engine not yet shared");
            for worker_index in 0..config.engine.workers.max(1) {
                let engine = engine.clone();
                let queue_rx = queue_rx.clone();
                workers.push(tokio::spawn(async move {
                    engine.worker_loop(worker_index, queue_rx).await;
                }));
            }

            let mut sweepers = engine
                .sweepers
                .try_lock()
                .expect("engine not yet shared");
            sweepers.push(ApprovalSweeper::new(gate).spawn(sweeper_cancel.child_token()));
            sweepers.push(
                TrackerSweeper::new(tracker, config.tracker.sweep_interval())
                    .spawn(sweeper_cancel.child_token()),
            );
        }

        info!(
            workers = config.engine.workers.max(1),
            queue_depth = config.engine.queue_depth,
            "deployment engine started"
        );
        engine
    }

    /// Validate and accept a submission. Returns immediately with the
    /// execution id; the pipeline runs on the worker pool.
    #[instrument(skip(self, submission), fields(environment = %submission.environment))]
    pub async fn submit(&self, submission: NewDeployment) -> Result<ExecutionId> {
        let mut request = DeploymentRequest::new(
            submission.artifact,
            submission.environment,
            submission.requester,
        )?;
        if let Some(timeout) = submission.approval_timeout_override {
            request = request.with_approval_timeout(timeout);
        }
        let execution_id = request.execution_id.clone();

        self.tracker.track_in_progress(request.clone());
        // The token exists from acceptance so a rollback can cancel an
        // execution that is still queued.
        self.live
            .insert(execution_id.clone(), CancellationToken::new());

        let queue = self.queue_tx.lock().await;
        let Some(tx) = queue.as_ref() else {
            self.tracker.remove_in_progress(&execution_id);
            self.live.remove(&execution_id);
            return Err(EngineError::ShuttingDown);
        };
        match tx.try_send(request) {
            Ok(()) => {
                self.emit(ConvoyEvent::SubmissionAccepted {
                    execution_id: execution_id.clone(),
                    environment: submission.environment,
                });
                info!(execution_id = %execution_id, "submission accepted");
                Ok(execution_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.tracker.remove_in_progress(&execution_id);
                self.live.remove(&execution_id);
                warn!("submission rejected: queue full");
                Err(EngineError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.tracker.remove_in_progress(&execution_id);
                self.live.remove(&execution_id);
                Err(EngineError::ShuttingDown)
            }
        }
    }

    /// Read one execution: terminal result if finished, otherwise the
    /// accepted request with the live pipeline snapshot.
    pub fn get(&self, execution_id: &ExecutionId) -> Option<ExecutionView> {
        if let Some(state) = self.tracker.get_result(execution_id) {
            return Some(ExecutionView::Terminal(state));
        }
        self.tracker
            .get_in_progress(execution_id)
            .map(|request| ExecutionView::InProgress {
                pipeline: self.board.get(execution_id),
                request,
            })
    }

    /// Cancel a running execution, or administratively roll back a
    /// Succeeded one. Role enforcement (administrator) happens at the API
    /// boundary.
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn rollback(&self, execution_id: &ExecutionId) -> Result<RollbackAck> {
        if let Some(token) = self.live.get(execution_id) {
            token.cancel();
            info!(execution_id = %execution_id, "cancellation signalled");
            return Ok(RollbackAck::Cancelling);
        }

        match self.tracker.get_result(execution_id) {
            Some(result) => match result.status {
                ExecutionStatus::Succeeded => {
                    self.emit(ConvoyEvent::RollbackStarted {
                        execution_id: execution_id.clone(),
                        environment: result.environment,
                    });
                    // Restoring the previously-approved state needs no
                    // fresh approval; the administrator role at the call
                    // site is the control.
                    let ctx = RolloutContext::create_for_rollback(
                        self.registry.clone(),
                        self.metrics.clone(),
                        self.smoke.clone(),
                        result.environment,
                        result.artifact.clone(),
                        self.config.clone(),
                    )
                    .await?;
                    let strategy = create_strategy(result.environment.strategy_kind());
                    let rollback = strategy
                        .rollback(&ctx, &CancellationToken::new())
                        .await?;
                    info!(
                        execution_id = %execution_id,
                        status = ?rollback.status,
                        "administrative rollback finished"
                    );
                    Ok(RollbackAck::RolledBack(rollback))
                }
                ExecutionStatus::RolledBack => {
                    Err(EngineError::AlreadyRolledBack(execution_id.clone()))
                }
                status => Err(EngineError::NotRollbackable {
                    execution_id: execution_id.clone(),
                    status,
                }),
            },
            None => {
                if self.tracker.get_in_progress(execution_id).is_some() {
                    Err(EngineError::NotRunning(execution_id.clone()))
                } else {
                    Err(EngineError::NotFound(execution_id.clone()))
                }
            }
        }
    }

    /// Page over terminal results, optionally filtered by status.
    pub fn list(
        &self,
        filter: Option<ExecutionStatus>,
        offset: usize,
        limit: usize,
    ) -> Page<PipelineExecution> {
        let all = self.tracker.list_results(0, usize::MAX).items;
        let filtered: Vec<PipelineExecution> = all
            .into_iter()
            .filter(|e| filter.map(|f| e.status == f).unwrap_or(true))
            .collect();
        let items: Vec<PipelineExecution> =
            filtered.iter().skip(offset).take(limit).cloned().collect();
        let next_offset = if offset + items.len() < filtered.len() {
            Some(offset + items.len())
        } else {
            None
        };
        Page { items, next_offset }
    }

    pub fn list_in_progress(&self) -> Vec<DeploymentRequest> {
        self.tracker.list_in_progress()
    }

    /// Aggregate cluster health for the API's cluster-status read.
    pub async fn cluster_status(&self, environment: Environment) -> Result<ClusterStatus> {
        Ok(self
            .registry
            .cluster_status(environment)
            .await
            .map_err(convoy_deployment::DeploymentError::Registry)?)
    }

    /// The approval gate, for the API's approve/reject endpoints.
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConvoyEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Stop intake, drain queued work, then stop the sweepers.
    pub async fn shutdown(&self) {
        info!("engine shutdown: closing intake");
        {
            let mut queue = self.queue_tx.lock().await;
            *queue = None;
        }
        let workers: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().await;
            workers.drain(..).collect()
        };
        for handle in workers {
            let _ = handle.await;
        }

        self.sweeper_cancel.cancel();
        let sweepers: Vec<JoinHandle<()>> = {
            let mut sweepers = self.sweepers.lock().await;
            sweepers.drain(..).collect()
        };
        for handle in sweepers {
            let _ = handle.await;
        }
        info!("engine shutdown complete");
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_index: usize,
        queue_rx: Arc<Mutex<mpsc::Receiver<DeploymentRequest>>>,
    ) {
        loop {
            // Hold the receiver lock only to take the next item.
            let request = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };
            let Some(request) = request else {
                info!(worker = worker_index, "worker draining complete");
                return;
            };

            let execution_id = request.execution_id.clone();
            let cancel = self
                .live
                .get(&execution_id)
                .map(|t| t.clone())
                .unwrap_or_default();

            // Serialize deployments into the same cluster; distinct
            // clusters proceed in parallel. The TTL outlives the longest
            // legal deploy so only a crashed holder is ever reclaimed.
            let lock_name = format!("cluster:{}", request.environment);
            let lock_ttl = self.config.stage_timeouts.deploy() + Duration::from_secs(60);
            let guard = loop {
                if cancel.is_cancelled() {
                    break None;
                }
                match self
                    .locks
                    .acquire(
                        &lock_name,
                        lock_ttl,
                        self.config.engine.lock_wait_timeout(),
                    )
                    .await
                {
                    Ok(guard) => break Some(guard),
                    // Another execution holds the cluster; keep waiting.
                    Err(_) => continue,
                }
            };

            let execution = self.pipeline.run(&request, &cancel).await;
            info!(
                worker = worker_index,
                execution_id = %execution_id,
                status = %execution.status,
                "execution finished"
            );

            if let Some(guard) = guard {
                guard.release();
            }
            self.live.remove(&execution_id);
        }
    }

    fn emit(&self, event: ConvoyEvent) {
        let _ = self.event_tx.send(ConvoyEventEnvelope::new(event, None));
    }
}
