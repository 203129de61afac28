//! The pipeline state machine

use crate::board::ExecutionBoard;
use crate::capabilities::{BuildCapability, TestCapability};
use chrono::Utc;
use convoy_approval::{ApprovalError, ApprovalGate};
use convoy_deployment::{
    create_strategy, RolloutContext, RolloutResult, RolloutStatus, SmokeCheck,
};
use convoy_metrics::MetricsProvider;
use convoy_registry::ClusterRegistry;
use convoy_signature::{SignatureVerifier, Verification};
use convoy_tracker::DeploymentTracker;
use convoy_types::{
    ApprovalStatus, ClusterHealth, ConvoyConfig, ConvoyEvent, ConvoyEventEnvelope,
    DeploymentRequest, ExecutionStatus, PipelineExecution, PipelineStage, StageStatus,
    StrategyKind, TraceId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

const CLOSE_OUT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Runs one execution through the staged state machine.
///
/// The pipeline owns the execution state while it runs; the tracker takes
/// ownership of the terminal state at close-out. Every stage runs under
/// the execution's cancellation token.
pub struct Pipeline {
    registry: Arc<dyn ClusterRegistry>,
    metrics: Arc<dyn MetricsProvider>,
    verifier: Arc<SignatureVerifier>,
    gate: Arc<ApprovalGate>,
    tracker: Arc<DeploymentTracker>,
    board: Arc<ExecutionBoard>,
    smoke: Arc<dyn SmokeCheck>,
    build: Arc<dyn BuildCapability>,
    tests: Arc<dyn TestCapability>,
    config: ConvoyConfig,
    event_tx: broadcast::Sender<ConvoyEventEnvelope>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        metrics: Arc<dyn MetricsProvider>,
        verifier: Arc<SignatureVerifier>,
        gate: Arc<ApprovalGate>,
        tracker: Arc<DeploymentTracker>,
        board: Arc<ExecutionBoard>,
        smoke: Arc<dyn SmokeCheck>,
        build: Arc<dyn BuildCapability>,
        tests: Arc<dyn TestCapability>,
        config: ConvoyConfig,
        event_tx: broadcast::Sender<ConvoyEventEnvelope>,
    ) -> Self {
        Self {
            registry,
            metrics,
            verifier,
            gate,
            tracker,
            board,
            smoke,
            build,
            tests,
            config,
            event_tx,
        }
    }

    /// Run the request to a terminal state. Always closes the execution
    /// out through the tracker, whatever happens.
    #[instrument(skip(self, request, cancel), fields(execution_id = %request.execution_id, environment = %request.environment))]
    pub async fn run(
        &self,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> PipelineExecution {
        let mut exec = PipelineExecution::new(
            request.execution_id.clone(),
            TraceId::generate(),
            request.environment,
            request.artifact.artifact_ref(),
        );
        self.board.post(&exec);

        // --- Stage 1: Build ------------------------------------------------
        self.start_stage(&mut exec, PipelineStage::Build);
        let built = flatten_stage(
            tokio::time::timeout(
                self.config.stage_timeouts.build(),
                self.build.build(&request.artifact, cancel),
            )
            .await,
        );
        match built {
            Ok(message) => {
                self.end_stage(&mut exec, PipelineStage::Build, StageStatus::Succeeded, Some(message))
            }
            Err(reason) => {
                return self
                    .fail_from(exec, PipelineStage::Build, reason)
                    .await;
            }
        }
        if cancel.is_cancelled() {
            return self
                .cancelled_before_deploy(exec, PipelineStage::Build)
                .await;
        }

        // --- Stage 2: Test -------------------------------------------------
        self.start_stage(&mut exec, PipelineStage::Test);
        let tested = flatten_stage(
            tokio::time::timeout(
                self.config.stage_timeouts.test(),
                self.tests.run_tests(&request.artifact, cancel),
            )
            .await,
        );
        match tested {
            Ok(message) => {
                self.end_stage(&mut exec, PipelineStage::Test, StageStatus::Succeeded, Some(message))
            }
            Err(reason) => {
                return self.fail_from(exec, PipelineStage::Test, reason).await;
            }
        }
        if cancel.is_cancelled() {
            return self
                .cancelled_before_deploy(exec, PipelineStage::Test)
                .await;
        }

        // --- Stage 3: SecurityScan -----------------------------------------
        self.start_stage(&mut exec, PipelineStage::SecurityScan);
        let strict =
            self.config.security.strict || request.environment.forces_strict_security();
        match self.verifier.verify(
            request.artifact.content(),
            request.artifact.signature(),
            Utc::now(),
        ) {
            Verification::Valid {
                signer_subject,
                algorithm,
                content_sha256,
            } => {
                let message =
                    format!("signed by {signer_subject} ({algorithm}), sha256 {content_sha256}");
                self.end_stage(
                    &mut exec,
                    PipelineStage::SecurityScan,
                    StageStatus::Succeeded,
                    Some(message),
                );
            }
            Verification::Invalid { reason, .. } if strict => {
                return self
                    .fail_from(
                        exec,
                        PipelineStage::SecurityScan,
                        format!("signature invalid: {reason}"),
                    )
                    .await;
            }
            Verification::Invalid { reason, .. } => {
                warn!(reason = %reason, "signature invalid, continuing in permissive mode");
                self.end_stage(
                    &mut exec,
                    PipelineStage::SecurityScan,
                    StageStatus::Succeeded,
                    Some(format!("signature invalid, permissive mode: {reason}")),
                );
            }
        }
        if cancel.is_cancelled() {
            return self
                .cancelled_before_deploy(exec, PipelineStage::SecurityScan)
                .await;
        }

        // --- Approval gate (Staging, Production) ---------------------------
        if request.environment.requires_approval() {
            match self.await_approval(request, cancel).await {
                ApprovalOutcome::Approved => {}
                ApprovalOutcome::Denied(reason) => {
                    self.end_stage(
                        &mut exec,
                        PipelineStage::Deploy,
                        StageStatus::Skipped,
                        Some(reason.clone()),
                    );
                    exec.skip_remaining_after(
                        PipelineStage::Deploy,
                        Some("deploy was not approved".to_string()),
                    );
                    return self.close_out(exec, ExecutionStatus::Failed, Some(reason)).await;
                }
                ApprovalOutcome::Cancelled => {
                    self.end_stage(
                        &mut exec,
                        PipelineStage::Deploy,
                        StageStatus::Skipped,
                        Some("cancelled while awaiting approval".to_string()),
                    );
                    exec.skip_remaining_after(PipelineStage::Deploy, None);
                    return self
                        .close_out(
                            exec,
                            ExecutionStatus::RolledBack,
                            Some("execution cancelled before deploy".to_string()),
                        )
                        .await;
                }
                ApprovalOutcome::Error(reason) => {
                    return self.fail_from(exec, PipelineStage::Deploy, reason).await;
                }
            }
        }

        // --- Stage 4: Deploy -----------------------------------------------
        self.start_stage(&mut exec, PipelineStage::Deploy);
        let ctx = match RolloutContext::create(
            self.registry.clone(),
            self.metrics.clone(),
            self.smoke.clone(),
            request.environment,
            request.artifact.clone(),
            self.config.clone(),
        )
        .await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                // Nothing was touched yet; plain stage failure.
                return self
                    .fail_from(exec, PipelineStage::Deploy, format!("cluster read failed: {e}"))
                    .await;
            }
        };
        let strategy = create_strategy(request.environment.strategy_kind());

        let deploy_outcome = tokio::time::timeout(
            self.config.stage_timeouts.deploy(),
            strategy.deploy(&ctx, cancel),
        )
        .await;

        match deploy_outcome {
            Ok(Ok(result)) => match result.status {
                RolloutStatus::Succeeded => {
                    let message = result
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("{} nodes updated", result.node_outcomes.len()));
                    self.end_stage(
                        &mut exec,
                        PipelineStage::Deploy,
                        StageStatus::Succeeded,
                        Some(message),
                    );
                }
                RolloutStatus::RolledBack => {
                    let message = result
                        .message
                        .clone()
                        .unwrap_or_else(|| "deploy rolled back".to_string());
                    self.end_stage(
                        &mut exec,
                        PipelineStage::Deploy,
                        StageStatus::RolledBack,
                        Some(message.clone()),
                    );
                    exec.skip_remaining_after(PipelineStage::Deploy, None);
                    return self
                        .close_out(exec, ExecutionStatus::RolledBack, Some(message))
                        .await;
                }
                RolloutStatus::Failed => {
                    return self.deploy_inconsistent(exec, result).await;
                }
            },
            Ok(Err(e)) => {
                return self
                    .deploy_backstop(exec, &ctx, strategy.as_ref(), format!("deploy errored: {e}"))
                    .await;
            }
            Err(_) => {
                return self
                    .deploy_backstop(
                        exec,
                        &ctx,
                        strategy.as_ref(),
                        "deploy stage timed out".to_string(),
                    )
                    .await;
            }
        }

        if cancel.is_cancelled() {
            // Deploy finished but the caller asked for rollback before
            // validation; revert through the strategy.
            return self
                .deploy_backstop(
                    exec,
                    &ctx,
                    strategy.as_ref(),
                    "execution cancelled after deploy".to_string(),
                )
                .await;
        }

        // --- Stage 5: Validate ---------------------------------------------
        self.start_stage(&mut exec, PipelineStage::Validate);
        let validated = flatten_stage(
            tokio::time::timeout(
                self.config.stage_timeouts.validate(),
                self.validate(request),
            )
            .await,
        );
        match validated {
            Ok(message) => {
                self.end_stage(
                    &mut exec,
                    PipelineStage::Validate,
                    StageStatus::Succeeded,
                    Some(message),
                );
                info!(execution_id = %exec.execution_id, "pipeline succeeded");
                self.close_out(
                    exec,
                    ExecutionStatus::Succeeded,
                    Some("deployment completed".to_string()),
                )
                .await
            }
            Err(reason) => {
                self.end_stage(
                    &mut exec,
                    PipelineStage::Validate,
                    StageStatus::Failed,
                    Some(reason.clone()),
                );
                self.close_out(exec, ExecutionStatus::Failed, Some(reason)).await
            }
        }
    }

    // --- Stage helpers ----------------------------------------------------

    fn start_stage(&self, exec: &mut PipelineExecution, stage: PipelineStage) {
        exec.mark_stage_running(stage);
        self.board.post(exec);
        self.emit(
            ConvoyEvent::StageStarted {
                execution_id: exec.execution_id.clone(),
                stage,
            },
            exec,
        );
    }

    fn end_stage(
        &self,
        exec: &mut PipelineExecution,
        stage: PipelineStage,
        status: StageStatus,
        message: Option<String>,
    ) {
        exec.finish_stage(stage, status, message);
        self.board.post(exec);
        self.emit(
            ConvoyEvent::StageFinished {
                execution_id: exec.execution_id.clone(),
                stage,
                status,
            },
            exec,
        );
    }

    /// A stage failed with no deployment side effects: mark it, skip the
    /// rest, close out Failed.
    async fn fail_from(
        &self,
        mut exec: PipelineExecution,
        stage: PipelineStage,
        reason: String,
    ) -> PipelineExecution {
        warn!(execution_id = %exec.execution_id, stage = %stage, reason = %reason, "stage failed");
        self.end_stage(&mut exec, stage, StageStatus::Failed, Some(reason.clone()));
        exec.skip_remaining_after(stage, Some(format!("{stage} stage failed")));
        self.close_out(exec, ExecutionStatus::Failed, Some(reason)).await
    }

    /// Cancelled before any node was touched: nothing to revert.
    async fn cancelled_before_deploy(
        &self,
        mut exec: PipelineExecution,
        after: PipelineStage,
    ) -> PipelineExecution {
        exec.skip_remaining_after(after, Some("execution cancelled".to_string()));
        self.close_out(
            exec,
            ExecutionStatus::RolledBack,
            Some("execution cancelled before deploy".to_string()),
        )
        .await
    }

    /// Deploy returned Failed: rollback already ran inside the strategy
    /// and did not fully restore the cluster.
    async fn deploy_inconsistent(
        &self,
        mut exec: PipelineExecution,
        result: RolloutResult,
    ) -> PipelineExecution {
        let message = result
            .message
            .clone()
            .unwrap_or_else(|| "deploy failed".to_string());
        for node_id in &result.inconsistent {
            self.emit(
                ConvoyEvent::NodeInconsistent {
                    node_id: node_id.clone(),
                    environment: exec.environment,
                },
                &exec,
            );
        }
        exec.inconsistent_nodes = result.inconsistent;
        self.end_stage(
            &mut exec,
            PipelineStage::Deploy,
            StageStatus::Failed,
            Some(message.clone()),
        );
        exec.skip_remaining_after(PipelineStage::Deploy, None);
        self.close_out(exec, ExecutionStatus::Failed, Some(message)).await
    }

    /// Deploy errored or timed out without reporting; run the strategy's
    /// rollback as a backstop and fold its outcome in.
    async fn deploy_backstop(
        &self,
        mut exec: PipelineExecution,
        ctx: &RolloutContext,
        strategy: &dyn convoy_deployment::RolloutStrategy,
        reason: String,
    ) -> PipelineExecution {
        warn!(execution_id = %exec.execution_id, reason = %reason, "deploy aborted, rolling back");
        self.emit(
            ConvoyEvent::RollbackStarted {
                execution_id: exec.execution_id.clone(),
                environment: exec.environment,
            },
            &exec,
        );

        let rollback = strategy.rollback(ctx, &CancellationToken::new()).await;
        match rollback {
            Ok(result) if result.status == RolloutStatus::RolledBack => {
                self.end_stage(
                    &mut exec,
                    PipelineStage::Deploy,
                    StageStatus::RolledBack,
                    Some(reason.clone()),
                );
                exec.skip_remaining_after(PipelineStage::Deploy, None);
                self.close_out(exec, ExecutionStatus::RolledBack, Some(reason)).await
            }
            Ok(result) => {
                for node_id in &result.inconsistent {
                    self.emit(
                        ConvoyEvent::NodeInconsistent {
                            node_id: node_id.clone(),
                            environment: exec.environment,
                        },
                        &exec,
                    );
                }
                exec.inconsistent_nodes = result.inconsistent;
                let message = format!("{reason}; rollback incomplete");
                self.end_stage(
                    &mut exec,
                    PipelineStage::Deploy,
                    StageStatus::Failed,
                    Some(message.clone()),
                );
                exec.skip_remaining_after(PipelineStage::Deploy, None);
                self.close_out(exec, ExecutionStatus::Failed, Some(message)).await
            }
            Err(e) => {
                let message = format!("{reason}; rollback errored: {e}");
                self.end_stage(
                    &mut exec,
                    PipelineStage::Deploy,
                    StageStatus::Failed,
                    Some(message.clone()),
                );
                exec.skip_remaining_after(PipelineStage::Deploy, None);
                self.close_out(exec, ExecutionStatus::Failed, Some(message)).await
            }
        }
    }

    async fn await_approval(
        &self,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> ApprovalOutcome {
        let created = self
            .gate
            .request_approval(
                request.execution_id.clone(),
                &request.requester,
                request.environment,
                request.artifact.artifact_ref(),
                request.approval_timeout_override(),
            )
            .await;
        if let Err(e) = created {
            return ApprovalOutcome::Error(format!("approval request failed: {e}"));
        }

        match self.gate.await_decision(&request.execution_id, cancel).await {
            Ok(ApprovalStatus::Approved) => ApprovalOutcome::Approved,
            Ok(ApprovalStatus::Rejected) => {
                let reason = self
                    .approval_reason(request)
                    .await
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default();
                ApprovalOutcome::Denied(format!("approval rejected{reason}"))
            }
            Ok(ApprovalStatus::Expired) => {
                ApprovalOutcome::Denied("approval expired without a decision".to_string())
            }
            Ok(ApprovalStatus::Pending) => {
                ApprovalOutcome::Error("approval wait returned while still pending".to_string())
            }
            Err(ApprovalError::Cancelled) => ApprovalOutcome::Cancelled,
            Err(e) => ApprovalOutcome::Error(format!("approval wait failed: {e}")),
        }
    }

    async fn approval_reason(&self, request: &DeploymentRequest) -> Option<String> {
        self.gate
            .get(request.execution_id.clone())
            .await
            .ok()
            .flatten()
            .and_then(|approval| approval.reason)
    }

    /// Post-deploy assertion: the cluster is not Unhealthy and every
    /// serving node reports the requested artifact version.
    async fn validate(&self, request: &DeploymentRequest) -> Result<String, String> {
        let environment = request.environment;
        let status = self
            .registry
            .cluster_status(environment)
            .await
            .map_err(|e| format!("cluster status read failed: {e}"))?;
        if status.health == ClusterHealth::Unhealthy {
            return Err(format!(
                "cluster unhealthy after deploy: {}/{} nodes not healthy",
                status.degraded_nodes + status.unhealthy_nodes,
                status.total_nodes
            ));
        }

        let nodes = self
            .registry
            .list_nodes(environment)
            .await
            .map_err(|e| format!("cluster read failed: {e}"))?;
        let expected = request.artifact.artifact_ref();

        // Blue-Green promotes only the serving pool; other strategies
        // cover the whole cluster.
        let serving = if environment.strategy_kind() == StrategyKind::BlueGreen {
            Some(
                self.registry
                    .traffic_pointer(environment)
                    .await
                    .map_err(|e| format!("traffic pointer read failed: {e}"))?,
            )
        } else {
            None
        };

        let mut checked = 0usize;
        for node in &nodes {
            if let Some(pool) = serving {
                if node.pool != pool {
                    continue;
                }
            }
            if node.current_artifact.as_ref() != Some(&expected) {
                return Err(format!(
                    "node {} reports {} instead of {}",
                    node.id,
                    node.current_artifact
                        .as_ref()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "no artifact".to_string()),
                    expected
                ));
            }
            checked += 1;
        }
        Ok(format!("{checked} nodes report {expected}"))
    }

    /// Terminal bookkeeping: finish the execution, drop the live entry and
    /// run the tracker's atomic close-out (one retry on lock contention).
    async fn close_out(
        &self,
        mut exec: PipelineExecution,
        status: ExecutionStatus,
        message: Option<String>,
    ) -> PipelineExecution {
        exec.finish(status, message);
        self.board.remove(&exec.execution_id);
        self.emit(
            ConvoyEvent::ExecutionClosed {
                execution_id: exec.execution_id.clone(),
                status,
            },
            &exec,
        );

        let mut attempts = 0;
        loop {
            match self
                .tracker
                .store_result_and_clear_in_progress(exec.clone())
                .await
            {
                Ok(()) => break,
                Err(e) if attempts == 0 => {
                    attempts += 1;
                    warn!(execution_id = %exec.execution_id, error = %e, "close-out contended, retrying");
                    tokio::time::sleep(CLOSE_OUT_RETRY_BACKOFF).await;
                }
                Err(e) => {
                    error!(execution_id = %exec.execution_id, error = %e, "close-out failed");
                    break;
                }
            }
        }
        exec
    }

    fn emit(&self, event: ConvoyEvent, exec: &PipelineExecution) {
        let _ = self
            .event_tx
            .send(ConvoyEventEnvelope::new(event, Some(exec.trace_id.clone())));
    }
}

enum ApprovalOutcome {
    Approved,
    Denied(String),
    Cancelled,
    Error(String),
}

/// Collapse a stage timeout into the stage's own failure channel.
fn flatten_stage(
    outcome: Result<Result<String, String>, tokio::time::error::Elapsed>,
) -> Result<String, String> {
    match outcome {
        Ok(result) => result,
        Err(_) => Err("stage timed out".to_string()),
    }
}
