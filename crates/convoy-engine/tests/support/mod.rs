//! Shared harness for engine scenarios

use async_trait::async_trait;
use convoy_approval::{InMemoryApprovalStore, NoopNotifier};
use convoy_deployment::AlwaysPassSmoke;
use convoy_engine::{DeploymentEngine, EngineCapabilities, ExecutionView};
use convoy_lock::InMemoryLockManager;
use convoy_metrics::{CachingMetricsProvider, CounterSource, MetricsError};
use convoy_pipeline::{NoopTests, PrebuiltArtifacts};
use convoy_registry::{ClusterRegistry, InMemoryClusterRegistry, SimulatedApply};
use convoy_signature::{SignatureVerifier, VerificationMode};
use convoy_types::{
    ArtifactDescriptor, ArtifactRef, ConvoyConfig, Environment, ExecutionId, HealthCounters,
    Node, NodeId, PipelineExecution, PipelineStage, TrafficPool,
};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509NameBuilder, X509};
use semver::Version;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SLOW_APPLY: Duration = Duration::from_millis(150);

const TERMINAL_WAIT: Duration = Duration::from_secs(30);
const POLL: Duration = Duration::from_millis(10);

#[derive(Clone)]
struct DegradeRule {
    environment: Environment,
    target: ArtifactRef,
    threshold: usize,
}

/// Counter source whose behavior tests can switch at runtime: steady by
/// default, degraded latency once enough nodes run a target artifact.
pub struct SwitchableCounters {
    registry: Arc<InMemoryClusterRegistry>,
    rule: Mutex<Option<DegradeRule>>,
}

#[async_trait]
impl CounterSource for SwitchableCounters {
    async fn read_counters(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<HealthCounters>, MetricsError> {
        let rule = self.rule.lock().expect("counters lock").clone();
        let mut latency = 50.0;

        if let Some(rule) = rule {
            let nodes = self
                .registry
                .list_nodes(rule.environment)
                .await
                .map_err(|e| MetricsError::SourceUnavailable(e.to_string()))?;
            let updated = nodes
                .iter()
                .filter(|n| n.current_artifact.as_ref() == Some(&rule.target))
                .count();
            let on_target = nodes
                .iter()
                .find(|n| &n.id == node_id)
                .map(|n| n.current_artifact.as_ref() == Some(&rule.target))
                .unwrap_or(false);
            if on_target && updated >= rule.threshold {
                latency = 115.0;
            }
        }

        Ok(Some(HealthCounters {
            cpu_percent: 30.0,
            memory_percent: 40.0,
            latency_ms: latency,
            error_rate: 0.01,
        }))
    }
}

pub struct EngineHarness {
    pub engine: Arc<DeploymentEngine>,
    pub registry: Arc<InMemoryClusterRegistry>,
    counters: Arc<SwitchableCounters>,
    signer_cert: X509,
    signer_key: PKey<Private>,
    ca_cert: X509,
}

impl EngineHarness {
    pub async fn new() -> Self {
        Self::build(Duration::from_millis(5), fast_config()).await
    }

    pub async fn with_apply_latency(latency: Duration) -> Self {
        Self::build(latency, fast_config()).await
    }

    /// Tiny queue, one worker, slow applies: submissions pile up.
    pub async fn backpressure_prone() -> Self {
        let mut config = fast_config();
        config.engine.queue_depth = 1;
        config.engine.workers = 1;
        Self::build(Duration::from_millis(300), config).await
    }

    async fn build(apply_latency: Duration, config: ConvoyConfig) -> Self {
        let (ca_cert, ca_key) = make_ca();
        let (signer_cert, signer_key) = make_leaf(&ca_cert, &ca_key);

        let registry = Arc::new(InMemoryClusterRegistry::with_behavior(
            config.heartbeat.clone(),
            config.node_health.clone(),
            Arc::new(SimulatedApply::new(apply_latency)),
        ));
        let counters = Arc::new(SwitchableCounters {
            registry: registry.clone(),
            rule: Mutex::new(None),
        });
        let metrics = Arc::new(CachingMetricsProvider::new(
            counters.clone(),
            config.metrics.clone(),
        ));
        let verifier = Arc::new(
            SignatureVerifier::from_certs(vec![ca_cert.clone()], VerificationMode::Strict)
                .expect("trust store"),
        );

        let engine = DeploymentEngine::start(
            config,
            EngineCapabilities {
                registry: registry.clone(),
                metrics,
                verifier,
                approval_store: Arc::new(InMemoryApprovalStore::new()),
                notifier: Arc::new(NoopNotifier),
                locks: Arc::new(InMemoryLockManager::new()),
                smoke: Arc::new(AlwaysPassSmoke),
                build: Arc::new(PrebuiltArtifacts),
                tests: Arc::new(NoopTests),
            },
        );

        Self {
            engine,
            registry,
            counters,
            signer_cert,
            signer_key,
            ca_cert,
        }
    }

    pub fn base_ref(&self) -> ArtifactRef {
        ArtifactRef {
            name: "payments".to_string(),
            version: Version::new(0, 9, 0),
        }
    }

    pub fn new_ref(&self, name: &str, major: u64) -> ArtifactRef {
        ArtifactRef {
            name: name.to_string(),
            version: Version::new(major, 0, 0),
        }
    }

    /// Artifact whose detached PKCS#7 signature verifies against the
    /// harness trust store.
    pub fn signed_artifact(&self, name: &str, version: Version) -> ArtifactDescriptor {
        let content = format!("{name}-{version}-binary").into_bytes();
        let signature = self.sign(&content);
        ArtifactDescriptor::new(name, version, content, signature, BTreeMap::new())
            .expect("valid artifact")
    }

    /// Artifact whose signature covers different bytes than its content.
    pub fn tampered_artifact(&self, name: &str, version: Version) -> ArtifactDescriptor {
        let signature = self.sign(b"bytes-that-were-signed");
        ArtifactDescriptor::new(
            name,
            version,
            b"bytes-that-were-shipped".to_vec(),
            signature,
            BTreeMap::new(),
        )
        .expect("valid artifact")
    }

    fn sign(&self, content: &[u8]) -> Vec<u8> {
        let mut extra = Stack::new().expect("stack");
        extra.push(self.ca_cert.clone()).expect("stack push");
        Pkcs7::sign(
            &self.signer_cert,
            &self.signer_key,
            &extra,
            content,
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
        )
        .expect("pkcs7 sign")
        .to_der()
        .expect("pkcs7 der")
    }

    /// Register nodes already running `base`, alternating Blue/Green.
    pub async fn seed_nodes(&self, environment: Environment, count: usize, base: &ArtifactRef) {
        for i in 0..count {
            let pool = if i % 2 == 0 {
                TrafficPool::Blue
            } else {
                TrafficPool::Green
            };
            let mut node = Node::new(format!("worker-{i}"), environment).with_pool(pool);
            node.current_artifact = Some(base.clone());
            self.registry.register_node(node).await.expect("register");
        }
    }

    /// Arm the metrics source: latency degrades once `threshold` nodes run
    /// `target`.
    pub fn degrade_when_updated(
        &self,
        environment: Environment,
        target: ArtifactRef,
        threshold: usize,
    ) {
        *self.counters.rule.lock().expect("counters lock") = Some(DegradeRule {
            environment,
            target,
            threshold,
        });
    }

    pub async fn wait_terminal(&self, execution_id: &ExecutionId) -> PipelineExecution {
        let deadline = tokio::time::Instant::now() + TERMINAL_WAIT;
        loop {
            if let Some(ExecutionView::Terminal(state)) = self.engine.get(execution_id) {
                return state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "execution {execution_id} did not reach a terminal state"
            );
            tokio::time::sleep(POLL).await;
        }
    }

    pub async fn wait_for_stage(&self, execution_id: &ExecutionId, stage: PipelineStage) {
        let deadline = tokio::time::Instant::now() + TERMINAL_WAIT;
        loop {
            match self.engine.get(execution_id) {
                Some(ExecutionView::InProgress {
                    pipeline: Some(pipeline),
                    ..
                }) if pipeline.current_stage == Some(stage) => return,
                Some(ExecutionView::Terminal(state)) => {
                    panic!("execution finished ({}) before reaching {stage}", state.status)
                }
                _ => {}
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "execution {execution_id} never reached stage {stage}"
            );
            tokio::time::sleep(POLL).await;
        }
    }

    pub async fn wait_for_pending_approval(&self, execution_id: &ExecutionId) {
        let deadline = tokio::time::Instant::now() + TERMINAL_WAIT;
        loop {
            if let Ok(Some(_)) = self.engine.gate().get(execution_id.clone()).await {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no approval appeared for {execution_id}"
            );
            tokio::time::sleep(POLL).await;
        }
    }

    pub async fn approve_when_pending(
        &self,
        execution_id: &ExecutionId,
        resolver: &str,
        reason: &str,
    ) {
        self.wait_for_pending_approval(execution_id).await;
        self.engine
            .gate()
            .approve(execution_id.clone(), resolver, Some(reason.to_string()))
            .await
            .expect("approve");
    }

    pub async fn assert_all_running(&self, environment: Environment, expected: &ArtifactRef) {
        for node in self.registry.list_nodes(environment).await.expect("list") {
            assert_eq!(
                node.current_artifact.as_ref(),
                Some(expected),
                "node {} runs the wrong artifact",
                node.id
            );
        }
    }
}

fn fast_config() -> ConvoyConfig {
    let mut config = ConvoyConfig::default();
    config.canary.soak_duration_secs = 0;
    config.blue_green.smoke_duration_secs = 0;
    config.rolling.batch_health_timeout_secs = 5;
    config.strategy.node_apply_timeout_secs = 10;
    config.approval.sweep_interval_secs = 1;
    config.engine.lock_wait_timeout_secs = 1;
    config.engine.workers = 2;
    config
}

fn keypair() -> PKey<Private> {
    let rsa = Rsa::generate(2048).expect("rsa");
    PKey::from_rsa(rsa).expect("pkey")
}

fn name(cn: &str) -> openssl::x509::X509Name {
    let mut builder = X509NameBuilder::new().expect("name builder");
    builder.append_entry_by_text("CN", cn).expect("cn");
    builder.build()
}

fn serial() -> openssl::asn1::Asn1Integer {
    let mut bn = BigNum::new().expect("bignum");
    bn.rand(64, MsbOption::MAYBE_ZERO, false).expect("rand");
    bn.to_asn1_integer().expect("serial")
}

fn make_ca() -> (X509, PKey<Private>) {
    let key = keypair();
    let name = name("convoy-scenario-ca");
    let mut builder = X509::builder().expect("builder");
    builder.set_version(2).expect("version");
    builder.set_serial_number(&serial()).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("time"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("time"))
        .expect("not after");
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
        .expect("extension");
    builder.sign(&key, MessageDigest::sha256()).expect("sign");
    (builder.build(), key)
}

fn make_leaf(ca: &X509, ca_key: &PKey<Private>) -> (X509, PKey<Private>) {
    let key = keypair();
    let mut builder = X509::builder().expect("builder");
    builder.set_version(2).expect("version");
    builder.set_serial_number(&serial()).expect("serial");
    builder
        .set_subject_name(&name("convoy-release-signer"))
        .expect("subject");
    builder.set_issuer_name(ca.subject_name()).expect("issuer");
    builder.set_pubkey(&key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("time"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(30).expect("time"))
        .expect("not after");
    builder.sign(ca_key, MessageDigest::sha256()).expect("sign");
    (builder.build(), key)
}
