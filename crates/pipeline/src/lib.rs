//! kubetink pipeline: converge a cluster onto the Tinkerbell stack.
//!
//! [`ConvergencePipeline::reconcile`] runs a fixed sequence of steps strictly in
//! order and stops at the first failure. Every step is create-or-skip, so a
//! rerun after a partial failure picks up where the last one stopped.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use kubetink_core::{ObjectKey, Target};
use kubetink_kubehub::{ClientError, ManagedObjectClient};
use kubetink_resources::ProvisionError;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod steps;

pub use steps::{EnsureStep, NamespaceStep, PollConfig, ProvisioningStep, ENSURE_STEPS};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("step {step}: cancelled")]
    Cancelled { step: &'static str },
    #[error("step {step}: namespace {namespace} not readable after {waited:?}")]
    Timeout { step: &'static str, namespace: String, waited: Duration },
    #[error("step {step}: {object}: {source}")]
    Step {
        step: &'static str,
        object: ObjectKey,
        #[source]
        source: ProvisionError,
    },
}

/// Coarse classification for retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    Cancelled,
    Unexpected,
}

impl ReconcileError {
    pub fn step(&self) -> &'static str {
        match self {
            ReconcileError::Cancelled { step } | ReconcileError::Timeout { step, .. } | ReconcileError::Step { step, .. } => {
                *step
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Cancelled { .. } => ErrorKind::Cancelled,
            ReconcileError::Timeout { .. } => ErrorKind::Timeout,
            ReconcileError::Step { source: ProvisionError::Client(ClientError::NotFound(_)), .. } => ErrorKind::NotFound,
            ReconcileError::Step { source: ProvisionError::Client(ClientError::Cancelled), .. } => ErrorKind::Cancelled,
            ReconcileError::Step { .. } => ErrorKind::Unexpected,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Ordered provisioning of one target through a shared client.
pub struct ConvergencePipeline {
    client: Arc<dyn ManagedObjectClient>,
    steps: Vec<Box<dyn ProvisioningStep>>,
}

impl ConvergencePipeline {
    pub fn new(client: Arc<dyn ManagedObjectClient>) -> Self {
        Self::with_poll(client, PollConfig::default())
    }

    /// Standard step order: namespace, then [`ENSURE_STEPS`].
    pub fn with_poll(client: Arc<dyn ManagedObjectClient>, poll: PollConfig) -> Self {
        let mut steps: Vec<Box<dyn ProvisioningStep>> = vec![Box::new(NamespaceStep::new(poll))];
        steps.extend(ENSURE_STEPS.iter().cloned().map(|s| Box::new(s) as Box<dyn ProvisioningStep>));
        Self { client, steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn reconcile(&self, ctx: &CancellationToken, target: &Target) -> Result<(), ReconcileError> {
        let t0 = Instant::now();
        counter!("reconcile_attempts", 1u64);
        for step in &self.steps {
            let name = step.name();
            if ctx.is_cancelled() {
                return Err(ReconcileError::Cancelled { step: name });
            }
            let s0 = Instant::now();
            let res = step.run(ctx, self.client.as_ref(), target).await;
            histogram!("reconcile_step_latency_ms", s0.elapsed().as_secs_f64() * 1000.0, "step" => name);
            if let Err(e) = res {
                counter!("reconcile_err", 1u64, "step" => name);
                if !e.is_cancelled() {
                    warn!(namespace = %target.namespace, step = name, error = %e, "reconcile failed");
                }
                return Err(e);
            }
        }
        counter!("reconcile_ok", 1u64);
        info!(namespace = %target.namespace, took_ms = %t0.elapsed().as_millis(), "reconcile ok");
        Ok(())
    }
}
