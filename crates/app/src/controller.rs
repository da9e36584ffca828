//! Stack reconciler: one pipeline run per trigger.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use kubetink_core::{Stack, Target, TargetError};
use kubetink_pipeline::{ConvergencePipeline, ReconcileError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Retry delay after a failed reconcile.
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

pub struct Context {
    pub pipeline: ConvergencePipeline,
    /// Process-wide shutdown; each run gets a child of it.
    pub shutdown: CancellationToken,
    /// Used when a Stack carries no namespace of its own.
    pub default_namespace: String,
    pub requeue: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("stack {stack}: {source}")]
    Target {
        stack: String,
        #[source]
        source: TargetError,
    },
    #[error("stack {stack}: {source}")]
    Reconcile {
        stack: String,
        #[source]
        source: ReconcileError,
    },
}

impl OperatorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperatorError::Reconcile { source, .. } if source.is_cancelled())
    }
}

/// The stack's own namespace is the namespace its services land in.
pub fn target_for(stack: &Stack, default_namespace: &str) -> Result<Target, TargetError> {
    let ns = stack.namespace().unwrap_or_else(|| default_namespace.to_string());
    Target::from_stack(&stack.spec, &ns)
}

pub async fn reconcile(stack: Arc<Stack>, ctx: Arc<Context>) -> Result<Action, OperatorError> {
    let name = stack.name_any();
    let target =
        target_for(&stack, &ctx.default_namespace).map_err(|source| OperatorError::Target { stack: name.clone(), source })?;
    info!(stack = %name, namespace = %target.namespace, version = %stack.spec.version, "reconciling");

    let run = ctx.shutdown.child_token();
    ctx.pipeline
        .reconcile(&run, &target)
        .await
        .map_err(|source| OperatorError::Reconcile { stack: name.clone(), source })?;
    Ok(Action::requeue(ctx.requeue))
}

pub fn error_policy(stack: Arc<Stack>, err: &OperatorError, _ctx: Arc<Context>) -> Action {
    if err.is_cancelled() {
        debug!(stack = %stack.name_any(), "reconcile cancelled");
    } else {
        error!(stack = %stack.name_any(), error = %err, "reconciliation failed");
    }
    Action::requeue(ERROR_REQUEUE)
}
