//! Provisioning steps: the namespace wait and one ensure step per kind.

use std::time::Duration;

use kubetink_core::{ObjectKey, ObjectKind, Target};
use kubetink_kubehub::{cancellable, ClientError, ManagedObjectClient};
use kubetink_resources::{provisioners, ProvisionError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ReconcileError;

/// One ordered unit of the pipeline.
#[async_trait::async_trait]
pub trait ProvisioningStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: &CancellationToken,
        client: &dyn ManagedObjectClient,
        target: &Target,
    ) -> Result<(), ReconcileError>;
}

/// Namespace visibility poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(1), timeout: Duration::from_secs(30) }
    }
}

fn step_error(step: &'static str, object: &ObjectKey, err: ProvisionError) -> ReconcileError {
    match err {
        ProvisionError::Client(ClientError::Cancelled) => ReconcileError::Cancelled { step },
        source => ReconcileError::Step { step, object: object.clone(), source },
    }
}

/// Ensure the target namespace exists and is readable before anything is put in it.
#[derive(Debug, Default, Clone)]
pub struct NamespaceStep {
    pub poll: PollConfig,
}

impl NamespaceStep {
    pub const NAME: &'static str = "namespace";

    pub fn new(poll: PollConfig) -> Self {
        Self { poll }
    }
}

#[async_trait::async_trait]
impl ProvisioningStep for NamespaceStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        &self,
        ctx: &CancellationToken,
        client: &dyn ManagedObjectClient,
        target: &Target,
    ) -> Result<(), ReconcileError> {
        let step = self.name();
        let key = target.namespace_key();
        let fail = |e: ClientError| step_error(step, &key, ProvisionError::Client(e));

        match cancellable(ctx, client.get(&key)).await {
            Ok(_) => {
                debug!(namespace = %target.namespace, "namespace present");
                return Ok(());
            }
            Err(ClientError::NotFound(_)) => {}
            Err(e) => return Err(fail(e)),
        }

        cancellable(ctx, client.ensure(&kubetink_resources::namespace(target))).await.map_err(fail)?;
        info!(namespace = %target.namespace, "namespace created; waiting for it to become readable");

        let start = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ReconcileError::Cancelled { step }),
                _ = tokio::time::sleep(self.poll.interval) => {}
            }
            match cancellable(ctx, client.get(&key)).await {
                Ok(_) => {
                    debug!(namespace = %target.namespace, waited_ms = %start.elapsed().as_millis(), "namespace visible");
                    return Ok(());
                }
                Err(ClientError::NotFound(_)) => {}
                Err(e) => return Err(fail(e)),
            }
            let waited = start.elapsed();
            if waited >= self.poll.timeout {
                return Err(ReconcileError::Timeout { step, namespace: target.namespace.clone(), waited });
            }
        }
    }
}

/// Runs every provisioner of one kind, in catalog order, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct EnsureStep {
    name: &'static str,
    kind: ObjectKind,
}

impl EnsureStep {
    pub const fn new(name: &'static str, kind: ObjectKind) -> Self {
        Self { name, kind }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }
}

#[async_trait::async_trait]
impl ProvisioningStep for EnsureStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        ctx: &CancellationToken,
        client: &dyn ManagedObjectClient,
        target: &Target,
    ) -> Result<(), ReconcileError> {
        for p in provisioners(self.kind) {
            p.ensure(ctx, client, target).await.map_err(|e| step_error(self.name, &p.key(target), e))?;
        }
        Ok(())
    }
}

/// Steps after the namespace, in dependency order.
pub const ENSURE_STEPS: [EnsureStep; 8] = [
    EnsureStep::new("service-accounts", ObjectKind::ServiceAccount),
    EnsureStep::new("cluster-roles", ObjectKind::ClusterRole),
    EnsureStep::new("cluster-role-bindings", ObjectKind::ClusterRoleBinding),
    EnsureStep::new("roles", ObjectKind::Role),
    EnsureStep::new("role-bindings", ObjectKind::RoleBinding),
    EnsureStep::new("services", ObjectKind::Service),
    EnsureStep::new("config-maps", ObjectKind::ConfigMap),
    EnsureStep::new("workloads", ObjectKind::Workload),
];
