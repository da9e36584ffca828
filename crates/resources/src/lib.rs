//! kubetink resources: one provisioner per managed object of the Tinkerbell stack.
//!
//! A [`Provisioner`] pairs an object identity with a pure builder over the
//! [`Target`]. [`CATALOG`] lists every provisioner, grouped by kind in the order
//! the pipeline applies them.

#![forbid(unsafe_code)]

use kubetink_core::{ManagedObject, ObjectKey, ObjectKind, Target, TargetError};
use kubetink_kubehub::{cancellable, ClientError, EnsureOutcome, ManagedObjectClient};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod common;
pub mod hegel;
pub mod rufio;
pub mod smee;
pub mod stack;
pub mod tink;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid target: {0}")]
    Target(#[from] TargetError),
    #[error("rendering template: {0}")]
    Render(#[from] minijinja::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("building {key}: {source}")]
    Build {
        key: ObjectKey,
        #[source]
        source: BuildError,
    },
    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type Builder = fn(&Target) -> Result<ManagedObject, BuildError>;

/// Owns exactly one `(kind, namespace, name)`; namespaced kinds live in the target namespace.
#[derive(Clone, Copy)]
pub struct Provisioner {
    kind: ObjectKind,
    name: &'static str,
    build: Builder,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner").field("kind", &self.kind).field("name", &self.name).finish()
    }
}

impl Provisioner {
    pub const fn new(kind: ObjectKind, name: &'static str, build: Builder) -> Self {
        Self { kind, name, build }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self, target: &Target) -> ObjectKey {
        if self.kind.is_namespaced() {
            ObjectKey::namespaced(self.kind, target.namespace.clone(), self.name)
        } else {
            ObjectKey::cluster(self.kind, self.name)
        }
    }

    /// Desired object for `target`. Deterministic: equal targets build equal objects.
    pub fn build(&self, target: &Target) -> Result<ManagedObject, ProvisionError> {
        (self.build)(target).map_err(|source| ProvisionError::Build { key: self.key(target), source })
    }

    /// Build and submit the desired object. An existing object with the same identity is success.
    pub async fn ensure(
        &self,
        ctx: &CancellationToken,
        client: &dyn ManagedObjectClient,
        target: &Target,
    ) -> Result<(), ProvisionError> {
        let obj = self.build(target)?;
        let outcome = cancellable(ctx, client.ensure(&obj)).await?;
        if outcome == EnsureOutcome::Created {
            counter!("provision_create_total", 1u64, "kind" => self.kind.as_str());
        }
        debug!(object = %obj.key(), ?outcome, "ensured");
        Ok(())
    }
}

use ObjectKind::*;

/// Every managed object of the stack, grouped by kind in apply order.
pub static CATALOG: &[Provisioner] = &[
    Provisioner::new(ServiceAccount, smee::NAME, smee::service_account),
    Provisioner::new(ServiceAccount, hegel::NAME, hegel::service_account),
    Provisioner::new(ServiceAccount, rufio::NAME, rufio::service_account),
    Provisioner::new(ServiceAccount, tink::SERVER, tink::server_service_account),
    Provisioner::new(ServiceAccount, tink::CONTROLLER, tink::controller_service_account),
    Provisioner::new(ClusterRole, smee::CLUSTER_ROLE, smee::cluster_role),
    Provisioner::new(ClusterRole, tink::SERVER_CLUSTER_ROLE, tink::server_cluster_role),
    Provisioner::new(ClusterRole, tink::CONTROLLER_CLUSTER_ROLE, tink::controller_cluster_role),
    Provisioner::new(ClusterRole, rufio::CLUSTER_ROLE, rufio::cluster_role),
    Provisioner::new(ClusterRoleBinding, smee::CLUSTER_ROLE_BINDING, smee::cluster_role_binding),
    Provisioner::new(ClusterRoleBinding, tink::SERVER_CLUSTER_ROLE_BINDING, tink::server_cluster_role_binding),
    Provisioner::new(ClusterRoleBinding, tink::CONTROLLER_CLUSTER_ROLE_BINDING, tink::controller_cluster_role_binding),
    Provisioner::new(ClusterRoleBinding, rufio::CLUSTER_ROLE_BINDING, rufio::cluster_role_binding),
    Provisioner::new(Role, tink::LEADER_ELECTION_ROLE, tink::leader_election_role),
    Provisioner::new(Role, rufio::ROLE, rufio::role),
    Provisioner::new(Role, hegel::ROLE, hegel::role),
    Provisioner::new(RoleBinding, tink::LEADER_ELECTION_ROLE_BINDING, tink::leader_election_role_binding),
    Provisioner::new(RoleBinding, rufio::ROLE_BINDING, rufio::role_binding),
    Provisioner::new(RoleBinding, hegel::ROLE_BINDING, hegel::role_binding),
    Provisioner::new(Service, smee::NAME, smee::service),
    Provisioner::new(Service, hegel::NAME, hegel::service),
    Provisioner::new(Service, tink::SERVER, tink::server_service),
    Provisioner::new(ConfigMap, stack::CONFIG_MAP, stack::config_map),
    Provisioner::new(Workload, smee::NAME, smee::deployment),
    Provisioner::new(Workload, hegel::NAME, hegel::deployment),
    Provisioner::new(Workload, rufio::NAME, rufio::deployment),
    Provisioner::new(Workload, tink::CONTROLLER, tink::controller_deployment),
    Provisioner::new(Workload, tink::SERVER, tink::server_deployment),
    Provisioner::new(Workload, stack::NAME, stack::deployment),
];

/// The target namespace itself, created ahead of everything it holds.
pub fn namespace(target: &Target) -> ManagedObject {
    ManagedObject::Namespace(k8s_openapi::api::core::v1::Namespace {
        metadata: common::meta(&target.namespace, None, Default::default()),
        ..Default::default()
    })
}

/// Provisioners of one kind, in catalog order.
pub fn provisioners(kind: ObjectKind) -> Vec<Provisioner> {
    CATALOG.iter().filter(|p| p.kind == kind).copied().collect()
}

/// All desired objects for `target`, in catalog order.
pub fn desired_objects(target: &Target) -> Result<Vec<ManagedObject>, ProvisionError> {
    CATALOG.iter().map(|p| p.build(target)).collect()
}
