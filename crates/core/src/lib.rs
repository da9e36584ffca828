//! kubetink core types: the reconciliation target, the managed-object model and
//! the desired-state document.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub mod equality;
pub mod stack;

pub use stack::{Services, Stack, StackSpec};

/// Resolver used by the proxy config when the stack does not name one.
pub const DEFAULT_CLUSTER_DNS: &str = "10.96.0.10";

/// Label applied to every object the pipeline creates.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "kubetink";

pub mod prelude {
    pub use super::{ManagedObject, ObjectKey, ObjectKind, Target, TargetError};
}

/// Kinds of objects the pipeline manages. Workloads are `apps/v1` Deployments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Namespace,
    ServiceAccount,
    ClusterRole,
    ClusterRoleBinding,
    Role,
    RoleBinding,
    Service,
    ConfigMap,
    Workload,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 9] = [
        ObjectKind::Namespace,
        ObjectKind::ServiceAccount,
        ObjectKind::ClusterRole,
        ObjectKind::ClusterRoleBinding,
        ObjectKind::Role,
        ObjectKind::RoleBinding,
        ObjectKind::Service,
        ObjectKind::ConfigMap,
        ObjectKind::Workload,
    ];

    pub fn is_namespaced(self) -> bool {
        !matches!(self, ObjectKind::Namespace | ObjectKind::ClusterRole | ObjectKind::ClusterRoleBinding)
    }

    /// Kubernetes kind name as it appears in manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Namespace => "Namespace",
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::Role => "Role",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::Service => "Service",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Workload => "Deployment",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a managed object: `(kind, namespace, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self { kind, namespace: None, name: name.into() }
    }

    pub fn namespaced(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: Some(namespace.into()), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A desired or observed object, one variant per [`ObjectKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    Namespace(Namespace),
    ServiceAccount(ServiceAccount),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
    Service(Service),
    ConfigMap(ConfigMap),
    Workload(Deployment),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Namespace(_) => ObjectKind::Namespace,
            ManagedObject::ServiceAccount(_) => ObjectKind::ServiceAccount,
            ManagedObject::ClusterRole(_) => ObjectKind::ClusterRole,
            ManagedObject::ClusterRoleBinding(_) => ObjectKind::ClusterRoleBinding,
            ManagedObject::Role(_) => ObjectKind::Role,
            ManagedObject::RoleBinding(_) => ObjectKind::RoleBinding,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ManagedObject::Workload(_) => ObjectKind::Workload,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Namespace(o) => &o.metadata,
            ManagedObject::ServiceAccount(o) => &o.metadata,
            ManagedObject::ClusterRole(o) => &o.metadata,
            ManagedObject::ClusterRoleBinding(o) => &o.metadata,
            ManagedObject::Role(o) => &o.metadata,
            ManagedObject::RoleBinding(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::Workload(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().labels.as_ref()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }
}

/// Validation errors raised while deriving a [`Target`] from a stack.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid namespace {0:?}: must be a lowercase RFC 1123 label")]
    InvalidNamespace(String),
    #[error("invalid dnsResolverIP {0:?}: must be an IP address")]
    InvalidDnsResolver(String),
    #[error("smee backend: backendKubeMode and backendFileMode are mutually exclusive")]
    ConflictingBackends,
}

/// What one reconciliation applies to. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub namespace: String,
    /// Cluster DNS resolver rendered into the proxy configuration.
    pub cluster_dns: String,
    /// Registry host that replaces the default registry of every image.
    pub registry: Option<String>,
    pub image_pull_secrets: Vec<String>,
    pub services: Services,
}

impl Target {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster_dns: DEFAULT_CLUSTER_DNS.to_string(),
            registry: None,
            image_pull_secrets: Vec::new(),
            services: Services::default(),
        }
    }

    /// Build the target for `stack`, deploying into `namespace`.
    pub fn from_stack(stack: &StackSpec, namespace: &str) -> Result<Self, TargetError> {
        if !is_rfc1123_label(namespace) {
            return Err(TargetError::InvalidNamespace(namespace.to_string()));
        }
        if let Some(smee) = &stack.services.smee {
            smee.backend_configs.mode()?;
        }
        Ok(Self {
            namespace: namespace.to_string(),
            cluster_dns: match stack.dns_resolver_ip.as_deref().filter(|s| !s.is_empty()) {
                Some(ip) => resolver_address(ip)?,
                None => DEFAULT_CLUSTER_DNS.to_string(),
            },
            registry: stack.registry.clone().filter(|s| !s.is_empty()),
            image_pull_secrets: stack.image_pull_secrets.clone(),
            services: stack.services.clone(),
        })
    }

    pub fn namespace_key(&self) -> ObjectKey {
        ObjectKey::cluster(ObjectKind::Namespace, self.namespace.clone())
    }
}

/// Address in the form nginx's `resolver` directive takes; IPv6 is bracketed.
fn resolver_address(raw: &str) -> Result<String, TargetError> {
    match raw.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip.to_string()),
        Ok(IpAddr::V6(ip)) => Ok(format!("[{ip}]")),
        Err(_) => Err(TargetError::InvalidDnsResolver(raw.to_string())),
    }
}

fn is_rfc1123_label(s: &str) -> bool {
    let b = s.as_bytes();
    !b.is_empty()
        && b.len() <= 63
        && b.iter().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == b'-')
        && b[0] != b'-'
        && b[b.len() - 1] != b'-'
}
