//! Builders shared by every service: metadata, images, resources and RBAC shapes.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubetink_core::stack::Image;
use kubetink_core::{ManagedObject, Target, LABEL_MANAGED_BY, MANAGED_BY};

pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
pub const TINKERBELL_GROUP: &str = "tinkerbell.org";
pub const BMC_GROUP: &str = "bmc.tinkerbell.org";
pub const STACK_LABEL: (&str, &str) = ("stack", "tinkerbell");

/// Default registry path of the Tinkerbell images.
pub const DEFAULT_REPOSITORY_PREFIX: &str = "quay.io/tinkerbell";
pub const DEFAULT_TAG: &str = "v0.8.0";

pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Metadata for an object owned by the pipeline. Cluster-scoped when `namespace` is `None`.
pub fn meta(name: &str, namespace: Option<&str>, extra: BTreeMap<String, String>) -> ObjectMeta {
    let mut l = extra;
    l.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(l),
        ..Default::default()
    }
}

/// Resolve an image reference: per-service override, then the target-wide registry.
pub fn image(target: &Target, over: Option<&Image>, default_repository: &str, default_tag: &str) -> String {
    let repository = over.map(|i| i.repository.as_str()).filter(|s| !s.is_empty()).unwrap_or(default_repository);
    let tag = over.map(|i| i.tag.as_str()).filter(|s| !s.is_empty()).unwrap_or(default_tag);
    let repository = match &target.registry {
        Some(registry) => with_registry(repository, registry),
        None => repository.to_string(),
    };
    format!("{repository}:{tag}")
}

/// Point `repository` at `registry`. A leading path segment that names a host
/// (has a dot or a port, or is `localhost`) is replaced; otherwise the
/// registry is prefixed.
pub fn with_registry(repository: &str, registry: &str) -> String {
    let registry = registry.trim_end_matches('/');
    match repository.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            format!("{registry}/{rest}")
        }
        _ => format!("{registry}/{repository}"),
    }
}

pub fn resources() -> ResourceRequirements {
    let q = |s: &str| Quantity(s.to_string());
    ResourceRequirements {
        requests: Some(BTreeMap::from([("memory".to_string(), q("64Mi")), ("cpu".to_string(), q("10m"))])),
        limits: Some(BTreeMap::from([("memory".to_string(), q("128Mi")), ("cpu".to_string(), q("500m"))])),
        ..Default::default()
    }
}

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.into()), ..Default::default() }
}

pub fn container_port(name: &str, port: i32, protocol: &str) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

pub fn service_port(name: Option<&str>, port: i32, target: IntOrString, protocol: &str) -> ServicePort {
    ServicePort {
        name: name.map(str::to_string),
        port,
        target_port: Some(target),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

pub fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..Default::default()
    }
}

pub fn service_account(target: &Target, name: &str) -> ManagedObject {
    ManagedObject::ServiceAccount(ServiceAccount {
        metadata: meta(name, Some(&target.namespace), BTreeMap::new()),
        ..Default::default()
    })
}

pub fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ManagedObject {
    ManagedObject::ClusterRole(ClusterRole {
        metadata: meta(name, None, BTreeMap::new()),
        rules: Some(rules),
        ..Default::default()
    })
}

pub fn role(target: &Target, name: &str, rules: Vec<PolicyRule>) -> ManagedObject {
    ManagedObject::Role(Role { metadata: meta(name, Some(&target.namespace), BTreeMap::new()), rules: Some(rules) })
}

fn subject(target: &Target, service_account: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account.to_string(),
        namespace: Some(target.namespace.clone()),
        ..Default::default()
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef { api_group: RBAC_GROUP.to_string(), kind: kind.to_string(), name: name.to_string() }
}

pub fn cluster_role_binding(target: &Target, name: &str, cluster_role: &str, service_account: &str) -> ManagedObject {
    ManagedObject::ClusterRoleBinding(ClusterRoleBinding {
        metadata: meta(name, None, BTreeMap::new()),
        role_ref: role_ref("ClusterRole", cluster_role),
        subjects: Some(vec![subject(target, service_account)]),
    })
}

pub fn role_binding(target: &Target, name: &str, role: &str, service_account: &str) -> ManagedObject {
    ManagedObject::RoleBinding(RoleBinding {
        metadata: meta(name, Some(&target.namespace), BTreeMap::new()),
        role_ref: role_ref("Role", role),
        subjects: Some(vec![subject(target, service_account)]),
    })
}

/// Headless service selecting pods labelled `app=<name>`.
pub fn headless_service(target: &Target, name: &str, ports: Vec<ServicePort>) -> ManagedObject {
    ManagedObject::Service(Service {
        metadata: meta(name, Some(&target.namespace), labels([("app", name)])),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels([("app", name)])),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Pod-level knobs that differ between workloads.
#[derive(Default)]
pub struct PodOptions {
    pub service_account: Option<&'static str>,
    pub host_network: bool,
    pub extra_labels: Vec<(&'static str, &'static str)>,
    pub annotations: BTreeMap<String, String>,
}

/// Single-replica Deployment `name` running `spec`; pull secrets come from the target.
pub fn deployment(target: &Target, name: &str, opts: PodOptions, spec: PodSpec) -> ManagedObject {
    let mut pod_labels = labels([("app", name), STACK_LABEL]);
    pod_labels.extend(labels(opts.extra_labels.iter().copied()));

    let mut spec = spec;
    spec.service_account_name = opts.service_account.map(str::to_string);
    if opts.host_network {
        spec.host_network = Some(true);
    }
    if !target.image_pull_secrets.is_empty() {
        spec.image_pull_secrets = Some(
            target
                .image_pull_secrets
                .iter()
                .map(|s| LocalObjectReference { name: Some(s.clone()) })
                .collect(),
        );
    }

    let mut object_labels = labels([("app", name)]);
    object_labels.extend(labels(opts.extra_labels.iter().copied()));

    ManagedObject::Workload(Deployment {
        metadata: meta(name, Some(&target.namespace), object_labels),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(pod_labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: (!opts.annotations.is_empty()).then_some(opts.annotations),
                    ..Default::default()
                }),
                spec: Some(spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// A container with the common pull policy and resource envelope.
pub fn container(name: &str, image: String) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        resources: Some(resources()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_replaces_host_segment() {
        assert_eq!(with_registry("quay.io/tinkerbell/smee", "docker.io"), "docker.io/tinkerbell/smee");
        assert_eq!(with_registry("localhost/tinkerbell/smee", "r.local:5000/"), "r.local:5000/tinkerbell/smee");
        assert_eq!(with_registry("nginx", "registry.local"), "registry.local/nginx");
        assert_eq!(with_registry("library/nginx", "registry.local"), "registry.local/library/nginx");
    }

    #[test]
    fn image_override_precedence() {
        let mut t = Target::new("tinkerbell");
        let def = "quay.io/tinkerbell/hegel";
        assert_eq!(image(&t, None, def, "v0.8.0"), "quay.io/tinkerbell/hegel:v0.8.0");

        let over = Image { repository: String::new(), tag: "v0.9.1".into() };
        assert_eq!(image(&t, Some(&over), def, "v0.8.0"), "quay.io/tinkerbell/hegel:v0.9.1");

        t.registry = Some("registry.local:5000".into());
        let over = Image { repository: "ghcr.io/me/hegel".into(), tag: String::new() };
        assert_eq!(image(&t, Some(&over), def, "v0.8.0"), "registry.local:5000/me/hegel:v0.8.0");
    }

    #[test]
    fn every_object_is_labelled() {
        let m = meta("x", None, labels([("app", "x")]));
        let l = m.labels.unwrap();
        assert_eq!(l.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY));
        assert_eq!(l.get("app").map(String::as_str), Some("x"));
    }

    #[test]
    fn pull_secrets_attached_to_pods() {
        let mut t = Target::new("tinkerbell");
        t.image_pull_secrets = vec!["regcred".into()];
        let obj = deployment(&t, "hegel", PodOptions::default(), PodSpec::default());
        let ManagedObject::Workload(d) = obj else { panic!("not a workload") };
        let pod = d.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name.as_deref(), Some("regcred"));
    }
}
