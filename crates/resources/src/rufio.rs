//! rufio: BMC controller.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{HTTPGetAction, PodSecurityContext, PodSpec, Probe, SecurityContext};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubetink_core::{ManagedObject, Target};

use crate::common::{self, PodOptions, BMC_GROUP, DEFAULT_REPOSITORY_PREFIX};
use crate::BuildError;

pub const NAME: &str = "rufio";
pub const TAG: &str = "v0.1.0";
pub const CLUSTER_ROLE: &str = "rufio-manager-role";
pub const CLUSTER_ROLE_BINDING: &str = "rufio-manager-cluster-role-binding";
pub const ROLE: &str = "rufio-leader-election-role";
pub const ROLE_BINDING: &str = "rufio-leader-election-role-binding";

const PROBE_PORT: i32 = 8081;
const CRUD: &[&str] = &["create", "delete", "get", "list", "patch", "update", "watch"];
const STATUS: &[&str] = &["get", "patch", "update"];

pub fn service_account(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::service_account(target, NAME))
}

pub fn cluster_role(_: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role(
        CLUSTER_ROLE,
        vec![
            common::rule("", &["secrets"], &["get", "list", "watch"]),
            common::rule(BMC_GROUP, &["jobs"], CRUD),
            common::rule(BMC_GROUP, &["jobs/finalizers"], &["update"]),
            common::rule(BMC_GROUP, &["jobs/status"], STATUS),
            common::rule(BMC_GROUP, &["machines"], CRUD),
            common::rule(BMC_GROUP, &["machines/finalizers"], &["update"]),
            common::rule(BMC_GROUP, &["machines/status"], STATUS),
            common::rule(BMC_GROUP, &["tasks"], CRUD),
            common::rule(BMC_GROUP, &["tasks/status"], STATUS),
        ],
    ))
}

pub fn cluster_role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role_binding(target, CLUSTER_ROLE_BINDING, CLUSTER_ROLE, NAME))
}

pub fn role(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::role(
        target,
        ROLE,
        vec![
            common::rule("", &["configmaps"], &["get", "list", "watch", "create", "update", "patch", "delete"]),
            common::rule("coordination.k8s.io", &["leases"], &["get", "list", "watch", "create", "update", "patch", "delete"]),
            common::rule("", &["events"], &["create", "patch"]),
        ],
    ))
}

pub fn role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::role_binding(target, ROLE_BINDING, ROLE, NAME))
}

fn probe(path: &str, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(PROBE_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

pub fn deployment(target: &Target) -> Result<ManagedObject, BuildError> {
    let settings = target.services.rufio.clone().unwrap_or_default();
    let image = common::image(target, Some(&settings.image), &format!("{DEFAULT_REPOSITORY_PREFIX}/{NAME}"), TAG);

    let mut c = common::container("manager", image);
    c.command = Some(vec!["/manager".to_string()]);
    c.args = Some(vec!["--leader-elect".to_string()]);
    c.security_context = Some(SecurityContext { allow_privilege_escalation: Some(false), ..Default::default() });
    c.liveness_probe = Some(probe("/healthz", 15, 20));
    c.readiness_probe = Some(probe("/readyz", 5, 10));

    let opts = PodOptions {
        service_account: Some(NAME),
        extra_labels: vec![("control-plane", "controller-manager")],
        annotations: BTreeMap::from([("kubectl.kubernetes.io/default-container".to_string(), "manager".to_string())]),
        ..Default::default()
    };
    let spec = PodSpec {
        containers: vec![c],
        security_context: Some(PodSecurityContext { run_as_non_root: Some(true), ..Default::default() }),
        termination_grace_period_seconds: Some(10),
        ..Default::default()
    };
    Ok(common::deployment(target, NAME, opts, spec))
}
