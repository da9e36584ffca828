//! tink-server and tink-controller: the workflow engine.

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubetink_core::{ManagedObject, Target};

use crate::common::{self, PodOptions, DEFAULT_REPOSITORY_PREFIX, DEFAULT_TAG, TINKERBELL_GROUP};
use crate::BuildError;

pub const SERVER: &str = "tink-server";
pub const CONTROLLER: &str = "tink-controller";
pub const SERVER_CLUSTER_ROLE: &str = "tink-server-cluster-role";
pub const SERVER_CLUSTER_ROLE_BINDING: &str = "tink-server-cluster-role-binding";
pub const CONTROLLER_CLUSTER_ROLE: &str = "tink-controller-cluster-role";
pub const CONTROLLER_CLUSTER_ROLE_BINDING: &str = "tink-controller-cluster-role-binding";
pub const LEADER_ELECTION_ROLE: &str = "tink-leader-election-role";
pub const LEADER_ELECTION_ROLE_BINDING: &str = "tink-leader-election-role-binding";
pub const GRPC_PORT: i32 = 42113;
pub const GRPC_PORT_NAME: &str = "tink-grpc";

const READ: &[&str] = &["get", "list", "watch"];

pub fn server_service_account(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::service_account(target, SERVER))
}

pub fn controller_service_account(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::service_account(target, CONTROLLER))
}

pub fn server_cluster_role(_: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role(
        SERVER_CLUSTER_ROLE,
        vec![
            common::rule(TINKERBELL_GROUP, &["hardware", "hardware/status"], READ),
            common::rule(TINKERBELL_GROUP, &["templates", "templates/status"], READ),
            common::rule(TINKERBELL_GROUP, &["workflows", "workflows/status"], &["get", "list", "patch", "update", "watch"]),
        ],
    ))
}

pub fn controller_cluster_role(_: &Target) -> Result<ManagedObject, BuildError> {
    let write = &["get", "list", "patch", "update", "watch"];
    Ok(common::cluster_role(
        CONTROLLER_CLUSTER_ROLE,
        vec![
            common::rule(TINKERBELL_GROUP, &["hardware", "hardware/status"], write),
            common::rule(TINKERBELL_GROUP, &["templates", "templates/status"], write),
            common::rule(
                TINKERBELL_GROUP,
                &["workflows", "workflows/status"],
                &["delete", "get", "list", "patch", "update", "watch"],
            ),
        ],
    ))
}

pub fn server_cluster_role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role_binding(target, SERVER_CLUSTER_ROLE_BINDING, SERVER_CLUSTER_ROLE, SERVER))
}

pub fn controller_cluster_role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role_binding(target, CONTROLLER_CLUSTER_ROLE_BINDING, CONTROLLER_CLUSTER_ROLE, CONTROLLER))
}

pub fn leader_election_role(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::role(
        target,
        LEADER_ELECTION_ROLE,
        vec![
            common::rule("", &["configmaps"], &["get", "list", "watch", "create", "update", "patch"]),
            common::rule("coordination.k8s.io", &["leases"], &["get", "list", "watch", "create", "update", "patch", "delete"]),
            common::rule("", &["events"], &["create", "patch"]),
        ],
    ))
}

pub fn leader_election_role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::role_binding(target, LEADER_ELECTION_ROLE_BINDING, LEADER_ELECTION_ROLE, CONTROLLER))
}

pub fn server_service(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::headless_service(
        target,
        SERVER,
        vec![common::service_port(None, GRPC_PORT, IntOrString::String(GRPC_PORT_NAME.to_string()), "TCP")],
    ))
}

pub fn server_deployment(target: &Target) -> Result<ManagedObject, BuildError> {
    let settings = &target.services.tink_server;
    // The server image is published as `tink`, not `tink-server`.
    let image = common::image(target, Some(&settings.image), &format!("{DEFAULT_REPOSITORY_PREFIX}/tink"), DEFAULT_TAG);

    let mut c = common::container("server", image);
    c.args = Some(vec!["--backend".to_string(), "kubernetes".to_string()]);
    c.env = Some(vec![common::env("TINKERBELL_TLS", settings.enable_tls.to_string())]);
    c.ports = Some(vec![common::container_port(GRPC_PORT_NAME, GRPC_PORT, "TCP")]);

    let opts = PodOptions { service_account: Some(SERVER), ..Default::default() };
    Ok(common::deployment(target, SERVER, opts, PodSpec { containers: vec![c], ..Default::default() }))
}

pub fn controller_deployment(target: &Target) -> Result<ManagedObject, BuildError> {
    let settings = &target.services.tink_controller;
    let image = common::image(
        target,
        Some(&settings.image),
        &format!("{DEFAULT_REPOSITORY_PREFIX}/{CONTROLLER}"),
        DEFAULT_TAG,
    );
    let c = common::container(CONTROLLER, image);
    let opts = PodOptions { service_account: Some(CONTROLLER), ..Default::default() };
    Ok(common::deployment(target, CONTROLLER, opts, PodSpec { containers: vec![c], ..Default::default() }))
}
