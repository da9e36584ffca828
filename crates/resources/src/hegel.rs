//! hegel: instance metadata service.

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubetink_core::{ManagedObject, Target};

use crate::common::{self, PodOptions, DEFAULT_REPOSITORY_PREFIX, DEFAULT_TAG, TINKERBELL_GROUP};
use crate::BuildError;

pub const NAME: &str = "hegel";
pub const ROLE: &str = "hegel";
pub const ROLE_BINDING: &str = "hegel-role-binding";
pub const PORT: i32 = 50061;

pub fn service_account(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::service_account(target, NAME))
}

pub fn role(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::role(
        target,
        ROLE,
        vec![
            common::rule(TINKERBELL_GROUP, &["hardware", "hardware/status"], &["get", "list", "watch"]),
            common::rule(TINKERBELL_GROUP, &["workflows", "workflows/status"], &["get", "list", "watch"]),
        ],
    ))
}

pub fn role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::role_binding(target, ROLE_BINDING, ROLE, NAME))
}

pub fn service(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::headless_service(target, NAME, vec![common::service_port(None, PORT, IntOrString::Int(PORT), "TCP")]))
}

pub fn deployment(target: &Target) -> Result<ManagedObject, BuildError> {
    let settings = target.services.hegel.clone().unwrap_or_default();
    let image = common::image(target, Some(&settings.image), &format!("{DEFAULT_REPOSITORY_PREFIX}/{NAME}"), DEFAULT_TAG);

    let mut c = common::container(NAME, image);
    c.args = Some(vec!["--data-model=kubernetes".to_string(), format!("--http-port={PORT}")]);
    c.env = Some(vec![common::env("HEGEL_TRUSTED_PROXIES", settings.trusted_proxies.join(","))]);
    c.ports = Some(vec![common::container_port("hegel-http", PORT, "TCP")]);

    let opts = PodOptions { service_account: Some(NAME), ..Default::default() };
    Ok(common::deployment(target, NAME, opts, PodSpec { containers: vec![c], ..Default::default() }))
}
