//! smee: DHCP, TFTP, iPXE and syslog for netbooting machines.

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubetink_core::stack::{BackendMode, Smee};
use kubetink_core::{ManagedObject, Target};

use crate::common::{self, PodOptions, DEFAULT_REPOSITORY_PREFIX, DEFAULT_TAG, TINKERBELL_GROUP};
use crate::BuildError;

pub const NAME: &str = "smee";
pub const CLUSTER_ROLE: &str = "smee-cluster-role";
pub const CLUSTER_ROLE_BINDING: &str = "smee-cluster-role-binding";

const DHCP: (&str, u16) = ("0.0.0.0", 67);
const HTTP: (&str, u16) = ("0.0.0.0", 80);
const SYSLOG: (&str, u16) = ("0.0.0.0", 514);
const TFTP: (&str, u16) = ("0.0.0.0", 69);

/// Bind endpoints with defaults for anything the stack leaves out.
struct Endpoints {
    dhcp: (String, u16),
    http: (String, u16),
    syslog: (String, u16),
    tftp: (String, u16),
}

impl Endpoints {
    fn of(smee: &Smee) -> Self {
        Self {
            dhcp: endpoint(smee.dhcp_configs.as_ref().map(|c| (c.ip.as_str(), c.port)), DHCP),
            http: endpoint(smee.ipxe_configs.as_ref().map(|c| (c.ip.as_str(), c.port)), HTTP),
            syslog: endpoint(smee.syslog_configs.as_ref().map(|c| (c.ip.as_str(), c.port)), SYSLOG),
            tftp: endpoint(smee.tftp_configs.as_ref().map(|c| (c.ip.as_str(), c.port)), TFTP),
        }
    }
}

fn endpoint(configured: Option<(&str, u16)>, default: (&str, u16)) -> (String, u16) {
    let (ip, port) = configured.unwrap_or(default);
    (ip.to_string(), port)
}

fn addr((ip, port): &(String, u16)) -> String {
    format!("{ip}:{port}")
}

fn settings(target: &Target) -> Smee {
    target.services.smee.clone().unwrap_or_default()
}

pub fn service_account(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::service_account(target, NAME))
}

pub fn cluster_role(_: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role(
        CLUSTER_ROLE,
        vec![
            common::rule(TINKERBELL_GROUP, &["hardware", "hardware/status"], &["get", "list", "watch"]),
            common::rule(TINKERBELL_GROUP, &["workflows", "workflows/status"], &["get", "list", "watch"]),
        ],
    ))
}

pub fn cluster_role_binding(target: &Target) -> Result<ManagedObject, BuildError> {
    Ok(common::cluster_role_binding(target, CLUSTER_ROLE_BINDING, CLUSTER_ROLE, NAME))
}

pub fn service(target: &Target) -> Result<ManagedObject, BuildError> {
    let ep = Endpoints::of(&settings(target));
    let port = |name: &str, (_, p): &(String, u16), proto: &str| {
        common::service_port(Some(name), i32::from(*p), IntOrString::Int(i32::from(*p)), proto)
    };
    Ok(common::headless_service(
        target,
        NAME,
        vec![
            port("smee-dhcp", &ep.dhcp, "UDP"),
            port("smee-http", &ep.http, "TCP"),
            port("smee-syslog", &ep.syslog, "UDP"),
            port("smee-tftp", &ep.tftp, "UDP"),
        ],
    ))
}

/// Command-line flags for the smee binary.
pub fn args(target: &Target, smee: &Smee) -> Result<Vec<String>, BuildError> {
    let ep = Endpoints::of(smee);
    let mut args = vec![
        format!("--dhcp-addr={}", addr(&ep.dhcp)),
        format!("--http-addr={}", addr(&ep.http)),
        format!("--syslog-addr={}", addr(&ep.syslog)),
        format!("--tftp-addr={}", addr(&ep.tftp)),
    ];

    match smee.backend_configs.mode()? {
        BackendMode::Kube(kube) => {
            args.push("--backend-kube-enabled=true".to_string());
            args.push("--backend-file-enabled=false".to_string());
            let ns = kube.and_then(|k| k.kube_namespace.as_deref()).unwrap_or(&target.namespace);
            args.push(format!("--backend-kube-namespace={ns}"));
            if let Some(path) = kube.and_then(|k| k.kube_config_file_path.as_deref()) {
                args.push(format!("--backend-kube-config={path}"));
            }
            if let Some(url) = kube.and_then(|k| k.kube_api_url.as_deref()) {
                args.push(format!("--backend-kube-api={url}"));
            }
        }
        BackendMode::File(file) => {
            args.push("--backend-kube-enabled=false".to_string());
            args.push("--backend-file-enabled=true".to_string());
            args.push(format!("--backend-file-path={}", file.file_path));
        }
    }

    if let Some(dhcp) = &smee.dhcp_configs {
        let opts = [
            ("dhcp-ip-for-packet", &dhcp.ip_for_packet),
            ("dhcp-syslog-ip", &dhcp.syslog_ip),
            ("dhcp-tftp-ip", &dhcp.tftp_address),
            ("dhcp-http-ipxe-binary-ip", &dhcp.http_ipxe_binary_address),
            ("dhcp-http-ipxe-script-url", &dhcp.http_ipxe_script_uri),
        ];
        args.extend(opts.iter().filter_map(|(flag, v)| v.as_ref().map(|v| format!("--{flag}={v}"))));
    }

    if let Some(tftp) = &smee.tftp_configs {
        if let Some(t) = tftp.tftp_timeout {
            args.push(format!("--tftp-timeout={t}s"));
        }
        if let Some(patch) = &tftp.ipxe_script_patch {
            args.push(format!("--ipxe-script-patch={patch}"));
        }
    }

    if let Some(ipxe) = &smee.ipxe_configs {
        if let Some(addr) = &ipxe.tink_server_address {
            args.push(format!("--tink-server={addr}"));
        }
        if let Some(tls) = ipxe.enable_tls {
            args.push(format!("--tink-server-tls={tls}"));
        }
        if let Some(http) = ipxe.enable_http_binary {
            args.push(format!("--ipxe-enable-http-binary={http}"));
        }
        if let Some(kargs) = &ipxe.extra_kernel_args {
            args.push(format!("--extra-kernel-args={kargs}"));
        }
        if let Some(url) = &ipxe.hook_url {
            args.push(format!("--osie-url={url}"));
        }
        if !ipxe.trusted_proxies.is_empty() {
            args.push(format!("--trusted-proxies={}", ipxe.trusted_proxies.join(",")));
        }
    }

    if let Some(level) = &smee.log_level {
        args.push(format!("--log-level={level}"));
    }
    Ok(args)
}

pub fn deployment(target: &Target) -> Result<ManagedObject, BuildError> {
    let smee = settings(target);
    let image = common::image(
        target,
        Some(&smee.image),
        &format!("{DEFAULT_REPOSITORY_PREFIX}/{NAME}"),
        DEFAULT_TAG,
    );
    let mut c = common::container(NAME, image);
    c.args = Some(args(target, &smee)?);
    c.env = Some(vec![common::env("DATA_MODEL_VERSION", "kubernetes")]);

    let opts = PodOptions { service_account: Some(NAME), host_network: true, ..Default::default() };
    Ok(common::deployment(target, NAME, opts, PodSpec { containers: vec![c], ..Default::default() }))
}
