//! The `Stack` custom resource: desired state of one Tinkerbell installation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::TargetError;

/// Tinkerbell stack deployed by the operator. Every service object the
/// pipeline manages is derived from this spec.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubetink.io",
    version = "v1alpha1",
    kind = "Stack",
    plural = "stacks",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    /// Tinkerbell stack version.
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub services: Services,

    /// Resolver IP rendered into the tink-stack proxy configuration.
    #[serde(default, rename = "dnsResolverIP", skip_serializing_if = "Option::is_none")]
    pub dns_resolver_ip: Option<String>,

    /// Registry that replaces the registry host of every service image,
    /// e.g. `docker.io` turns `quay.io/tinkerbell/smee` into `docker.io/tinkerbell/smee`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Pull secrets attached to every workload; they must live in the target namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Services {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smee: Option<Smee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hegel: Option<Hegel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rufio: Option<Rufio>,
    #[serde(default)]
    pub tink_server: TinkServer,
    #[serde(default)]
    pub tink_controller: TinkController,
}

/// Image override; empty fields fall back to the service default.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Image {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

/// Smee: DHCP, TFTP, iPXE and syslog for netbooting machines.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Smee {
    #[serde(default)]
    pub image: Image,
    #[serde(default)]
    pub backend_configs: BackendConfigs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_configs: Option<SyslogConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tftp_configs: Option<TftpConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipxe_configs: Option<IpxeConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_configs: Option<DhcpConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SyslogConfigs {
    #[serde(rename = "bindAddress")]
    pub ip: String,
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TftpConfigs {
    pub ip: String,
    pub port: u16,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tftp_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipxe_script_patch: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpxeConfigs {
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tink_server_address: Option<String>,
    #[serde(default, rename = "enableHTTPBinary", skip_serializing_if = "Option::is_none")]
    pub enable_http_binary: Option<bool>,
    #[serde(default, rename = "enableTLS", skip_serializing_if = "Option::is_none")]
    pub enable_tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_kernel_args: Option<String>,
    #[serde(default, rename = "hookURL", skip_serializing_if = "Option::is_none")]
    pub hook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_proxies: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DhcpConfigs {
    pub ip: String,
    pub port: u16,
    #[serde(default, rename = "IPForPacket", skip_serializing_if = "Option::is_none")]
    pub ip_for_packet: Option<String>,
    #[serde(default, rename = "syslogIP", skip_serializing_if = "Option::is_none")]
    pub syslog_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tftp_address: Option<String>,
    #[serde(default, rename = "httpIPXEBinaryAddress", skip_serializing_if = "Option::is_none")]
    pub http_ipxe_binary_address: Option<String>,
    #[serde(default, rename = "httpIPXEBinaryURI", skip_serializing_if = "Option::is_none")]
    pub http_ipxe_script_uri: Option<String>,
}

/// Smee backend settings. At most one of the two modes may be set; kube mode
/// is the default when neither is.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfigs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_kube_mode: Option<BackendKubeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_file_mode: Option<BackendFileMode>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BackendKubeMode {
    #[serde(default, rename = "configFilePath", skip_serializing_if = "Option::is_none")]
    pub kube_config_file_path: Option<String>,
    #[serde(default, rename = "kubeAPIURL", skip_serializing_if = "Option::is_none")]
    pub kube_api_url: Option<String>,
    #[serde(default, rename = "kubeNamespace", skip_serializing_if = "Option::is_none")]
    pub kube_namespace: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendFileMode {
    pub file_path: String,
}

/// Resolved, mutually exclusive smee backend.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendMode<'a> {
    Kube(Option<&'a BackendKubeMode>),
    File(&'a BackendFileMode),
}

impl BackendConfigs {
    pub fn mode(&self) -> Result<BackendMode<'_>, TargetError> {
        match (&self.backend_kube_mode, &self.backend_file_mode) {
            (Some(_), Some(_)) => Err(TargetError::ConflictingBackends),
            (_, Some(file)) => Ok(BackendMode::File(file)),
            (kube, None) => Ok(BackendMode::Kube(kube.as_ref())),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hegel {
    #[serde(default)]
    pub image: Image,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_proxies: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Rufio {
    #[serde(default)]
    pub image: Image,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TinkServer {
    #[serde(default)]
    pub image: Image,
    #[serde(default, rename = "enableTLS")]
    pub enable_tls: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TinkController {
    #[serde(default)]
    pub image: Image,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stack_document() {
        let y = r#"
version: v0.1.0
dnsResolverIP: 10.96.0.10
registry: registry.local:5000
imagePullSecrets: [regcred]
services:
  smee:
    image: { repository: quay.io/tinkerbell/smee, tag: v0.9.0 }
    backendConfigs:
      backendFileMode: { filePath: /hardware.yaml }
    syslogConfigs: { bindAddress: 0.0.0.0, port: 514 }
    dhcpConfigs: { ip: 0.0.0.0, port: 67, IPForPacket: 10.1.1.1, httpIPXEBinaryURI: http://x/ipxe }
    ipxeConfigs: { ip: 0.0.0.0, port: 8080, enableTLS: true, enableHTTPBinary: false, trustedProxies: [10.244.0.0/24] }
  hegel:
    trustedProxies: [10.244.0.0/24, 10.244.1.0/24]
  tinkServer:
    enableTLS: true
  tinkController: {}
"#;
        let spec: StackSpec = serde_yaml::from_str(y).expect("parse");
        assert_eq!(spec.dns_resolver_ip.as_deref(), Some("10.96.0.10"));
        assert_eq!(spec.image_pull_secrets, vec!["regcred"]);
        let smee = spec.services.smee.as_ref().expect("smee");
        assert_eq!(smee.image.tag, "v0.9.0");
        assert_eq!(smee.syslog_configs.as_ref().map(|s| s.port), Some(514));
        let dhcp = smee.dhcp_configs.as_ref().expect("dhcp");
        assert_eq!(dhcp.ip_for_packet.as_deref(), Some("10.1.1.1"));
        assert_eq!(dhcp.http_ipxe_script_uri.as_deref(), Some("http://x/ipxe"));
        let ipxe = smee.ipxe_configs.as_ref().expect("ipxe");
        assert_eq!(ipxe.enable_tls, Some(true));
        assert_eq!(ipxe.enable_http_binary, Some(false));
        assert!(matches!(smee.backend_configs.mode(), Ok(BackendMode::File(f)) if f.file_path == "/hardware.yaml"));
        assert_eq!(spec.services.hegel.as_ref().map(|h| h.trusted_proxies.len()), Some(2));
        assert!(spec.services.tink_server.enable_tls);
        assert!(spec.services.rufio.is_none());
    }

    #[test]
    fn backend_defaults_to_kube() {
        assert_eq!(BackendConfigs::default().mode(), Ok(BackendMode::Kube(None)));
    }
}
