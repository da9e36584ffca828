//! tink-stack: the nginx front proxy and hook artifact server.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, HostPathVolumeSource, KeyToPath, PodSpec, Volume, VolumeMount,
};
use kubetink_core::{ManagedObject, Target};
use sha2::{Digest, Sha256};

use crate::common::{self, PodOptions};
use crate::BuildError;

pub const NAME: &str = "tink-stack";
pub const CONFIG_MAP: &str = "nginx-conf";
pub const CONFIG_KEY: &str = "nginx.conf";
pub const CHECKSUM_ANNOTATION: &str = "checksum/config";
pub const NGINX_IMAGE: (&str, &str) = ("nginx", "1.23.1");
const INIT_IMAGE: (&str, &str) = ("alpine", "3.18");

const HOOK_DIR: &str = "/usr/share/nginx/html";
const HOOK_VOLUME: &str = "hook-artifacts";
const HOOK_RELEASE: &str = "https://github.com/tinkerbell/hook/releases/download/v0.7.0";

const NGINX_TEMPLATE: &str = include_str!("../templates/nginx.conf.j2");

// sha512 of the hook v0.7.0 artifacts; a matching set skips the download.
const HOOK_CHECKSUMS: &[(&str, &str)] = &[
    ("7c35042d35c003ae1f424e503ad6edf21854bc70b24b37006e810c3c8a92543420eed129c14e364769b0f32c27bdf4c61299fce8f8156af7477cac6a43931a20", "vmlinuz-x86_64"),
    ("be7c3d57e2d73bfa4e41a2b5740c722b1c83722e4388b3cff9017192fce43ede360221e3095c800e511d7b4bce6065f2906883421409dd6d983412418a8d903e", "initramfs-x86_64"),
    ("2f1bdbf64380e281288f54c6ddd29221d8a007d29b40f405da0592ed32ef6e52695fc5071e05b2db3f075122943d62a2c266704d154a16ffb7b278c70538e7da", "vmlinuz-aarch64"),
    ("5adc51798c8699f5f257599aabb999e2c2f65a07c9f8607c65510e57122b3e5c53196819e7ececdcda7b8fef47ba597ea7c4b53f2f4a92e236b20e355443eefe", "initramfs-aarch64"),
];

/// Render the proxy configuration for `target`.
pub fn render_nginx_conf(target: &Target) -> Result<String, BuildError> {
    let mut env = minijinja::Environment::new();
    env.add_template(CONFIG_KEY, NGINX_TEMPLATE)?;
    let ctx = minijinja::context! {
        cluster_dns => &target.cluster_dns,
        namespace => &target.namespace,
    };
    Ok(env.get_template(CONFIG_KEY)?.render(ctx)?)
}

/// Hex sha256 of the rendered configuration; rolls the proxy pods when it changes.
pub fn config_checksum(conf: &str) -> String {
    Sha256::digest(conf.as_bytes()).iter().map(|b| format!("{b:02x}")).collect()
}

pub fn config_map(target: &Target) -> Result<ManagedObject, BuildError> {
    let conf = render_nginx_conf(target)?;
    Ok(ManagedObject::ConfigMap(ConfigMap {
        metadata: common::meta(CONFIG_MAP, Some(&target.namespace), BTreeMap::new()),
        data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), conf)])),
        ..Default::default()
    }))
}

fn hook_script() -> String {
    let mut lines = vec![format!("rm -f {HOOK_DIR}/checksums.txt"), format!("touch {HOOK_DIR}/checksums.txt")];
    lines.extend(HOOK_CHECKSUMS.iter().map(|(sum, file)| format!("echo \"{sum}  {file}\" >> {HOOK_DIR}/checksums.txt")));
    lines.push(format!("cd {HOOK_DIR}"));
    lines.push("sha512sum -c checksums.txt && exit 0".to_string());
    lines.push("apk add wget".to_string());
    for (i, arch) in ["x86_64", "aarch64"].iter().enumerate() {
        lines.push(format!("echo downloading hook {arch}"));
        lines.push(format!("wget -O /tmp/hook{i}.tar.gz {HOOK_RELEASE}/hook_{arch}.tar.gz"));
        lines.push(format!("tar -zxvf /tmp/hook{i}.tar.gz -C {HOOK_DIR}"));
        lines.push(format!("rm -f /tmp/hook{i}.tar.gz"));
    }
    lines.join("\n")
}

pub fn deployment(target: &Target) -> Result<ManagedObject, BuildError> {
    let conf = render_nginx_conf(target)?;
    let hook_mount = VolumeMount { name: HOOK_VOLUME.to_string(), mount_path: HOOK_DIR.to_string(), ..Default::default() };

    let mut proxy = common::container(NAME, common::image(target, None, NGINX_IMAGE.0, NGINX_IMAGE.1));
    proxy.command = Some(vec!["/bin/sh".to_string(), "-c".to_string()]);
    proxy.args = Some(vec!["cp /tmp/nginx.conf.template /etc/nginx/nginx.conf && exec nginx -g 'daemon off;'".to_string()]);
    proxy.ports = Some(vec![
        common::container_port("smee-dhcp", 67, "UDP"),
        common::container_port("smee-http", 80, "TCP"),
        common::container_port("smee-tftp", 69, "UDP"),
        common::container_port("smee-syslog", 514, "UDP"),
        common::container_port("hegel-http", 50061, "TCP"),
        common::container_port("tink-grpc", 42113, "TCP"),
        common::container_port("hook-http", 8080, "TCP"),
    ]);
    proxy.volume_mounts = Some(vec![
        hook_mount.clone(),
        VolumeMount { name: CONFIG_MAP.to_string(), mount_path: "/tmp".to_string(), read_only: Some(true), ..Default::default() },
    ]);

    let init = Container {
        name: "init-hook-download".to_string(),
        image: Some(common::image(target, None, INIT_IMAGE.0, INIT_IMAGE.1)),
        command: Some(vec!["/bin/sh".to_string(), "-xc".to_string()]),
        args: Some(vec![hook_script()]),
        volume_mounts: Some(vec![hook_mount]),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: HOOK_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: "/opt/hook".to_string(),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        },
        Volume {
            name: CONFIG_MAP.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(CONFIG_MAP.to_string()),
                items: Some(vec![KeyToPath {
                    key: CONFIG_KEY.to_string(),
                    path: "nginx.conf.template".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let opts = PodOptions {
        annotations: BTreeMap::from([(CHECKSUM_ANNOTATION.to_string(), config_checksum(&conf))]),
        ..Default::default()
    };
    let spec = PodSpec { containers: vec![proxy], init_containers: Some(vec![init]), volumes: Some(volumes), ..Default::default() };
    Ok(common::deployment(target, NAME, opts, spec))
}
