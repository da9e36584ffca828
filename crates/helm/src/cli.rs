//! [`ReleaseClient`] over the `helm` binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use kubetink_core::equality::parse_version;
use kubetink_values::ValuesDocument;
use semver::Version;
use tracing::debug;

use crate::release::ListedRelease;
use crate::{Release, ReleaseClient, ReleaseError};

/// Captured result of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Process execution seam.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let out = Command::new(program).args(args).output()?;
        Ok(CommandOutput { success: out.status.success(), stdout: out.stdout, stderr: out.stderr })
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs `helm` against one cluster.
#[derive(Debug, Clone)]
pub struct HelmCli<R = ProcessRunner> {
    binary: String,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
    runner: R,
}

impl HelmCli<ProcessRunner> {
    pub fn new(binary: impl Into<String>) -> Self {
        HelmCli::with_runner(binary, ProcessRunner)
    }
}

impl<R: CommandRunner> HelmCli<R> {
    pub fn with_runner(binary: impl Into<String>, runner: R) -> Self {
        HelmCli { binary: binary.into(), kubeconfig: None, context: None, timeout: DEFAULT_TIMEOUT, runner }
    }

    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn timeout_flag(&self) -> String {
        format!("{}s", self.timeout.as_secs())
    }

    /// Cluster selection flags go first so every subcommand sees them.
    fn run(&self, args: Vec<String>) -> Result<Vec<u8>, ReleaseError> {
        let mut full = Vec::with_capacity(args.len() + 4);
        if let Some(kc) = &self.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kc.display().to_string());
        }
        if let Some(ctx) = &self.context {
            full.push("--kube-context".to_string());
            full.push(ctx.clone());
        }
        full.extend(args);
        let command = format!("{} {}", self.binary, full.join(" "));
        debug!(%command, "running helm");

        let out = self
            .runner
            .run(&self.binary, &full)
            .map_err(|e| ReleaseError::Command { command: command.clone(), message: e.to_string() })?;
        if !out.success {
            return Err(ReleaseError::Command {
                command,
                message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    fn values_args(values_file: Option<&Path>, values: &BTreeMap<String, String>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(f) = values_file {
            args.push("--values".to_string());
            args.push(f.display().to_string());
        }
        for (k, v) in values {
            args.push("--set".to_string());
            args.push(format!("{k}={v}"));
        }
        args
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn decode_err(command: &str, err: impl std::fmt::Display) -> ReleaseError {
    ReleaseError::Decode { command: command.to_string(), message: err.to_string() }
}

impl<R: CommandRunner> ReleaseClient for HelmCli<R> {
    fn version(&self) -> Result<Version, ReleaseError> {
        // `--client` keeps helm 2 from dialing Tiller; it prints `Client: v2.17.0+g..`.
        let out = self.run(strings(&["version", "--client", "--short"]))?;
        let raw = String::from_utf8_lossy(&out);
        let raw = raw.trim();
        let short = raw.strip_prefix("Client:").map_or(raw, str::trim_start);
        parse_version(short).map_err(|e| ReleaseError::parse(format!("helm version {raw:?}"), e))
    }

    fn build_chart_dependencies(&self, chart_dir: &Path, flags: &[String]) -> Result<(), ReleaseError> {
        let mut args = strings(&["dependency", "build"]);
        args.extend(flags.iter().cloned());
        args.push(chart_dir.display().to_string());
        self.run(args).map(drop)
    }

    fn install_chart(
        &self,
        namespace: &str,
        release: &str,
        chart_dir: &Path,
        values_file: Option<&Path>,
        values: &BTreeMap<String, String>,
        flags: &[String],
    ) -> Result<(), ReleaseError> {
        let mut args = strings(&["upgrade", "--install", "--namespace", namespace, "--create-namespace"]);
        args.push("--timeout".to_string());
        args.push(self.timeout_flag());
        args.extend(Self::values_args(values_file, values));
        args.extend(flags.iter().cloned());
        args.push(release.to_string());
        args.push(chart_dir.display().to_string());
        self.run(args).map(drop)
    }

    fn get_release(&self, namespace: &str, name: &str) -> Result<Option<Release>, ReleaseError> {
        Ok(self.list_releases(namespace)?.into_iter().find(|r| r.name == name))
    }

    fn list_releases(&self, namespace: &str) -> Result<Vec<Release>, ReleaseError> {
        let out = self.run(strings(&["list", "--namespace", namespace, "--all", "--output", "json"]))?;
        let rows: Vec<ListedRelease> = serde_json::from_slice(&out).map_err(|e| decode_err("helm list", e))?;
        Ok(rows.into_iter().map(Release::from).collect())
    }

    fn uninstall_release(&self, namespace: &str, name: &str) -> Result<(), ReleaseError> {
        let mut args = strings(&["uninstall", "--namespace", namespace, "--timeout"]);
        args.push(self.timeout_flag());
        args.push(name.to_string());
        self.run(args).map(drop)
    }

    fn render_chart(
        &self,
        namespace: &str,
        release: &str,
        chart_dir: &Path,
        values_file: Option<&Path>,
        values: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, ReleaseError> {
        let mut args = strings(&["template", "--namespace", namespace]);
        args.extend(Self::values_args(values_file, values));
        args.push(release.to_string());
        args.push(chart_dir.display().to_string());
        self.run(args)
    }

    fn get_values(&self, namespace: &str, release: &str) -> Result<ValuesDocument, ReleaseError> {
        let out = self.run(strings(&["get", "values", "--namespace", namespace, "--output", "yaml", release]))?;
        let raw = std::str::from_utf8(&out).map_err(|e| decode_err("helm get values", e))?;
        ValuesDocument::parse(raw).map_err(|e| decode_err("helm get values", e))
    }
}
