use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use kubetink_helm::{check_version, HelmCli, ReleaseClient, HELM_BINARY_ENV, MIN_HELM_VERSION};
use kubetink_values::{Path, Value, ValuesDocument};
use tracing::info;

mod deploy;

/// Name of the umbrella chart under the charts directory.
const CHART_NAME: &str = "tinkerbell";

#[derive(Parser, Debug)]
#[command(name = "tinkerbell-installer", version, about = "Install the Tinkerbell stack with helm")]
struct Cli {
    /// Directory holding the charts
    #[arg(long, global = true, env = "TINKERBELL_CHARTS_DIRECTORY", default_value = "charts")]
    charts_directory: PathBuf,

    /// Debug logging
    #[arg(short = 'v', long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or upgrade the stack
    Deploy(DeployArgs),
    /// Show the installed release
    Status(ReleaseArgs),
    /// List releases in the namespace
    List(ReleaseArgs),
    /// Remove the release
    Uninstall(ReleaseArgs),
    /// Print the manifests an install would apply
    Render(RenderArgs),
    /// Print the values an installed release was configured with
    Values {
        #[command(flatten)]
        release: ReleaseArgs,
        /// Only print the value at this path, e.g. `smee.image.tag`
        #[arg(long)]
        path: Option<Path>,
    },
}

#[derive(Args, Debug, Clone)]
struct HelmArgs {
    /// helm executable
    #[arg(long, env = HELM_BINARY_ENV, default_value = "helm")]
    helm_binary: String,

    /// Timeout for helm operations, e.g. 90s, 5m, 1h30m
    #[arg(long, default_value = "5m", value_parser = parse_timeout)]
    helm_timeout: Duration,

    #[arg(long, default_value = "tinkerbell")]
    namespace: String,

    #[arg(long, default_value = "tinkerbell")]
    release_name: String,
}

#[derive(Args, Debug, Clone)]
struct ReleaseArgs {
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: PathBuf,

    #[arg(long, env = "KUBE_CONTEXT")]
    kube_context: Option<String>,

    #[command(flatten)]
    helm: HelmArgs,
}

impl ReleaseArgs {
    fn client(&self) -> HelmCli {
        HelmCli::new(self.helm.helm_binary.clone())
            .kubeconfig(self.kubeconfig.clone())
            .context(self.kube_context.clone())
            .timeout(self.helm.helm_timeout)
    }
}

#[derive(Args, Debug, Clone)]
struct ValuesArgs {
    /// Values file passed to the chart
    #[arg(long, env = "HELM_VALUES")]
    helm_values: Option<PathBuf>,

    /// Override a single value, e.g. `--set smee.image.tag=v0.9.0`
    #[arg(long = "set", value_name = "PATH=VALUE")]
    set: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct DeployArgs {
    #[command(flatten)]
    release: ReleaseArgs,

    #[command(flatten)]
    values: ValuesArgs,

    /// Do not run `helm dependency build`
    #[arg(long, action = ArgAction::SetTrue)]
    skip_dependencies: bool,

    /// Reinstall even when the same chart version is already deployed
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    #[command(flatten)]
    helm: HelmArgs,

    #[command(flatten)]
    values: ValuesArgs,
}

/// Settings resolved once from flags and environment.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub charts_directory: PathBuf,
    pub verbose: bool,
}

impl InstallerConfig {
    pub fn chart_dir(&self) -> PathBuf {
        self.charts_directory.join(CHART_NAME)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env = std::env::var("KUBETINK_LOG").unwrap_or_else(|_| default.to_string());
    let filter =
        tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

/// Go-style durations limited to whole `h`, `m` and `s` units.
fn parse_timeout(raw: &str) -> Result<Duration, String> {
    let mut total = 0u64;
    let mut digits = String::new();
    for c in raw.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("invalid unit {c:?} in {raw:?}")),
        };
        let n: u64 = digits.parse().map_err(|_| format!("missing number before {c:?} in {raw:?}"))?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("invalid timeout {raw:?}; expected e.g. 90s, 5m or 1h30m"))?;
        digits.clear();
    }
    if !digits.is_empty() || total == 0 {
        return Err(format!("invalid timeout {raw:?}; expected e.g. 90s, 5m or 1h30m"));
    }
    Ok(Duration::from_secs(total))
}

/// Values file plus `--set` overrides, merged into one document.
fn load_values(args: &ValuesArgs) -> Result<Option<ValuesDocument>> {
    if args.helm_values.is_none() && args.set.is_empty() {
        return Ok(None);
    }
    let mut doc = match &args.helm_values {
        Some(p) => ValuesDocument::load(p).with_context(|| format!("loading values from {}", p.display()))?,
        None => ValuesDocument::new(),
    };
    for item in &args.set {
        let (path, value) = item.split_once('=').with_context(|| format!("--set {item}: expected PATH=VALUE"))?;
        let path: Path = path.parse().with_context(|| format!("--set {item}"))?;
        let value: Value = if value.is_empty() {
            Value::from("")
        } else {
            ValuesDocument::parse(value).map(ValuesDocument::into_value).unwrap_or_else(|_| value.into())
        };
        doc.set(&path, value).with_context(|| format!("--set {item}"))?;
    }
    Ok(Some(doc))
}

/// Materialize merged values for helm; the file lives as long as the returned guard.
fn values_file(doc: Option<&ValuesDocument>) -> Result<Option<tempfile::NamedTempFile>> {
    let Some(doc) = doc else { return Ok(None) };
    let file = tempfile::Builder::new().prefix("kubetink-values-").suffix(".yaml").tempfile()?;
    doc.save(file.path())?;
    Ok(Some(file))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = InstallerConfig { charts_directory: cli.charts_directory, verbose: cli.verbose };
    init_tracing(cfg.verbose);

    match cli.command {
        Commands::Deploy(args) => deploy::run(&cfg, &args)?,
        Commands::Status(args) => {
            let helm = args.client();
            match helm.get_release(&args.helm.namespace, &args.helm.release_name)? {
                Some(r) => {
                    println!("NAME:       {}", r.name);
                    println!("NAMESPACE:  {}", r.namespace);
                    println!("CHART:      {}", r.chart);
                    println!("REVISION:   {}", r.revision);
                    println!("APP:        {}", r.app_version);
                    println!("STATUS:     {}", r.status);
                }
                None => println!("{} is not installed in {}", args.helm.release_name, args.helm.namespace),
            }
        }
        Commands::List(args) => {
            let releases = args.client().list_releases(&args.helm.namespace)?;
            println!("{:<20} {:<28} {:<9} STATUS", "NAME", "CHART", "REVISION");
            for r in releases {
                println!("{:<20} {:<28} {:<9} {}", r.name, r.chart, r.revision, r.status);
            }
        }
        Commands::Uninstall(args) => {
            let helm = args.client();
            check_version(&helm, &MIN_HELM_VERSION, helm.binary())?;
            helm.uninstall_release(&args.helm.namespace, &args.helm.release_name)?;
            info!(release = %args.helm.release_name, namespace = %args.helm.namespace, "uninstalled");
        }
        Commands::Render(args) => {
            let helm = HelmCli::new(args.helm.helm_binary.clone()).timeout(args.helm.helm_timeout);
            let doc = load_values(&args.values)?;
            let file = values_file(doc.as_ref())?;
            let out = helm.render_chart(
                &args.helm.namespace,
                &args.helm.release_name,
                &cfg.chart_dir(),
                file.as_ref().map(|f| f.path()),
                &BTreeMap::new(),
            )?;
            std::io::stdout().write_all(&out)?;
        }
        Commands::Values { release, path } => {
            let doc = release.client().get_values(&release.helm.namespace, &release.helm.release_name)?;
            let out = match path {
                Some(p) => {
                    let v = doc.get(&p).with_context(|| format!("{p} is not set"))?;
                    ValuesDocument::from_value(v.clone()).to_yaml()?
                }
                None => doc.to_yaml()?,
            };
            print!("{out}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetink_values::path;

    #[test]
    fn timeouts() {
        assert_eq!(parse_timeout("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_timeout("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_timeout("90s").unwrap(), Duration::from_secs(90));
        assert!(parse_timeout("5").is_err());
        assert!(parse_timeout("5d").is_err());
        assert!(parse_timeout("m").is_err());
        assert!(parse_timeout("9999999999999999999h").is_err());
        assert!(parse_timeout("5124095576030431h1h").is_err());
    }

    #[test]
    fn deploy_flags_parse() {
        let cli = Cli::try_parse_from([
            "tinkerbell-installer",
            "--charts-directory",
            "/opt/charts",
            "deploy",
            "--kubeconfig",
            "/tmp/kc",
            "--helm-binary",
            "/usr/local/bin/helm",
            "--helm-timeout",
            "10m",
            "--skip-dependencies",
            "--set",
            "smee.image.tag=v0.9.0",
        ])
        .unwrap();
        assert_eq!(cli.charts_directory, PathBuf::from("/opt/charts"));
        let Commands::Deploy(args) = cli.command else { panic!("expected deploy") };
        assert_eq!(args.release.helm.helm_binary, "/usr/local/bin/helm");
        assert_eq!(args.release.helm.helm_timeout, Duration::from_secs(600));
        assert_eq!(args.release.helm.namespace, "tinkerbell");
        assert!(args.skip_dependencies && !args.force);
        assert_eq!(args.values.set, vec!["smee.image.tag=v0.9.0".to_string()]);
    }

    #[test]
    fn set_overrides_are_typed_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("values.yaml");
        std::fs::write(&file, "smee:\n  image:\n    tag: v0.8.0\n").unwrap();
        let args = ValuesArgs {
            helm_values: Some(file),
            set: vec!["smee.image.tag=v0.9.0".into(), "hegel.trustedProxies[0]=10.0.0.0/8".into(), "tls=true".into()],
        };
        let doc = load_values(&args).unwrap().unwrap();
        assert_eq!(doc.get_str(&path!["smee", "image", "tag"]), Some("v0.9.0"));
        assert_eq!(doc.get_str(&path!["hegel", "trustedProxies", 0usize]), Some("10.0.0.0/8"));
        assert_eq!(doc.get(&path!["tls"]).and_then(|v| v.as_bool()), Some(true));
        assert!(load_values(&ValuesArgs { helm_values: None, set: vec![] }).unwrap().is_none());
        assert!(load_values(&ValuesArgs { helm_values: None, set: vec!["novalue".into()] }).is_err());
        let huge = ValuesArgs { helm_values: None, set: vec!["a[18446744073709551615]=x".into()] };
        assert!(load_values(&huge).is_err());
    }
}
