//! `deploy`: version gate, chart checks, then install or upgrade.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use kubetink_core::equality::opt_versions_equal;
use kubetink_helm::{check_version, Chart, ReleaseClient, ReleaseStatus, MIN_HELM_VERSION};
use tracing::{info, warn};

use crate::{load_values, values_file, DeployArgs, InstallerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    UpToDate,
}

pub struct Plan<'a> {
    pub binary: &'a str,
    pub namespace: &'a str,
    pub release: &'a str,
    pub chart_dir: &'a Path,
    pub values_file: Option<&'a Path>,
    pub skip_dependencies: bool,
    pub force: bool,
}

pub fn run(cfg: &InstallerConfig, args: &DeployArgs) -> Result<()> {
    let helm = args.release.client();
    let values = load_values(&args.values)?;
    let file = values_file(values.as_ref())?;
    let chart_dir = cfg.chart_dir();
    let plan = Plan {
        binary: helm.binary(),
        namespace: &args.release.helm.namespace,
        release: &args.release.helm.release_name,
        chart_dir: &chart_dir,
        values_file: file.as_ref().map(|f| f.path()),
        skip_dependencies: args.skip_dependencies,
        force: args.force,
    };
    execute(&helm, &plan)?;
    Ok(())
}

pub fn execute(helm: &dyn ReleaseClient, plan: &Plan<'_>) -> Result<Outcome> {
    let version = check_version(helm, &MIN_HELM_VERSION, plan.binary)?;
    info!(%version, "helm version ok");

    let chart = Chart::load(plan.chart_dir).with_context(|| format!("loading chart from {}", plan.chart_dir.display()))?;
    info!(chart = %chart.name, version = %chart.version, "chart loaded");

    if plan.skip_dependencies {
        info!("skipping chart dependencies");
    } else {
        helm.build_chart_dependencies(plan.chart_dir, &[]).context("building chart dependencies")?;
    }

    if let Some(existing) = helm.get_release(plan.namespace, plan.release)? {
        let same = opt_versions_equal(existing.version.as_ref(), Some(&chart.version));
        if same && existing.status == ReleaseStatus::Deployed && !plan.force {
            info!(release = plan.release, version = %chart.version, "already deployed; use --force to reinstall");
            return Ok(Outcome::UpToDate);
        }
        if existing.status != ReleaseStatus::Deployed {
            warn!(release = plan.release, status = %existing.status, "release is not healthy; upgrading");
        }
    }

    helm.install_chart(plan.namespace, plan.release, plan.chart_dir, plan.values_file, &BTreeMap::new(), &[])
        .with_context(|| format!("installing {} into {}", plan.release, plan.namespace))?;
    info!(release = plan.release, namespace = plan.namespace, version = %chart.version, "deployed");
    Ok(Outcome::Installed)
}
