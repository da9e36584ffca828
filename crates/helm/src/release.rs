use std::fmt;

use kubetink_core::equality::parse_version;
use semver::Version;
use serde::Deserialize;

/// Lifecycle state as reported by `helm status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseStatus {
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    /// The tool reported no status at all.
    CheckFailed,
}

impl ReleaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseStatus::Unknown => "unknown",
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Uninstalled => "uninstalled",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Uninstalling => "uninstalling",
            ReleaseStatus::PendingInstall => "pending-install",
            ReleaseStatus::PendingUpgrade => "pending-upgrade",
            ReleaseStatus::PendingRollback => "pending-rollback",
            ReleaseStatus::CheckFailed => "check-failed",
        }
    }

    /// Statuses newer helm versions may add map to `Unknown`.
    pub fn from_helm(raw: &str) -> Self {
        match raw.trim() {
            "" => ReleaseStatus::CheckFailed,
            "deployed" => ReleaseStatus::Deployed,
            "uninstalled" => ReleaseStatus::Uninstalled,
            "superseded" => ReleaseStatus::Superseded,
            "failed" => ReleaseStatus::Failed,
            "uninstalling" => ReleaseStatus::Uninstalling,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            _ => ReleaseStatus::Unknown,
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One installed release.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    /// `<chart name>-<chart version>`, as helm prints it.
    pub chart: String,
    pub revision: String,
    /// Chart version split off `chart`; `None` when it does not parse.
    pub version: Option<Version>,
    /// Free-form; not every application uses semver.
    pub app_version: String,
    pub status: ReleaseStatus,
}

/// Row of `helm list -o json`.
#[derive(Debug, Deserialize)]
pub(crate) struct ListedRelease {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    revision: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    chart: String,
    #[serde(default)]
    app_version: String,
}

impl From<ListedRelease> for Release {
    fn from(r: ListedRelease) -> Self {
        let version = chart_version(&r.chart);
        Release {
            name: r.name,
            namespace: r.namespace,
            version,
            chart: r.chart,
            revision: r.revision,
            app_version: r.app_version,
            status: ReleaseStatus::from_helm(&r.status),
        }
    }
}

/// Chart names may contain dashes and versions may too (`tink-stack-0.4.0-rc.1`);
/// the version starts at the first dash whose remainder parses.
fn chart_version(chart: &str) -> Option<Version> {
    chart.match_indices('-').find_map(|(at, _)| parse_version(&chart[at + 1..]).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_version_is_split_off_the_name() {
        assert_eq!(chart_version("tinkerbell-0.2.0"), Some(Version::new(0, 2, 0)));
        assert_eq!(chart_version("tink-stack-0.4.0-rc.1"), Version::parse("0.4.0-rc.1").ok());
        assert_eq!(chart_version("nodash"), None);
    }

    #[test]
    fn statuses() {
        assert_eq!(ReleaseStatus::from_helm("pending-upgrade"), ReleaseStatus::PendingUpgrade);
        assert_eq!(ReleaseStatus::from_helm("something-new"), ReleaseStatus::Unknown);
        assert_eq!(ReleaseStatus::from_helm(""), ReleaseStatus::CheckFailed);
        assert_eq!(ReleaseStatus::CheckFailed.to_string(), "check-failed");
    }
}
