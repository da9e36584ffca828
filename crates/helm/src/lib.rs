//! kubetink helm: the release client used by the manual installation flow.
//!
//! [`ReleaseClient`] is the capability surface; [`HelmCli`] implements it by
//! shelling out to the `helm` binary. Callers gate every mutating call on
//! [`check_version`] since older helm releases keep release state in a format
//! this client does not understand.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kubetink_core::equality::version_precedence;
use kubetink_values::ValuesDocument;
use semver::Version;

mod chart;
mod cli;
mod release;

pub use chart::{Chart, Dependency, CHART_MANIFEST};
pub use cli::{CommandOutput, CommandRunner, HelmCli, ProcessRunner};
pub use release::{Release, ReleaseStatus};

/// Oldest helm this client drives.
pub const MIN_HELM_VERSION: Version = Version::new(3, 0, 0);

/// Environment override for the helm binary, mirrored by `--helm-binary`.
pub const HELM_BINARY_ENV: &str = "HELM_BINARY";

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error(
        "{binary} reports version {detected}, but at least {minimum} is required; \
         use --helm-binary or $HELM_BINARY to point at a newer helm"
    )]
    VersionIncompatible { detected: Version, minimum: Version, binary: String },
    #[error("parsing {what}: {message}")]
    Parse { what: String, message: String },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("decoding output of `{command}`: {message}")]
    Decode { command: String, message: String },
}

impl ReleaseError {
    pub(crate) fn parse(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ReleaseError::Parse { what: what.into(), message: err.to_string() }
    }
}

/// Release management over a chart directory.
pub trait ReleaseClient {
    fn version(&self) -> Result<Version, ReleaseError>;

    fn build_chart_dependencies(&self, chart_dir: &Path, flags: &[String]) -> Result<(), ReleaseError>;

    /// Install, or upgrade in place when the release already exists.
    fn install_chart(
        &self,
        namespace: &str,
        release: &str,
        chart_dir: &Path,
        values_file: Option<&Path>,
        values: &BTreeMap<String, String>,
        flags: &[String],
    ) -> Result<(), ReleaseError>;

    /// `None` when no release of that name exists in `namespace`.
    fn get_release(&self, namespace: &str, name: &str) -> Result<Option<Release>, ReleaseError>;

    fn list_releases(&self, namespace: &str) -> Result<Vec<Release>, ReleaseError>;

    fn uninstall_release(&self, namespace: &str, name: &str) -> Result<(), ReleaseError>;

    /// Rendered manifests, exactly as the tool printed them.
    fn render_chart(
        &self,
        namespace: &str,
        release: &str,
        chart_dir: &Path,
        values_file: Option<&Path>,
        values: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, ReleaseError>;

    /// User-supplied values of an installed release.
    fn get_values(&self, namespace: &str, release: &str) -> Result<ValuesDocument, ReleaseError>;
}

/// Fail unless the client's tool is at least `minimum` by semver precedence.
/// Returns the detected version.
pub fn check_version(client: &dyn ReleaseClient, minimum: &Version, binary: &str) -> Result<Version, ReleaseError> {
    let detected = client.version()?;
    if version_precedence(&detected, minimum) == Ordering::Less {
        return Err(ReleaseError::VersionIncompatible { detected, minimum: minimum.clone(), binary: binary.to_string() });
    }
    tracing::debug!(%detected, %minimum, binary, "helm version accepted");
    Ok(detected)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl ReleaseClient for Fixed {
        fn version(&self) -> Result<Version, ReleaseError> {
            kubetink_core::equality::parse_version(self.0).map_err(|e| ReleaseError::parse("version", e))
        }
        fn build_chart_dependencies(&self, _: &Path, _: &[String]) -> Result<(), ReleaseError> {
            unimplemented!()
        }
        fn install_chart(
            &self,
            _: &str,
            _: &str,
            _: &Path,
            _: Option<&Path>,
            _: &BTreeMap<String, String>,
            _: &[String],
        ) -> Result<(), ReleaseError> {
            unimplemented!()
        }
        fn get_release(&self, _: &str, _: &str) -> Result<Option<Release>, ReleaseError> {
            unimplemented!()
        }
        fn list_releases(&self, _: &str) -> Result<Vec<Release>, ReleaseError> {
            unimplemented!()
        }
        fn uninstall_release(&self, _: &str, _: &str) -> Result<(), ReleaseError> {
            unimplemented!()
        }
        fn render_chart(
            &self,
            _: &str,
            _: &str,
            _: &Path,
            _: Option<&Path>,
            _: &BTreeMap<String, String>,
        ) -> Result<Vec<u8>, ReleaseError> {
            unimplemented!()
        }
        fn get_values(&self, _: &str, _: &str) -> Result<ValuesDocument, ReleaseError> {
            unimplemented!()
        }
    }

    #[test]
    fn old_helm_is_rejected_with_both_versions_and_the_override() {
        let err = check_version(&Fixed("2.9.9"), &MIN_HELM_VERSION, "/usr/bin/helm").unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, ReleaseError::VersionIncompatible { .. }));
        assert!(msg.contains("2.9.9") && msg.contains("3.0.0"), "{msg}");
        assert!(msg.contains("/usr/bin/helm") && msg.contains("--helm-binary") && msg.contains("$HELM_BINARY"), "{msg}");
    }

    #[test]
    fn minimum_and_newer_pass() {
        assert_eq!(check_version(&Fixed("3.0.0"), &MIN_HELM_VERSION, "helm").unwrap(), MIN_HELM_VERSION);
        assert!(check_version(&Fixed("v3.14.2+gc309b6f"), &MIN_HELM_VERSION, "helm").is_ok());
        assert!(check_version(&Fixed("v4.0.0"), &MIN_HELM_VERSION, "helm").is_ok());
    }

    #[test]
    fn prerelease_of_the_minimum_is_too_old() {
        let err = check_version(&Fixed("3.0.0-rc.1"), &MIN_HELM_VERSION, "helm").unwrap_err();
        assert!(matches!(err, ReleaseError::VersionIncompatible { .. }));
    }

    #[test]
    fn version_errors_propagate() {
        assert!(matches!(check_version(&Fixed("three"), &MIN_HELM_VERSION, "helm"), Err(ReleaseError::Parse { .. })));
    }
}
