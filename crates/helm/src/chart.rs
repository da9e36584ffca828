use std::path::{Path, PathBuf};

use kubetink_core::equality::parse_version;
use semver::Version;
use serde::Deserialize;

use crate::ReleaseError;

pub const CHART_MANIFEST: &str = "Chart.yaml";

/// Chart metadata loaded from a chart directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub name: String,
    pub version: Version,
    /// Free-form; not every application uses semver.
    pub app_version: String,
    pub directory: PathBuf,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "import-values")]
    pub import_values: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    name: String,
    version: String,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    dependencies: Vec<Dependency>,
}

impl Chart {
    /// Read `Chart.yaml` from `dir`. The version must be strict semver; a
    /// leading `v` is the only leniency.
    pub fn load(dir: impl AsRef<Path>) -> Result<Chart, ReleaseError> {
        let dir = dir.as_ref();
        let path = dir.join(CHART_MANIFEST);
        let raw = std::fs::read_to_string(&path).map_err(|source| ReleaseError::Io { path: path.clone(), source })?;
        let manifest: Manifest =
            serde_yaml::from_str(&raw).map_err(|e| ReleaseError::parse(path.display().to_string(), e))?;
        let version = parse_version(&manifest.version)
            .map_err(|e| ReleaseError::parse(format!("chart version {:?}", manifest.version), e))?;
        Ok(Chart {
            name: manifest.name,
            version,
            app_version: manifest.app_version,
            directory: dir.to_path_buf(),
            dependencies: manifest.dependencies,
        })
    }
}
