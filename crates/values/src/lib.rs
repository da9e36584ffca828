//! kubetink values: an ordered YAML tree addressed by [`Path`].
//!
//! A [`ValuesDocument`] is what a release is installed with. Paths walk maps by
//! key and sequences by index; `set` grows the tree as needed, `get` and
//! `delete` never do. Key order survives a load/save round trip.

#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_yaml::Mapping;

pub use serde_yaml::Value;

#[derive(Debug, thiserror::Error)]
pub enum ValuesError {
    #[error("{path} is a {found}, not a {wanted}")]
    NotAContainer { path: Path, found: &'static str, wanted: &'static str },
    #[error("cannot delete the document root")]
    RootPath,
    #[error("{path}: index {index} is too far past the end of a sequence of {len}")]
    IndexOutOfRange { path: Path, index: usize, len: usize },
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl From<&str> for Step {
    fn from(key: &str) -> Self {
        Step::Key(key.to_string())
    }
}

impl From<String> for Step {
    fn from(key: String) -> Self {
        Step::Key(key)
    }
}

impl From<usize> for Step {
    fn from(index: usize) -> Self {
        Step::Index(index)
    }
}

/// How far `set` may write past the end of a sequence; the gap is null-padded.
pub const MAX_INDEX_GAP: usize = 1024;

/// Location inside a document; the empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<Step>);

/// Build a [`Path`] from keys and indices: `path!["images", 0, "tag"]`.
#[macro_export]
macro_rules! path {
    ($($step:expr),* $(,)?) => {
        $crate::Path::new(vec![$($crate::Step::from($step)),*])
    };
}

impl Path {
    pub fn new(steps: Vec<Step>) -> Self {
        Self(steps)
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn join(&self, step: impl Into<Step>) -> Self {
        let mut steps = self.0.clone();
        steps.push(step.into());
        Self(steps)
    }

    /// Everything but the last step; `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        self.0.split_last().map(|(_, rest)| Path(rest.to_vec()))
    }

    pub fn last(&self) -> Option<&Step> {
        self.0.last()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match step {
                Step::Key(k) => f.write_str(k)?,
                Step::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

/// Parses the dotted form printed by `Display` (`a.b.[0]`); `a.b[0]` is accepted too.
impl FromStr for Path {
    type Err = ValuesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValuesError::InvalidPath(s.to_string());
        let mut steps = Vec::new();
        if s.is_empty() {
            return Ok(Path::root());
        }
        for segment in s.split('.') {
            let (key, mut rest) = match segment.find('[') {
                Some(at) => segment.split_at(at),
                None => (segment, ""),
            };
            if !key.is_empty() {
                steps.push(Step::Key(key.to_string()));
            } else if rest.is_empty() {
                return Err(invalid());
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                let index = rest[1..close].parse::<usize>().map_err(|_| invalid())?;
                steps.push(Step::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid());
                }
            }
        }
        Ok(Path(steps))
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Ordered YAML tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesDocument {
    root: Value,
}

impl Default for ValuesDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuesDocument {
    /// Empty mapping.
    pub fn new() -> Self {
        Self { root: Value::Mapping(Mapping::new()) }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Parse a YAML document. An empty input is an empty mapping.
    pub fn parse(yaml: &str) -> Result<Self, ValuesError> {
        let root: Value = serde_yaml::from_str(yaml)?;
        Ok(match root {
            Value::Null => Self::new(),
            root => Self { root },
        })
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ValuesError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ValuesError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&raw)
    }

    pub fn to_yaml(&self) -> Result<String, ValuesError> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), ValuesError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml()?).map_err(|source| ValuesError::Io { path: path.to_path_buf(), source })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        path.steps().iter().try_fold(&self.root, |node, step| match (step, node) {
            (Step::Key(k), Value::Mapping(m)) => m.get(k.as_str()),
            (Step::Index(i), Value::Sequence(s)) => s.get(*i),
            _ => None,
        })
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut node = &mut self.root;
        for step in path.steps() {
            node = match (step, node) {
                (Step::Key(k), Value::Mapping(m)) => m.get_mut(k.as_str())?,
                (Step::Index(i), Value::Sequence(s)) => s.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(node)
    }

    pub fn get_str(&self, path: &Path) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Write `value` at `path`, creating maps for key steps and null-padded
    /// sequences for index steps. An existing scalar (or a container of the
    /// wrong kind) on the way is an error and leaves the document untouched, as
    /// is an index more than [`MAX_INDEX_GAP`] past the end of its sequence.
    pub fn set(&mut self, path: &Path, value: impl Into<Value>) -> Result<(), ValuesError> {
        self.check_indices(path)?;
        let mut node = &mut self.root;
        for (depth, step) in path.steps().iter().enumerate() {
            let found = type_name(node);
            let at = || Path(path.steps()[..depth].to_vec());
            node = match step {
                Step::Key(k) => {
                    if node.is_null() {
                        *node = Value::Mapping(Mapping::new());
                    }
                    let Value::Mapping(map) = node else {
                        return Err(ValuesError::NotAContainer { path: at(), found, wanted: "mapping" });
                    };
                    map.entry(Value::String(k.clone())).or_insert(Value::Null)
                }
                Step::Index(i) => {
                    if node.is_null() {
                        *node = Value::Sequence(Vec::new());
                    }
                    let Value::Sequence(seq) = node else {
                        return Err(ValuesError::NotAContainer { path: at(), found, wanted: "sequence" });
                    };
                    if seq.len() <= *i {
                        let len = i.checked_add(1).ok_or_else(|| ValuesError::IndexOutOfRange {
                            path: Path(path.steps()[..=depth].to_vec()),
                            index: *i,
                            len: seq.len(),
                        })?;
                        seq.resize(len, Value::Null);
                    }
                    &mut seq[*i]
                }
            };
        }
        *node = value.into();
        Ok(())
    }

    /// Read-only pass over the index steps of `path`. Steps below a missing
    /// node count as writes into an empty sequence.
    fn check_indices(&self, path: &Path) -> Result<(), ValuesError> {
        let mut node = Some(&self.root);
        for (depth, step) in path.steps().iter().enumerate() {
            if let Step::Index(i) = step {
                let len = node.and_then(Value::as_sequence).map_or(0, Vec::len);
                if *i > len.saturating_add(MAX_INDEX_GAP) {
                    return Err(ValuesError::IndexOutOfRange {
                        path: Path(path.steps()[..=depth].to_vec()),
                        index: *i,
                        len,
                    });
                }
            }
            node = node.and_then(|n| match (step, n) {
                (Step::Key(k), Value::Mapping(m)) => m.get(k.as_str()),
                (Step::Index(i), Value::Sequence(s)) => s.get(*i),
                _ => None,
            });
        }
        Ok(())
    }

    /// Remove the value at `path`. Returns whether anything was removed; only
    /// the root path is an error.
    pub fn delete(&mut self, path: &Path) -> Result<bool, ValuesError> {
        let (Some(last), Some(parent)) = (path.last(), path.parent()) else {
            return Err(ValuesError::RootPath);
        };
        let Some(node) = self.get_mut(&parent) else {
            return Ok(false);
        };
        Ok(match (last, node) {
            (Step::Key(k), Value::Mapping(m)) => m.shift_remove(k.as_str()).is_some(),
            (Step::Index(i), Value::Sequence(s)) if *i < s.len() => {
                s.remove(*i);
                true
            }
            _ => false,
        })
    }
}

impl FromStr for ValuesDocument {
    type Err = ValuesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_builds_maps_and_sequences() {
        let mut doc = ValuesDocument::new();
        doc.set(&path!["a", "b", 0usize], "x").unwrap();
        let a = doc.get(&path!["a"]).unwrap();
        assert!(a.is_mapping());
        let b = doc.get(&path!["a", "b"]).unwrap();
        assert_eq!(b.as_sequence().unwrap().len(), 1);
        assert_eq!(doc.get_str(&path!["a", "b", 0usize]), Some("x"));
    }

    #[test]
    fn set_through_a_scalar_fails() {
        let mut doc = ValuesDocument::new();
        doc.set(&path!["a"], "scalar").unwrap();
        let before = doc.clone();
        let err = doc.set(&path!["a", "b"], "x").unwrap_err();
        match err {
            ValuesError::NotAContainer { path, found, wanted } => {
                assert_eq!(path, path!["a"]);
                assert_eq!(found, "string");
                assert_eq!(wanted, "mapping");
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(doc, before);
    }

    #[test]
    fn set_index_into_mapping_fails() {
        let mut doc = ValuesDocument::parse("a:\n  b: 1\n").unwrap();
        assert!(matches!(doc.set(&path!["a", 0usize], 1), Err(ValuesError::NotAContainer { .. })));
    }

    #[test]
    fn sequences_are_null_padded() {
        let mut doc = ValuesDocument::new();
        doc.set(&path!["list", 2usize], 7).unwrap();
        let seq = doc.get(&path!["list"]).unwrap().as_sequence().unwrap();
        assert_eq!(seq.len(), 3);
        assert!(seq[0].is_null() && seq[1].is_null());
        assert_eq!(seq[2].as_i64(), Some(7));
    }

    #[test]
    fn huge_indices_are_rejected_without_touching_the_document() {
        let mut doc = ValuesDocument::parse("a: [1]\n").unwrap();
        let before = doc.clone();
        for raw in ["a[18446744073709551615]", "b.c[99999999999]", "a[0].x[2000]"] {
            let p: Path = raw.parse().unwrap();
            let err = doc.set(&p, 1).unwrap_err();
            assert!(matches!(err, ValuesError::IndexOutOfRange { .. }), "{raw}: {err}");
            assert_eq!(doc, before);
        }
        doc.set(&path!["a", 1 + MAX_INDEX_GAP], 2).unwrap();
        assert_eq!(doc.get(&path!["a"]).unwrap().as_sequence().unwrap().len(), 2 + MAX_INDEX_GAP);
    }

    #[test]
    fn setting_the_root_replaces_the_document() {
        let mut doc = ValuesDocument::parse("a: 1").unwrap();
        doc.set(&Path::root(), Value::Sequence(vec![])).unwrap();
        assert!(doc.root().is_sequence());
    }

    #[test]
    fn delete_semantics() {
        let mut doc = ValuesDocument::parse("a:\n  b: 1\n  c: [1, 2, 3]\n").unwrap();
        assert!(matches!(doc.delete(&Path::root()), Err(ValuesError::RootPath)));
        assert!(!doc.delete(&path!["missing", "deep"]).unwrap());
        assert!(!doc.delete(&path!["a", "c", 9usize]).unwrap());
        assert!(!doc.delete(&path!["a", "b", "x"]).unwrap());
        assert!(doc.delete(&path!["a", "c", 0usize]).unwrap());
        assert_eq!(doc.get(&path!["a", "c", 0usize]).and_then(Value::as_i64), Some(2));
        assert!(doc.delete(&path!["a", "b"]).unwrap());
        assert!(!doc.contains(&path!["a", "b"]));
    }

    #[test]
    fn key_order_survives_round_trip() {
        let src = "zeta: 1\nalpha: 2\nmid:\n  port: 80\n  bind: false\n";
        let mut doc = ValuesDocument::parse(src).unwrap();
        assert_eq!(doc.to_yaml().unwrap(), src);
        doc.delete(&path!["alpha"]).unwrap();
        doc.set(&path!["alpha"], 3).unwrap();
        assert_eq!(doc.to_yaml().unwrap(), "zeta: 1\nmid:\n  port: 80\n  bind: false\nalpha: 3\n");
    }

    #[test]
    fn empty_input_is_an_empty_mapping() {
        let doc = ValuesDocument::parse("").unwrap();
        assert_eq!(doc, ValuesDocument::new());
    }

    #[test]
    fn path_display_and_parse() {
        let p = path!["images", 0usize, "tag"];
        assert_eq!(p.to_string(), "images.[0].tag");
        assert_eq!("images.[0].tag".parse::<Path>().unwrap(), p);
        assert_eq!("images[0].tag".parse::<Path>().unwrap(), p);
        assert_eq!("m[1][2]".parse::<Path>().unwrap(), path!["m", 1usize, 2usize]);
        assert!("".parse::<Path>().unwrap().is_root());
        assert!("a..b".parse::<Path>().is_err());
        assert!("a[x]".parse::<Path>().is_err());
        assert!("a[1]b".parse::<Path>().is_err());
    }

    #[test]
    fn parent_and_join() {
        let p = path!["a", "b"];
        assert_eq!(p.parent(), Some(path!["a"]));
        assert_eq!(path!["a"].parent(), Some(Path::root()));
        assert_eq!(Path::root().parent(), None);
        assert_eq!(path!["a"].join("b"), p);
    }

    #[test]
    fn load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("values.yaml");
        let mut doc = ValuesDocument::new();
        doc.set(&path!["tink", "server", "enableTLS"], true).unwrap();
        doc.save(&file).unwrap();
        let back = ValuesDocument::load(&file).unwrap();
        assert_eq!(back, doc);
        assert!(matches!(ValuesDocument::load(dir.path().join("nope.yaml")), Err(ValuesError::Io { .. })));
    }
}
