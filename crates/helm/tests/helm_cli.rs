use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use kubetink_helm::{
    check_version, CommandOutput, CommandRunner, HelmCli, ReleaseClient, ReleaseError, ReleaseStatus, MIN_HELM_VERSION,
};
use kubetink_values::path;
use semver::Version;

/// Replays canned outputs in order and records every invocation.
#[derive(Default)]
struct ScriptedRunner {
    outputs: RefCell<VecDeque<CommandOutput>>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    fn ok(self, stdout: &str) -> Self {
        self.outputs.borrow_mut().push_back(CommandOutput { success: true, stdout: stdout.into(), stderr: vec![] });
        self
    }

    fn fail(self, stderr: &str) -> Self {
        self.outputs.borrow_mut().push_back(CommandOutput { success: false, stdout: vec![], stderr: stderr.into() });
        self
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        assert_eq!(program, "helm3");
        self.calls.borrow_mut().push(args.to_vec());
        Ok(self.outputs.borrow_mut().pop_front().unwrap_or_default())
    }
}

fn helm(runner: ScriptedRunner) -> HelmCli<ScriptedRunner> {
    HelmCli::with_runner("helm3", runner).kubeconfig("/tmp/kubeconfig").context(Some("lab".into()))
}

const LIST: &str = r#"[
  {"name":"tinkerbell","namespace":"tink-system","revision":"3","updated":"2024-05-01 10:00:00.0 +0000 UTC",
   "status":"deployed","chart":"tinkerbell-0.2.1","app_version":"0.2.1"},
  {"name":"old","namespace":"tink-system","revision":"1","status":"failed","chart":"tink-stack-0.4.0-rc.1","app_version":"2024.01"}
]"#;

#[test]
fn version_is_parsed_from_short_output() {
    let h = helm(ScriptedRunner::default().ok("v3.14.2+gc309b6f\n"));
    assert_eq!(h.version().unwrap(), Version::parse("3.14.2+gc309b6f").unwrap());
    assert_eq!(h.runner().calls()[0], ["--kubeconfig", "/tmp/kubeconfig", "--kube-context", "lab", "version", "--client", "--short"]);
}

#[test]
fn gate_rejects_helm_2() {
    let h = helm(ScriptedRunner::default().ok("Client: v2.17.0+ga690bad\n"));
    let err = check_version(&h, &MIN_HELM_VERSION, h.binary()).unwrap_err();
    match err {
        ReleaseError::VersionIncompatible { detected, minimum, binary } => {
            assert_eq!(detected.major, 2);
            assert_eq!(minimum, MIN_HELM_VERSION);
            assert_eq!(binary, "helm3");
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn unparseable_version_output_is_a_parse_error() {
    let h = helm(ScriptedRunner::default().ok("Server: v2.17.0\n"));
    assert!(matches!(check_version(&h, &MIN_HELM_VERSION, h.binary()), Err(ReleaseError::Parse { .. })));
}

#[test]
fn list_decodes_releases() {
    let h = helm(ScriptedRunner::default().ok(LIST));
    let releases = h.list_releases("tink-system").unwrap();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[0].status, ReleaseStatus::Deployed);
    assert_eq!(releases[0].version, Some(Version::new(0, 2, 1)));
    assert_eq!(releases[0].revision, "3");
    assert_eq!(releases[1].status, ReleaseStatus::Failed);
    assert_eq!(releases[1].version, Version::parse("0.4.0-rc.1").ok());
    let args = &h.runner().calls()[0];
    assert!(args.ends_with(&["list", "--namespace", "tink-system", "--all", "--output", "json"].map(String::from)));
}

#[test]
fn get_release_finds_by_name() {
    let h = helm(ScriptedRunner::default().ok(LIST).ok(LIST));
    assert_eq!(h.get_release("tink-system", "old").unwrap().unwrap().chart, "tink-stack-0.4.0-rc.1");
    assert!(h.get_release("tink-system", "absent").unwrap().is_none());
}

#[test]
fn garbage_list_output_is_a_decode_error() {
    let h = helm(ScriptedRunner::default().ok("not json"));
    assert!(matches!(h.list_releases("x"), Err(ReleaseError::Decode { .. })));
}

#[test]
fn install_passes_values_timeout_and_flags() {
    let h = helm(ScriptedRunner::default().ok("")).timeout(std::time::Duration::from_secs(90));
    let values = BTreeMap::from([("smee.enabled".to_string(), "true".to_string())]);
    h.install_chart(
        "tink-system",
        "tinkerbell",
        Path::new("charts/tinkerbell"),
        Some(Path::new("values.yaml")),
        &values,
        &["--atomic".to_string()],
    )
    .unwrap();
    let args = &h.runner().calls()[0];
    let tail: Vec<&str> = args[4..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        [
            "upgrade",
            "--install",
            "--namespace",
            "tink-system",
            "--create-namespace",
            "--timeout",
            "90s",
            "--values",
            "values.yaml",
            "--set",
            "smee.enabled=true",
            "--atomic",
            "tinkerbell",
            "charts/tinkerbell",
        ]
    );
}

#[test]
fn failures_carry_stderr() {
    let h = helm(ScriptedRunner::default().fail("Error: uninstall: Release not loaded: x: release: not found\n"));
    match h.uninstall_release("tink-system", "x").unwrap_err() {
        ReleaseError::Command { command, message } => {
            assert!(command.starts_with("helm3 --kubeconfig"));
            assert!(message.ends_with("release: not found"));
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn render_returns_raw_manifests() {
    let manifests = "---\napiVersion: v1\nkind: ServiceAccount\n";
    let h = helm(ScriptedRunner::default().ok(manifests));
    let out = h.render_chart("tink-system", "tinkerbell", Path::new("charts/tinkerbell"), None, &BTreeMap::new()).unwrap();
    assert_eq!(out, manifests.as_bytes());
    assert!(!h.runner().calls()[0].contains(&"--values".to_string()));
}

#[test]
fn get_values_yields_a_document() {
    let h = helm(ScriptedRunner::default().ok("smee:\n  image:\n    tag: v0.9.0\n").ok("null\n"));
    let doc = h.get_values("tink-system", "tinkerbell").unwrap();
    assert_eq!(doc.get_str(&path!["smee", "image", "tag"]), Some("v0.9.0"));
    assert!(h.get_values("tink-system", "bare").unwrap().root().as_mapping().unwrap().is_empty());
}

#[test]
fn dependency_build_appends_the_directory() {
    let h = helm(ScriptedRunner::default().ok(""));
    h.build_chart_dependencies(Path::new("charts/tinkerbell"), &["--skip-refresh".to_string()]).unwrap();
    let args = &h.runner().calls()[0];
    assert_eq!(args[4..], ["dependency", "build", "--skip-refresh", "charts/tinkerbell"].map(String::from));
}
