//! Integration tests for commands that need no cluster

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn rudder(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rudder"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("RUDDER_DRIVER")
        .output()
        .expect("failed to execute rudder")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn create_chart(templates: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(
        root.join("Chart.yaml"),
        "apiVersion: rudder/v1\nkind: application\nmetadata:\n  name: web\n  version: 1.2.0\n",
    )
    .unwrap();
    fs::write(root.join("values.yaml"), "replicas: 2\nimage:\n  tag: stable\n").unwrap();
    fs::create_dir(root.join("templates")).unwrap();
    for (name, content) in templates {
        fs::write(root.join("templates").join(name), content).unwrap();
    }
    dir
}

const CONFIGMAP: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ release.name }}-config
data:
  replicas: "{{ values.replicas }}"
  tag: {{ values.image.tag }}
"#;

const HOOK: &str = r#"apiVersion: batch/v1
kind: Job
metadata:
  name: {{ release.name }}-migrate
  annotations:
    rudder.io/hook: pre-install
"#;

fn path(dir: &TempDir) -> &str {
    dir.path().to_str().unwrap()
}

mod template_command {
    use super::*;

    #[test]
    fn test_renders_with_source_comments() {
        let chart = create_chart(&[("cm.yaml", CONFIGMAP)]);
        let output = rudder(&["template", "demo", path(&chart)]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let out = stdout(&output);
        assert!(out.contains("# Source: web/templates/cm.yaml"));
        assert!(out.contains("name: demo-config"));
        assert!(out.contains("replicas: \"2\""));
    }

    #[test]
    fn test_set_overrides_values_file() {
        let chart = create_chart(&[("cm.yaml", CONFIGMAP)]);
        let values = chart.path().join("prod.yaml");
        fs::write(&values, "image:\n  tag: prod\nreplicas: 5\n").unwrap();

        let output = rudder(&[
            "template",
            "demo",
            path(&chart),
            "-f",
            values.to_str().unwrap(),
            "--set",
            "replicas=7",
        ]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let out = stdout(&output);
        assert!(out.contains("tag: prod"));
        assert!(out.contains("replicas: \"7\""));
    }

    #[test]
    fn test_skip_hooks() {
        let chart = create_chart(&[("cm.yaml", CONFIGMAP), ("job.yaml", HOOK)]);

        let with_hooks = stdout(&rudder(&["template", "demo", path(&chart)]));
        assert!(with_hooks.contains("demo-migrate"));

        let without = stdout(&rudder(&["template", "demo", path(&chart), "--skip-hooks"]));
        assert!(!without.contains("demo-migrate"));
        assert!(without.contains("demo-config"));
    }

    #[test]
    fn test_output_dir() {
        let chart = create_chart(&[("cm.yaml", CONFIGMAP)]);
        let out = TempDir::new().unwrap();

        let output = rudder(&["template", "demo", path(&chart), "--output-dir", path(&out)]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let written = fs::read_to_string(out.path().join("web/templates/cm.yaml")).unwrap();
        assert!(written.contains("demo-config"));
    }

    #[test]
    fn test_undefined_value_is_a_template_error() {
        let chart = create_chart(&[("cm.yaml", "name: {{ values.nope.deeper }}\n")]);
        let output = rudder(&["template", "demo", path(&chart)]);

        assert_eq!(output.status.code(), Some(3));
        assert!(stderr(&output).contains("cm.yaml"));
    }

    #[test]
    fn test_missing_chart_is_a_chart_error() {
        let dir = TempDir::new().unwrap();
        let output = rudder(&["template", "demo", &format!("{}/absent", path(&dir))]);
        assert_eq!(output.status.code(), Some(4));
    }

    #[test]
    fn test_malformed_set_is_a_validation_error() {
        let chart = create_chart(&[("cm.yaml", CONFIGMAP)]);
        let output = rudder(&["template", "demo", path(&chart), "--set", "novalue"]);
        assert_eq!(output.status.code(), Some(2));
    }
}

mod release_queries {
    use super::*;

    fn file_store(dir: &Path, args: &[&str]) -> Output {
        let storage = dir.to_str().unwrap();
        let mut full = vec!["--driver", "file", "--storage-dir", storage];
        full.extend_from_slice(args);
        rudder(&full)
    }

    #[test]
    fn test_list_empty_store() {
        let dir = TempDir::new().unwrap();
        let output = file_store(dir.path(), &["list"]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("No releases found"));
    }

    #[test]
    fn test_list_json_is_an_array() {
        let dir = TempDir::new().unwrap();
        let output = file_store(dir.path(), &["list", "--json", "-A"]);

        let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(json, serde_json::json!([]));
    }

    #[test]
    fn test_unknown_release_exits_not_found() {
        let dir = TempDir::new().unwrap();
        for cmd in ["history", "status", "get-values"] {
            let output = file_store(dir.path(), &[cmd, "ghost"]);
            assert_eq!(output.status.code(), Some(6), "{} exit code", cmd);
            assert!(stderr(&output).contains("ghost"));
        }
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let output = rudder(&["--driver", "etcd", "list"]);
        assert!(!output.status.success());
    }
}

mod repo_command {
    use super::*;

    #[test]
    fn test_add_list_remove() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("repositories.yaml");
        let config = config.to_str().unwrap();

        let add = rudder(&["repo", "--repository-config", config, "add", "stable", "https://charts.example.com"]);
        assert!(add.status.success(), "stderr: {}", stderr(&add));

        let list = rudder(&["repo", "--repository-config", config, "list"]);
        assert!(stdout(&list).contains("https://charts.example.com"));

        let duplicate = rudder(&["repo", "--repository-config", config, "add", "stable", "https://other.example.com"]);
        assert!(!duplicate.status.success());

        let remove = rudder(&["repo", "--repository-config", config, "remove", "stable"]);
        assert!(remove.status.success());
        assert!(stdout(&rudder(&["repo", "--repository-config", config, "list"])).contains("No repositories configured"));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("repositories.yaml");

        let output = rudder(&["repo", "--repository-config", config.to_str().unwrap(), "add", "local", "ftp://example.com"]);
        assert!(!output.status.success());
        assert!(!config.exists());
    }
}
