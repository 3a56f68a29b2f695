//! Integration tests for Hermit

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// A hermit command isolated from the user's config and environment
    fn hermit(home: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("hermit");
        cmd.env("HERMIT_CONFIG", home.join("config.toml"))
            .env_remove("RUST_LOG")
            .env("CI", "1")
            .arg("--no-local");
        cmd
    }

    fn write_sbom(path: &Path, purl: &str) {
        let document = format!(
            r#"{{
  "bomFormat": "CycloneDX",
  "specVersion": "1.4",
  "version": 1,
  "metadata": {{"tools": [{{"vendor": "hermit", "name": "hermit"}}]}},
  "components": [
    {{
      "name": "left-pad",
      "version": "1.3.0",
      "purl": "{}",
      "type": "library",
      "properties": [{{"name": "hermit:found_by", "value": "hermit"}}]
    }}
  ]
}}
"#,
            purl
        );
        std::fs::write(path, document).unwrap();
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        hermit(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("fetch-deps"))
            .stdout(predicate::str::contains("merge-sboms"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        hermit(home.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("hermit"));
    }

    #[test]
    fn unknown_flag_is_usage_error() {
        let home = TempDir::new().unwrap();
        hermit(home.path())
            .args(["fetch-deps", "npm", "--bogus"])
            .assert()
            .code(2);
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        hermit(home.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        hermit(home.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[fetch]"))
            .stdout(predicate::str::contains("concurrency_limit = 5"));
    }

    #[test]
    fn config_with_unknown_key_is_rejected() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("config.toml"), "[fetch]\nparallelism = 3\n").unwrap();
        hermit(home.path())
            .args(["config", "show"])
            .assert()
            .code(4);
    }

    #[test]
    fn completions_generate() {
        let home = TempDir::new().unwrap();
        hermit(home.path())
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hermit"));
    }

    #[test]
    fn unknown_package_manager_is_unsupported() {
        let home = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = source.path().join("out");
        hermit(home.path())
            .arg("fetch-deps")
            .arg("cargo-but-not-really")
            .arg("--source")
            .arg(source.path())
            .arg("--output")
            .arg(&output)
            .assert()
            .code(8)
            .stderr(predicate::str::contains("generic"));
        assert!(!output.join("bom.json").exists());
    }

    #[test]
    fn experimental_manager_needs_flag() {
        let home = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        hermit(home.path())
            .arg("fetch-deps")
            .arg("x-huggingface")
            .arg("--source")
            .arg(source.path())
            .arg("--output")
            .arg(source.path().join("out"))
            .assert()
            .code(8);
    }

    #[test]
    fn malformed_request_is_usage_error() {
        let home = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        hermit(home.path())
            .arg("fetch-deps")
            .arg("{\"type\": ")
            .arg("--source")
            .arg(source.path())
            .assert()
            .code(2);
    }

    #[test]
    fn missing_lockfile_is_reported() {
        let home = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        hermit(home.path())
            .arg("fetch-deps")
            .arg("generic")
            .arg("--source")
            .arg(source.path())
            .arg("--output")
            .arg(source.path().join("out"))
            .assert()
            .code(13)
            .stderr(predicate::str::contains("artifacts.lock.yaml"));
    }

    #[test]
    fn unsupported_lockfile_version_is_reported() {
        let home = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(
            source.path().join("artifacts.lock.yaml"),
            "metadata:\n  version: \"2.0\"\nartifacts: []\n",
        )
        .unwrap();
        hermit(home.path())
            .arg("fetch-deps")
            .arg("generic")
            .arg("--source")
            .arg(source.path())
            .arg("--output")
            .arg(source.path().join("out"))
            .assert()
            .code(22);
    }

    #[test]
    fn empty_generic_lockfile_then_generate_env() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[environment.default_variables]\nBUILD_OFFLINE = \"1\"\n",
        )
        .unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(
            source.path().join("artifacts.lock.yaml"),
            "metadata:\n  version: \"1.0\"\nartifacts: []\n",
        )
        .unwrap();
        let output = source.path().join("out");

        hermit(home.path())
            .arg("fetch-deps")
            .arg("generic")
            .arg("--source")
            .arg(source.path())
            .arg("--output")
            .arg(&output)
            .assert()
            .success();
        assert!(output.join("bom.json").exists());
        assert!(output.join(".build-config.json").exists());

        hermit(home.path())
            .arg("generate-env")
            .arg(&output)
            .assert()
            .success()
            .stdout(predicate::str::contains("export BUILD_OFFLINE=1"));

        hermit(home.path())
            .arg("generate-env")
            .arg(&output)
            .args(["--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"name\": \"BUILD_OFFLINE\""));
    }

    #[test]
    fn generate_env_without_build_config() {
        let home = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        hermit(home.path())
            .arg("generate-env")
            .arg(output.path())
            .assert()
            .code(4);
    }

    #[test]
    fn generate_env_unknown_suffix() {
        let home = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            output.path().join(".build-config.json"),
            r#"{"source_root": "/src", "environment_variables": [], "project_file_edits": []}"#,
        )
        .unwrap();
        hermit(home.path())
            .arg("generate-env")
            .arg(output.path())
            .arg("--output")
            .arg(output.path().join("vars.txt"))
            .assert()
            .code(8);
    }

    #[test]
    fn generate_env_resolves_for_output_dir() {
        let home = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            output.path().join(".build-config.json"),
            r#"{
  "source_root": "/src",
  "environment_variables": [
    {"name": "HF_HOME", "value": "${output_dir}/deps/huggingface", "kind": "path"}
  ],
  "project_file_edits": []
}"#,
        )
        .unwrap();
        hermit(home.path())
            .arg("generate-env")
            .arg(output.path())
            .args(["--for-output-dir", "/tmp/hermit-output"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "export HF_HOME=/tmp/hermit-output/deps/huggingface",
            ));
    }

    #[test]
    fn inject_files_is_idempotent() {
        let home = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            source.path().join("package-lock.json"),
            r#"{"resolved": "https://registry.npmjs.org/a/-/a-1.0.0.tgz"}"#,
        )
        .unwrap();
        let build_config = serde_json_config(source.path());
        std::fs::write(output.path().join(".build-config.json"), build_config).unwrap();

        for _ in 0..2 {
            hermit(home.path())
                .arg("inject-files")
                .arg(output.path())
                .args(["--for-output-dir", "/tmp/out"])
                .assert()
                .success();
        }

        let content = std::fs::read_to_string(source.path().join("package-lock.json")).unwrap();
        assert!(content.contains("file:/tmp/out/deps/npm/a-1.0.0.tgz"));
        assert!(!content.contains("registry.npmjs.org"));
        assert_eq!(content.matches("file:/tmp/out").count(), 1);
    }

    fn serde_json_config(source_root: &Path) -> String {
        format!(
            r#"{{
  "source_root": "{}",
  "environment_variables": [],
  "project_file_edits": [
    {{
      "file_path": "package-lock.json",
      "locator_old_value": "https://registry.npmjs.org/a/-/a-1.0.0.tgz",
      "locator_new_value": "file:${{output_dir}}/deps/npm/a-1.0.0.tgz"
    }}
  ]
}}"#,
            source_root.display()
        )
    }

    #[test]
    fn merge_needs_two_documents() {
        let home = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let sbom = dir.path().join("one.json");
        write_sbom(&sbom, "pkg:npm/left-pad@1.3.0");
        hermit(home.path())
            .arg("merge-sboms")
            .arg(&sbom)
            .assert()
            .code(4);
    }

    #[test]
    fn merge_collapses_identical_components() {
        let home = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        write_sbom(&first, "pkg:npm/left-pad@1.3.0");
        write_sbom(&second, "pkg:npm/left-pad@1.3.0");

        let assert = hermit(home.path())
            .arg("merge-sboms")
            .arg(&first)
            .arg(&second)
            .assert()
            .success();
        let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
        assert_eq!(stdout.matches("pkg:npm/left-pad@1.3.0").count(), 1);
    }

    #[test]
    fn merge_writes_output_file() {
        let home = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        let merged = dir.path().join("merged.json");
        write_sbom(&first, "pkg:npm/left-pad@1.3.0");
        write_sbom(&second, "pkg:npm/right-pad@1.3.0");

        hermit(home.path())
            .arg("merge-sboms")
            .arg(&first)
            .arg(&second)
            .arg("--output")
            .arg(&merged)
            .assert()
            .success();
        let content = std::fs::read_to_string(&merged).unwrap();
        assert!(content.contains("left-pad"));
        assert!(content.contains("right-pad"));
    }
}
