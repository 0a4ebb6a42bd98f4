//! Integration tests for the command-line interface
//!
//! Tests the `fix`, `inspect` and `providers` commands against a small
//! configuration tree.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const SCHEMA_JSON: &str = r#"{
  "format_version": "1.0",
  "provider_schemas": {
    "registry.terraform.io/hashicorp/widget": {
      "resource_schemas": {
        "widget": {"version": 1, "block": {}}
      },
      "data_source_schemas": {}
    }
  }
}"#;

const MAIN_TF: &str = "resource \"widget\" \"x\" {}\n\nresource \"widget\" \"y\" {\n  id = widget.x.id\n}\n";

/// Helper to create a configuration root plus a schema file beside it
fn setup_test_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("infra")).unwrap();
    fs::write(dir.path().join("infra/main.tf"), MAIN_TF).unwrap();
    fs::write(dir.path().join("schema.json"), SCHEMA_JSON).unwrap();
    dir
}

fn terrafix(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_terrafix"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("TERRAFIX_LOG")
        .output()
        .unwrap()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_help_lists_commands() {
    let output = terrafix(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fix"));
    assert!(stdout.contains("inspect"));
    assert!(stdout.contains("providers"));
}

#[test]
fn test_fix_preview() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");

    let output = terrafix(&[
        "fix",
        path_str(&infra),
        "--provider",
        "widget",
        "--provider-schema",
        path_str(&schema),
        "--attribute",
        "fixed = true",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");

    assert!(stdout.contains("main.tf ==="));
    assert!(stdout.contains("id = \"${widget.x.id}-updated\""));
    assert!(stdout.contains("  fixed = true\n"));
    assert!(stderr.contains("Summary:"));

    // Preview never writes.
    assert_eq!(fs::read_to_string(infra.join("main.tf")).unwrap(), MAIN_TF);
}

#[test]
fn test_fix_to_output_dir() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");
    let out = workspace.path().join("out");

    let output = terrafix(&[
        "fix",
        path_str(&infra),
        "--provider",
        "hashicorp/widget",
        "--provider-schema",
        path_str(&schema),
        "--output",
        path_str(&out),
        "--suffix",
        "-v2",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        fs::read_to_string(out.join("main.tf")).unwrap(),
        "resource \"widget\" \"x\" {}\n\nresource \"widget\" \"y\" {\n  id = \"${widget.x.id}-v2\"\n}\n"
    );
}

#[test]
fn test_fix_diff() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");

    let output = terrafix(&[
        "fix",
        path_str(&infra),
        "--provider",
        "widget",
        "--provider-schema",
        path_str(&schema),
        "--diff",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(original)"));
    assert!(stdout.contains("-  id = widget.x.id"));
    assert!(stdout.contains("+  id = \"${widget.x.id}-updated\""));
}

#[test]
fn test_fix_reads_run_file() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");
    fs::write(
        infra.join("terrafix.toml"),
        format!(
            "provider = \"widget\"\nprovider_schema = {:?}\n\n[fixer]\nkind = \"dummy\"\nsuffix = \"-cfg\"\n",
            path_str(&schema)
        ),
    )
    .unwrap();

    let output = terrafix(&["fix", path_str(&infra)]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"${widget.x.id}-cfg\""));
}

#[test]
fn test_fix_without_provider_fails() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");

    let output = terrafix(&["fix", path_str(&infra), "--provider-schema", path_str(&schema)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no provider given"));
}

#[test]
fn test_fix_unknown_provider_suggests() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");

    let output = terrafix(&[
        "fix",
        path_str(&infra),
        "--provider",
        "widgets",
        "--provider-schema",
        path_str(&schema),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("did you mean"));
}

#[test]
fn test_inspect() {
    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");

    let output = terrafix(&["inspect", path_str(&infra), "--provider-schema", path_str(&schema)]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Module"));
    assert!(stdout.contains("resource widget registry.terraform.io/hashicorp/widget"));
    assert!(stdout.contains("local main.tf:"));
    assert!(stdout.contains("-> widget.x (resource)"));
    assert!(stdout.contains("widget.y.id (attribute)"));
}

#[test]
fn test_providers() {
    let workspace = setup_test_workspace();
    let schema = workspace.path().join("schema.json");

    let output = terrafix(&["providers", "--provider-schema", path_str(&schema)]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("registry.terraform.io/hashicorp/widget (1 resources, 0 data sources)"));
}

#[cfg(unix)]
#[test]
fn test_interrupt_cancels_fix() {
    use std::process::Stdio;
    use std::thread;
    use std::time::{Duration, Instant};

    let workspace = setup_test_workspace();
    let infra = workspace.path().join("infra");
    let schema = workspace.path().join("schema.json");
    let out = workspace.path().join("out");

    let started = Instant::now();
    let child = Command::new(env!("CARGO_BIN_EXE_terrafix"))
        .args([
            "fix",
            path_str(&infra),
            "--provider",
            "widget",
            "--provider-schema",
            path_str(&schema),
            "--output",
            path_str(&out),
            "--fixer-command",
            "sh",
            "--fixer-arg=-c",
            "--fixer-arg=sleep 10",
        ])
        .env("NO_COLOR", "1")
        .env_remove("TERRAFIX_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    thread::sleep(Duration::from_millis(500));
    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let output = child.wait_with_output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("cancelled"), "stderr: {stderr}");
    assert!(started.elapsed() < Duration::from_secs(8));
    assert!(!out.exists());
}
