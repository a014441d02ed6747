#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

mod support;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::Value;
use ulid::Ulid;

use support::{add_crashed_run, read_json, scratch_dir, write_fault_injector_output};

fn nemo_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_nemo") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/nemo");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "nemo-cli", "--bin", "nemo"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build nemo binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn nemo_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(nemo_binary_path());
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run nemo command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_report_schema(value: &Value) {
    let schema_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../contracts/report.schema.json");
    let schema = read_json(&schema_path);
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", schema_path.display()));
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {}:\n{}",
            schema_path.display(),
            errors.join("\n")
        );
    }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap_or("")
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(nemo_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["load", "diff", "prototype", "correct", "debug"] {
        assert!(
            stdout.contains(required),
            "help output missing subcommand {required}: {stdout}"
        );
    }
}

#[test]
fn debug_command_writes_schema_valid_report() {
    let root = scratch_dir("nemo-debug");
    let output_dir = write_fault_injector_output(&root, "pb-crash");
    let results = root.join("results");
    let db_path = root.join(format!("nemo-{}.sqlite3", Ulid::new()));

    let output = nemo_output(
        &db_path,
        &[
            "debug",
            "--output",
            path_arg(&output_dir),
            "--results",
            path_arg(&results),
        ],
    );
    assert_success(&output, "debug command");

    let payload = stdout_json(&output);
    assert_report_schema(&payload);
    assert_eq!(payload["contract_version"], Value::String("nemo_report.v1".to_string()));
    assert_eq!(payload["prototype"]["achieved"], Value::Number(1_u64.into()));
    assert_eq!(
        payload["prototype"]["labels"],
        serde_json::json!(["ack(C, 2)", "ack(C, 3)", "post(C, 4)"])
    );
    assert_eq!(
        payload["prototype_export"]["nodes"].as_array().map(Vec::len),
        Some(5)
    );

    assert_eq!(payload["structural"]["available"], Value::Bool(true));
    assert_eq!(
        payload["structural"]["text"][1],
        Value::String("`pre(...) := log(...);` \u{2192} `pre(...) := log(...), ack(...);`".to_string())
    );

    let runs = match payload["runs"].as_array() {
        Some(runs) => runs,
        None => panic!("runs is not an array: {payload}"),
    };
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["run"], Value::Number(1_u64.into()));
    let text: Vec<&str> = match runs[0]["text"].as_array() {
        Some(lines) => lines.iter().filter_map(Value::as_str).collect(),
        None => panic!("run text is not an array"),
    };
    assert_eq!(
        text,
        vec![
            "`[Precondition]` Latest message passing events required: `log` @ `2`",
            "`[Postcondition]` Latest message passing events still missing: `ack` @ `3`",
            "*Suggestion:* `A` needs to know that `C` received `ack(C, 3)`. Add internal acknowledgement: `int_ack_ack_A(A, node, ...)@async :- ack(node, ...)` @ `3`;",
            "*Suggestion:* Augment the conditions under which `log` fires: `log(C, ...)@async :- ``int_ack_ack_A` @ `4`, `EXISTING_DEPENDENCIES`;",
            "*Timing:* Earliest time for safely firing `log`: `4`",
        ]
    );

    let file_report = read_json(&results.join("pb-crash").join("report.json"));
    assert_report_schema(&file_report);
    assert_eq!(file_report["session_id"], payload["session_id"]);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn repeated_debug_sessions_produce_identical_suggestions() {
    let root = scratch_dir("nemo-determinism");
    let output_dir = write_fault_injector_output(&root, "pb-crash");
    let results = root.join("results");
    let db_path = root.join("nemo.sqlite3");
    let args = [
        "debug",
        "--output",
        path_arg(&output_dir),
        "--results",
        path_arg(&results),
    ];

    let first = nemo_output(&db_path, &args);
    let second = nemo_output(&db_path, &args);
    assert_success(&first, "first debug run");
    assert_success(&second, "second debug run");

    let first = stdout_json(&first);
    let second = stdout_json(&second);
    assert_ne!(first["session_id"], second["session_id"]);
    assert_eq!(first["runs"], second["runs"]);
    assert_eq!(first["prototype"], second["prototype"]);
    assert_eq!(first["structural"], second["structural"]);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn stepwise_commands_match_debug_pipeline() {
    let root = scratch_dir("nemo-stepwise");
    let output_dir = write_fault_injector_output(&root, "pb-crash");
    let db_path = root.join("nemo.sqlite3");
    let export_path = root.join("prototype.json");

    let load = nemo_output(&db_path, &["load", "--output", path_arg(&output_dir)]);
    assert_success(&load, "load command");
    let summary = stdout_json(&load);
    assert_eq!(summary["failed_runs"], serde_json::json!([1]));
    assert_eq!(summary["graphs"].as_array().map(Vec::len), Some(4));

    let diff = nemo_output(&db_path, &["diff"]);
    assert_success(&diff, "diff command");
    let diff = stdout_json(&diff);
    assert_eq!(diff["differentials"][0]["run"], Value::Number(2001_u64.into()));
    assert_eq!(diff["differentials"][0]["nodes"], Value::Number(5_u64.into()));

    let prototype = nemo_output(
        &db_path,
        &["prototype", "--export", path_arg(&export_path)],
    );
    assert_success(&prototype, "prototype command");
    let exported = read_json(&export_path);
    assert_eq!(exported["labels"].as_array().map(Vec::len), Some(3));
    assert_eq!(exported["edges"].as_array().map(Vec::len), Some(4));

    let correct = nemo_output(&db_path, &["correct", "--failed", "1"]);
    assert_success(&correct, "correct command");
    let correct = stdout_json(&correct);
    assert_eq!(correct["structural"]["correction"]["post_triggers"], serde_json::json!(["ack"]));
    assert_eq!(correct["runs"][0]["text"].as_array().map(Vec::len), Some(5));

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn debug_reports_only_runs_of_the_loaded_output() {
    let root = scratch_dir("nemo-sessions");
    let earlier = write_fault_injector_output(&root, "pb-earlier");
    add_crashed_run(&earlier, 2);
    let later = write_fault_injector_output(&root, "pb-later");
    let results = root.join("results");
    let db_path = root.join("nemo.sqlite3");

    let first = nemo_output(
        &db_path,
        &["debug", "--output", path_arg(&earlier), "--results", path_arg(&results)],
    );
    assert_success(&first, "debug of the earlier output");
    let first = stdout_json(&first);
    assert_eq!(first["runs"].as_array().map(Vec::len), Some(2));

    let second = nemo_output(
        &db_path,
        &["debug", "--output", path_arg(&later), "--results", path_arg(&results)],
    );
    assert_success(&second, "debug of the later output");
    let second = stdout_json(&second);
    assert_report_schema(&second);
    let runs: Vec<&Value> = match second["runs"].as_array() {
        Some(runs) => runs.iter().map(|run| &run["run"]).collect(),
        None => panic!("runs is not an array: {second}"),
    };
    assert_eq!(runs, vec![&Value::Number(1_u64.into())]);

    let diff = nemo_output(&db_path, &["diff"]);
    assert_success(&diff, "diff after the later debug session");
    let diff = stdout_json(&diff);
    assert_eq!(diff["differentials"].as_array().map(Vec::len), Some(1));

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn missing_output_dir_fails_without_report() {
    let root = scratch_dir("nemo-missing");
    let results = root.join("results");
    let missing = root.join("does-not-exist");
    let db_path = root.join("nemo.sqlite3");

    let output = nemo_output(
        &db_path,
        &[
            "debug",
            "--output",
            path_arg(&missing),
            "--results",
            path_arg(&results),
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("runs.json"), "unexpected stderr: {stderr}");
    assert!(!results.join("does-not-exist").join("report.json").exists());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn invalid_config_is_rejected() {
    let root = scratch_dir("nemo-config");
    let config_path = root.join("config.json");
    if let Err(err) = std::fs::write(
        &config_path,
        r#"{"baseline_run": 0, "diff_mode": "good_minus_failed", "good_minus_failed_offset": 1000, "failed_minus_good_offset": 1000, "resolve_diff_senders": false}"#,
    ) {
        panic!("failed to write config: {err}");
    }

    let output = match Command::new(nemo_binary_path())
        .arg("--db")
        .arg(root.join("nemo.sqlite3"))
        .arg("--config")
        .arg(&config_path)
        .arg("diff")
        .output()
    {
        Ok(output) => output,
        Err(err) => panic!("failed to run nemo: {err}"),
    };
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("offsets MUST differ"), "unexpected stderr: {stderr}");

    let _ = std::fs::remove_dir_all(&root);
}
