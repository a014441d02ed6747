#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use ulid::Ulid;

pub fn scratch_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", Ulid::new()));
    if let Err(err) = fs::create_dir_all(&dir) {
        panic!("failed to create {}: {err}", dir.display());
    }
    dir
}

fn write_json(path: &Path, value: &Value) {
    if let Err(err) = fs::write(path, value.to_string()) {
        panic!("failed to write {}: {err}", path.display());
    }
}

fn shared_pre() -> Value {
    json!({
        "goals": [
            {"id": "g-pre", "label": "pre(C, 3)", "table": "pre", "time": "3", "condition_holds": true},
            {"id": "g-log", "label": "log(C, 2)", "table": "log", "time": "2", "condition_holds": true},
            {"id": "g-log-old", "label": "log(C, 1)", "table": "log", "time": "1", "condition_holds": false}
        ],
        "rules": [
            {"id": "r-pre", "label": "pre_prov1", "table": "pre", "type": "sync"},
            {"id": "r-log", "label": "log_prov2", "table": "log", "type": "async"}
        ],
        "edges": [
            {"from": "g-pre", "to": "r-pre"},
            {"from": "r-pre", "to": "g-log"},
            {"from": "g-log", "to": "r-log"},
            {"from": "r-log", "to": "g-log-old"}
        ]
    })
}

/// Writes a two-run fault-injector output: run 0 succeeds, run 1 lost the
/// acknowledgement that run 0 relied on.
pub fn write_fault_injector_output(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    if let Err(err) = fs::create_dir_all(&dir) {
        panic!("failed to create {}: {err}", dir.display());
    }

    write_json(
        &dir.join("runs.json"),
        &json!([
            {
                "iteration": 0,
                "status": "success",
                "messages": [
                    {"table": "log", "from": "A", "to": "C", "sendTime": 1, "receiveTime": 2},
                    {"table": "ack", "from": "B", "to": "C", "sendTime": 2, "receiveTime": 3}
                ]
            },
            {
                "iteration": 1,
                "status": "fail",
                "failureSpec": {"crashes": [{"node": "B", "time": 2}]},
                "messages": [
                    {"table": "log", "from": "A", "to": "C", "sendTime": 1, "receiveTime": 2}
                ]
            }
        ]),
    );

    write_json(&dir.join("run_0_pre_provenance.json"), &shared_pre());
    write_json(&dir.join("run_1_pre_provenance.json"), &shared_pre());

    write_json(
        &dir.join("run_0_post_provenance.json"),
        &json!({
            "goals": [
                {"id": "g-post", "label": "post(C, 4)", "table": "post", "time": "4", "condition_holds": true},
                {"id": "g-ack", "label": "ack(C, 3)", "table": "ack", "time": "3", "condition_holds": true},
                {"id": "g-ack-old", "label": "ack(C, 2)", "table": "ack", "time": "2", "condition_holds": false}
            ],
            "rules": [
                {"id": "r-post", "label": "post_prov3", "table": "post", "type": "sync"},
                {"id": "r-ack", "label": "ack_prov4", "table": "ack", "type": "async"}
            ],
            "edges": [
                {"from": "g-post", "to": "r-post"},
                {"from": "r-post", "to": "g-ack"},
                {"from": "g-ack", "to": "r-ack"},
                {"from": "r-ack", "to": "g-ack-old"}
            ]
        }),
    );
    write_json(
        &dir.join("run_1_post_provenance.json"),
        &json!({
            "goals": [
                {"id": "f-crash", "label": "crash(B, 2)", "table": "crash", "time": "2", "condition_holds": false}
            ]
        }),
    );

    dir
}

/// Appends a failed run that crashed before any message was delivered.
pub fn add_crashed_run(dir: &Path, iteration: u32) {
    let runs_path = dir.join("runs.json");
    let mut runs = read_json(&runs_path);
    match runs.as_array_mut() {
        Some(entries) => entries.push(json!({
            "iteration": iteration,
            "status": "fail",
            "failureSpec": {"crashes": [{"node": "C", "time": 1}]},
            "messages": []
        })),
        None => panic!("{} is not an array", runs_path.display()),
    }
    write_json(&runs_path, &runs);

    write_json(&dir.join(format!("run_{iteration}_pre_provenance.json")), &shared_pre());
    write_json(
        &dir.join(format!("run_{iteration}_post_provenance.json")),
        &json!({
            "goals": [
                {"id": "f-crash", "label": "crash(C, 1)", "table": "crash", "time": "1", "condition_holds": false}
            ]
        }),
    );
}

pub fn read_json(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()))
}
