use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::tempdir;

#[allow(deprecated)]
fn cycle_kb(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cycle-kb").expect("binary");
    cmd.env("CYCLE_EMBEDDING_MODE", "sparse")
        .env_remove("CYCLE_INDEX_BACKEND")
        .env_remove("CYCLE_EMBEDDING_MODEL")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    let output = cycle_kb(data_dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

fn lorem(words: usize) -> String {
    ["pipette", "buffer", "incubate", "plate", "reader", "absorbance"]
        .iter()
        .cycle()
        .take(words)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn create_add_build_query_flow() {
    let temp = tempdir().unwrap();
    let data = temp.path();

    run_json(data, &["create", "c1", "--title", "Cycle 1"]);

    let notes = data.join("notes.txt");
    std::fs::write(&notes, lorem(600)).unwrap();
    let added = run_json(
        data,
        &[
            "add",
            "c1",
            "--id",
            "d1",
            "--title",
            "Day 1",
            "--meta",
            "temp=37",
            "--file",
            notes.to_str().unwrap(),
        ],
    );
    assert_eq!(added["document_id"], "d1");

    let shown = run_json(data, &["show", "c1"]);
    assert_eq!(shown["cycle_id"], "c1");
    assert_eq!(shown["title"], "Cycle 1");
    assert_eq!(shown["knowledge_base"]["document_count"], 1);
    assert_eq!(shown["knowledge_base"]["indexed"], false);
    assert_eq!(shown["documents"][0]["user_metadata"]["temp"], 37);

    let built = run_json(data, &["build", "c1"]);
    assert_eq!(built["status"], "built");
    assert_eq!(built["chunks"], 2);
    assert_eq!(built["embedding"], "sparse");

    let results = run_json(data, &["query", "c1", "plate reader absorbance", "-n", "1"]);
    let hits = results["results"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["chunk"]["document_id"], "d1");
    assert_eq!(hits[0]["chunk"]["title"], "Day 1");

    let listed = run_json(data, &["list"]);
    assert_eq!(listed[0]["id"], "c1");
    assert_eq!(listed[0]["indexed"], true);
}

#[test]
fn add_reads_text_from_stdin() {
    let temp = tempdir().unwrap();
    let data = temp.path();
    run_json(data, &["create", "c1"]);

    cycle_kb(data)
        .args(["add", "c1", "--id", "piped"])
        .write_stdin(lorem(80))
        .assert()
        .success()
        .stdout("piped\n");

    let shown = run_json(data, &["show", "c1"]);
    assert_eq!(shown["documents"][0]["id"], "piped");
    assert_eq!(shown["documents"][0]["title"], "Document piped");
}

#[test]
fn context_prints_banner_or_nothing() {
    let temp = tempdir().unwrap();
    let data = temp.path();
    run_json(data, &["create", "c1"]);

    cycle_kb(data)
        .args(["context", "c1", "pipette"])
        .assert()
        .success()
        .stdout("");

    cycle_kb(data)
        .args(["add", "c1", "--id", "d1", "--title", "Plate run"])
        .write_stdin(lorem(120))
        .assert()
        .success();
    cycle_kb(data).args(["build", "c1"]).assert().success();

    cycle_kb(data)
        .args(["context", "c1", "pipette buffer"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "RELEVANT CONTEXT FROM PREVIOUS LAB SESSIONS:\n\n--- From: Plate run ---\n",
        ));
}

#[test]
fn build_without_documents_is_a_noop() {
    let temp = tempdir().unwrap();
    let data = temp.path();
    run_json(data, &["create", "c1"]);

    let built = run_json(data, &["build", "c1"]);
    assert_eq!(built["status"], "nothing_to_index");
    let shown = run_json(data, &["show", "c1"]);
    assert_eq!(shown["knowledge_base"]["indexed"], false);
}

#[test]
fn sessions_are_recorded_with_info() {
    let temp = tempdir().unwrap();
    let data = temp.path();
    run_json(data, &["create", "c1"]);

    let first = run_json(data, &["session", "c1", "s1", "--info", "operator=kim"]);
    assert_eq!(first["added"], true);
    let again = run_json(data, &["session", "c1", "s1"]);
    assert_eq!(again["added"], false);

    let shown = run_json(data, &["show", "c1"]);
    assert_eq!(shown["sessions"][0]["session_id"], "s1");
    assert_eq!(shown["sessions"][0]["operator"], "kim");
}

#[test]
fn errors_exit_non_zero() {
    let temp = tempdir().unwrap();
    let data = temp.path();

    cycle_kb(data)
        .args(["show", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    run_json(data, &["create", "c1"]);
    cycle_kb(data)
        .args(["create", "c1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    cycle_kb(data)
        .args(["add", "c1", "--id", "d1"])
        .write_stdin("first")
        .assert()
        .success();
    cycle_kb(data)
        .args(["add", "c1", "--id", "d1"])
        .write_stdin("second")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    cycle_kb(data)
        .args(["add", "c1", "--meta", "novalue"])
        .write_stdin("x")
        .assert()
        .failure();
}
