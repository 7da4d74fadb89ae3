#![allow(missing_docs)]

mod support;

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use penumbra::{Config, Graph, Value};
use serde_json::Value as Json;
use tempfile::TempDir;

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("inspect.db");
    seed(&path).expect("seed graph");
    (dir, path)
}

fn seed(path: &Path) -> penumbra::Result<()> {
    let graph = Graph::open(
        Config::with_defaults().storage_location(path),
        support::schema(),
    )?;
    let ada = graph.create_node("Person", &[("name", Value::from("ada"))])?;
    let method = graph.create_node("Method", &[("lines", Value::Int(12))])?;
    graph.add_edge(&ada, "WROTE", &method, &[])?;
    graph.create_index("name")?;
    graph.close()
}

fn json(path: &Path, args: &[&str]) -> Json {
    let output = cargo_bin_cmd!("penumbra-inspect")
        .arg(path)
        .args(["--format", "json"])
        .args(args)
        .output()
        .expect("run inspector");
    assert!(
        output.status.success(),
        "inspector failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn info_reports_contents_and_runs() {
    let (_dir, path) = setup_db();
    let info = json(&path, &["info"]);
    assert_eq!(info["records"], 2);
    assert_eq!(info["format_version"], info["supported_version"]);
    assert_eq!(info["indexes"], 1);
    assert_eq!(info["runs"].as_array().map(Vec::len), Some(1));
    assert!(info["strings"].as_u64().unwrap_or_default() >= 3);
}

#[test]
fn labels_are_counted() {
    let (_dir, path) = setup_db();
    let labels = json(&path, &["labels"]);
    assert_eq!(labels["Person"], 1);
    assert_eq!(labels["Method"], 1);
}

#[test]
fn records_decode_properties_and_edges() {
    let (_dir, path) = setup_db();
    let record = json(&path, &["record", "0"]);
    assert_eq!(record["id"], 0);
    assert_eq!(record["label"], "Person");
    assert_eq!(record["properties"]["name"], "\"ada\"");
    let edges = record["edges"].as_array().expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["direction"], "OUT");
    assert_eq!(edges[0]["label"], "WROTE");
    assert_eq!(edges[0]["adjacent"][0]["node"], 1);
}

#[test]
fn indexes_print_as_text() {
    let (_dir, path) = setup_db();
    let output = cargo_bin_cmd!("penumbra-inspect")
        .arg(&path)
        .arg("indexes")
        .output()
        .expect("run inspector");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PROPERTY INDEXES"));
    assert!(stdout.contains("1 values, 1 nodes"));
}

#[test]
fn missing_records_and_files_fail() {
    let (dir, path) = setup_db();
    cargo_bin_cmd!("penumbra-inspect")
        .arg(&path)
        .args(["record", "42"])
        .assert()
        .failure();
    cargo_bin_cmd!("penumbra-inspect")
        .arg(dir.path().join("absent.db"))
        .arg("info")
        .assert()
        .failure();
}
