#![allow(missing_docs)]

mod support;

use std::path::{Path, PathBuf};

use penumbra::storage::{KvBackend, METADATA_KEY_STORAGE_FORMAT_VERSION, STORAGE_FORMAT_VERSION};
use penumbra::{Config, Direction, Graph, GraphError, Result, SqliteBackend, Value};
use support::schema;
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("graph.db")
}

fn open(path: &Path) -> Result<Graph> {
    Graph::open(Config::with_defaults().storage_location(path), schema())
}

#[test]
fn reopened_graph_restores_nodes_edges_and_indexes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = db_path(&dir);
    {
        let graph = open(&path)?;
        let ada = graph.create_node("Person", &[("name", Value::from("ada"))])?;
        let alan = graph.create_node("Person", &[("name", Value::from("alan"))])?;
        let method = graph.create_node("Method", &[("name", Value::from("compute"))])?;
        graph.add_edge(&ada, "KNOWS", &alan, &[("since", Value::Int(1936))])?;
        graph.add_edge(&alan, "WROTE", &method, &[])?;
        graph.create_index("name")?;
        graph.request_eviction(2);
        graph.apply_backpressure_maybe();
        graph.close()?;
    }

    let graph = open(&path)?;
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.hydrated_count(), 0);
    let ada = graph.node(0).expect("ada");
    let alan = graph.node(1).expect("alan");
    assert_eq!(graph.property(&ada, "name")?, Some(Value::from("ada")));
    let knows = graph.adjacent_edges(&ada, Direction::Out, "KNOWS")?;
    assert_eq!(knows.len(), 1);
    assert_eq!(knows[0].node, alan);
    assert_eq!(knows[0].properties[0].1, Value::Int(1936));
    let wrote = graph.out(&alan, "WROTE")?;
    assert_eq!(wrote.len(), 1);
    assert_eq!(&**wrote[0].label(), "Method");

    assert!(graph.is_indexed("name"));
    assert_eq!(graph.lookup("name", &Value::from("alan")), vec![alan]);

    let next = graph.create_node("Person", &[])?;
    assert_eq!(next.id(), 3);
    Ok(())
}

#[test]
fn removals_and_dropped_indexes_stay_gone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = db_path(&dir);
    {
        let graph = open(&path)?;
        graph.create_index("name")?;
        let keep = graph.create_node("Person", &[("name", Value::from("keep"))])?;
        let gone = graph.create_node("Person", &[("name", Value::from("gone"))])?;
        graph.add_edge(&keep, "KNOWS", &gone, &[])?;
        graph.save()?;
        graph.remove_node(&gone)?;
        graph.drop_index("name")?;
        graph.close()?;
    }

    let graph = open(&path)?;
    assert_eq!(graph.node_count(), 1);
    assert!(graph.node(1).is_none());
    let keep = graph.node(0).expect("keep");
    assert!(graph.out(&keep, "KNOWS")?.is_empty());
    assert!(!graph.is_indexed("name"));
    assert!(graph.storage().index_names()?.is_empty());
    Ok(())
}

#[test]
fn every_run_records_its_library_version() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = db_path(&dir);
    open(&path)?.close()?;
    let graph = open(&path)?;
    let runs = graph.storage().all_library_versions()?;
    assert_eq!(runs.len(), 2);
    for run in &runs {
        assert_eq!(
            run.get(env!("CARGO_PKG_NAME")).map(String::as_str),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }
    assert_eq!(graph.storage().format_version()?, Some(STORAGE_FORMAT_VERSION));
    Ok(())
}

#[test]
fn foreign_format_versions_are_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = db_path(&dir);
    {
        let backend = SqliteBackend::open(&path)?;
        backend.put_meta(METADATA_KEY_STORAGE_FORMAT_VERSION, "99")?;
    }
    match open(&path) {
        Err(GraphError::VersionMismatch { found, expected }) => {
            assert_eq!(found, 99);
            assert_eq!(expected, STORAGE_FORMAT_VERSION);
        }
        other => panic!("expected a version mismatch, got {:?}", other.err()),
    }
    Ok(())
}

#[test]
fn stores_without_a_version_are_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = db_path(&dir);
    {
        let backend = SqliteBackend::open(&path)?;
        backend.put_meta("SOMETHING_ELSE", "1")?;
    }
    assert!(matches!(open(&path), Err(GraphError::MissingFormatVersion)));
    Ok(())
}

#[test]
fn temporary_graphs_leave_nothing_behind() -> Result<()> {
    let graph = Graph::open(Config::with_defaults(), schema())?;
    let path = graph.storage().location().map(Path::to_path_buf).expect("location");
    graph.create_node("Person", &[("name", Value::from("ephemeral"))])?;
    graph.request_eviction(1);
    graph.apply_backpressure_maybe();
    assert!(path.exists());
    graph.close()?;
    drop(graph);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn closed_graphs_refuse_work() -> Result<()> {
    let graph = Graph::open(Config::with_defaults(), schema())?;
    let node = graph.create_node("Person", &[])?;
    graph.close()?;
    graph.close()?;
    assert!(matches!(graph.create_node("Person", &[]), Err(GraphError::Closed)));
    assert!(matches!(graph.property(&node, "name"), Err(GraphError::Closed)));
    Ok(())
}
