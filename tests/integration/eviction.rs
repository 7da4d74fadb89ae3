#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use penumbra::storage::KvBackend;
use penumbra::{Config, Direction, Graph, MemoryBackend, NodeRef, Result, Value};
use support::{schema, GatedBackend};

fn graph_on(backend: Arc<dyn KvBackend>, config: Config) -> Graph {
    Graph::open_with_backend(config, schema(), backend).expect("graph")
}

fn evict_everything(graph: &Graph) {
    graph.request_eviction(usize::MAX);
    graph.apply_backpressure_maybe();
}

fn seed(graph: &Graph, people: usize) -> Result<Vec<NodeRef>> {
    let mut nodes = Vec::with_capacity(people);
    for i in 0..people {
        let name = format!("person-{i}");
        let node = graph.create_node(
            "Person",
            &[("name", Value::from(name.as_str())), ("age", Value::Int(i as i32))],
        )?;
        if let Some(previous) = nodes.last() {
            graph.add_edge(previous, "KNOWS", &node, &[("since", Value::Int(2000 + i as i32))])?;
        }
        nodes.push(node);
    }
    Ok(nodes)
}

#[test]
fn evicted_bodies_reload_on_access() -> Result<()> {
    let graph = graph_on(Arc::new(MemoryBackend::new()), Config::with_defaults());
    let nodes = seed(&graph, 20)?;
    evict_everything(&graph);
    assert_eq!(graph.hydrated_count(), 0);
    assert_eq!(graph.storage().record_count()?, 20);

    assert_eq!(graph.property(&nodes[3], "name")?, Some(Value::from("person-3")));
    assert!(nodes[3].is_hydrated());
    assert!(!nodes[3].is_dirty());
    let out = graph.out(&nodes[3], "KNOWS")?;
    assert_eq!(out, vec![nodes[4].clone()]);
    let edges = graph.adjacent_edges(&nodes[4], Direction::In, "KNOWS")?;
    assert_eq!(edges[0].node, nodes[3]);
    assert_eq!(edges[0].properties, vec![(Arc::from("since"), Value::Int(2004))]);
    Ok(())
}

#[test]
fn clean_bodies_are_dropped_without_rewriting() -> Result<()> {
    let graph = graph_on(Arc::new(MemoryBackend::new()), Config::with_defaults());
    let nodes = seed(&graph, 10)?;
    assert_eq!(graph.flush_all()?, 10);
    let before: Vec<_> = nodes
        .iter()
        .map(|node| {
            (
                graph.properties(node).expect("properties"),
                graph.adjacent_edges(node, Direction::Out, "KNOWS").expect("out"),
                graph.adjacent_edges(node, Direction::In, "KNOWS").expect("in"),
            )
        })
        .collect();

    evict_everything(&graph);
    let metrics = graph.eviction_metrics().expect("overflow enabled");
    assert_eq!(metrics.nodes_written, 0);
    assert_eq!(metrics.nodes_evicted, 10);

    for (node, (properties, out, inn)) in nodes.iter().zip(before) {
        assert_eq!(graph.properties(node)?, properties);
        assert_eq!(graph.adjacent_edges(node, Direction::Out, "KNOWS")?, out);
        assert_eq!(graph.adjacent_edges(node, Direction::In, "KNOWS")?, inn);
    }
    Ok(())
}

#[test]
fn changes_after_reload_are_written_again() -> Result<()> {
    let graph = graph_on(Arc::new(MemoryBackend::new()), Config::with_defaults());
    let nodes = seed(&graph, 3)?;
    evict_everything(&graph);

    graph.set_property(&nodes[0], "name", "renamed")?;
    assert!(nodes[0].is_dirty());
    evict_everything(&graph);
    assert!(!nodes[0].is_hydrated());
    assert_eq!(graph.property(&nodes[0], "name")?, Some(Value::from("renamed")));
    Ok(())
}

#[test]
fn candidates_up_to_the_limit_stay_resident() -> Result<()> {
    let config = Config::with_defaults().max_eviction_candidates(10);
    let graph = graph_on(Arc::new(MemoryBackend::new()), config);
    for i in 0..10 {
        graph.create_node("Method", &[("id", Value::Int(i))])?;
    }
    graph.apply_backpressure_maybe();
    assert_eq!(graph.hydrated_count(), 10);
    let metrics = graph.eviction_metrics().expect("overflow enabled");
    assert_eq!(metrics.nodes_evicted, 0);
    Ok(())
}

#[test]
fn candidate_limit_triggers_eviction() -> Result<()> {
    let config = Config::with_defaults()
        .max_eviction_candidates(10)
        .eviction_batch_size(5);
    let graph = graph_on(Arc::new(MemoryBackend::new()), config);
    for i in 0..100 {
        graph.create_node("Method", &[("id", Value::Int(i))])?;
    }
    graph.apply_backpressure_maybe();
    assert!(graph.hydrated_count() <= 11);
    let metrics = graph.eviction_metrics().expect("overflow enabled");
    assert!(metrics.nodes_evicted >= 85);
    assert_eq!(graph.node_count(), 100);
    Ok(())
}

#[test]
fn failed_batches_keep_bodies_dirty_and_retry() -> Result<()> {
    let backend = Arc::new(GatedBackend::new());
    let graph = graph_on(backend.clone(), Config::with_defaults());
    let nodes = seed(&graph, 5)?;

    backend.fail_writes(true);
    evict_everything(&graph);
    let metrics = graph.eviction_metrics().expect("overflow enabled");
    assert_eq!(metrics.batches_failed, 1);
    assert!(nodes.iter().all(|node| node.is_hydrated() && node.is_dirty()));

    backend.fail_writes(false);
    evict_everything(&graph);
    assert_eq!(graph.hydrated_count(), 0);
    assert_eq!(graph.property(&nodes[2], "age")?, Some(Value::Int(2)));
    Ok(())
}

#[test]
fn disabled_overflow_keeps_everything_resident() -> Result<()> {
    let graph = graph_on(Arc::new(MemoryBackend::new()), Config::without_overflow());
    seed(&graph, 5)?;
    assert!(!graph.request_eviction(100));
    assert_eq!(graph.hydrated_count(), 5);
    assert!(graph.eviction_metrics().is_none());
    graph.save()?;
    assert_eq!(graph.storage().record_count()?, 5);
    Ok(())
}

#[test]
fn removed_nodes_leave_no_record_behind() -> Result<()> {
    let graph = graph_on(Arc::new(MemoryBackend::new()), Config::with_defaults());
    let nodes = seed(&graph, 3)?;
    evict_everything(&graph);
    graph.remove_node(&nodes[1])?;
    assert_eq!(graph.storage().get_record(nodes[1].id())?, None);
    assert!(graph.out(&nodes[0], "KNOWS")?.is_empty());
    assert!(graph.in_(&nodes[2], "KNOWS")?.is_empty());
    evict_everything(&graph);
    assert_eq!(graph.storage().record_count()?, 2);
    Ok(())
}

#[test]
fn node_values_pointing_at_removed_nodes_read_as_absent() -> Result<()> {
    let graph = graph_on(Arc::new(MemoryBackend::new()), Config::with_defaults());
    let a = graph.create_node("Person", &[("name", Value::from("a"))])?;
    let b = graph.create_node("Person", &[("name", Value::from("b"))])?;
    let c = graph.create_node("Person", &[("name", Value::from("c"))])?;
    let d = graph.create_node("Person", &[])?;
    graph.set_property(&a, "friend", Value::Node(b.clone()))?;
    graph.add_edge(&a, "KNOWS", &d, &[("since", Value::Node(c.clone()))])?;
    evict_everything(&graph);
    assert_eq!(graph.hydrated_count(), 0);

    assert_eq!(graph.property(&a, "friend")?, Some(Value::Node(b.clone())));
    evict_everything(&graph);
    graph.remove_node(&b)?;
    graph.remove_node(&c)?;

    assert_eq!(graph.property(&a, "name")?, Some(Value::from("a")));
    assert_eq!(graph.property(&a, "friend")?, None);
    let edges = graph.adjacent_edges(&a, Direction::Out, "KNOWS")?;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].node, d);
    assert!(edges[0].properties.is_empty());
    let edges = graph.adjacent_edges(&d, Direction::In, "KNOWS")?;
    assert_eq!(edges[0].node, a);
    assert!(edges[0].properties.is_empty());
    Ok(())
}
