#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use penumbra::{Config, CustomValue, Graph, MemoryBackend, NodeRef, PropertyConverter, Result, Value};
use proptest::prelude::*;
use support::schema;

const KEYS: [&str; 2] = ["name", "age"];

#[derive(Debug, Clone)]
enum Op {
    Create { key: usize, value: i32 },
    Set { node: usize, key: usize, value: i32 },
    Unset { node: usize, key: usize },
    Remove { node: usize },
    Index { key: usize },
    Unindex { key: usize },
    Evict,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..KEYS.len(), 0..4i32).prop_map(|(key, value)| Op::Create { key, value }),
        4 => (0..16usize, 0..KEYS.len(), 0..4i32)
            .prop_map(|(node, key, value)| Op::Set { node, key, value }),
        1 => (0..16usize, 0..KEYS.len()).prop_map(|(node, key)| Op::Unset { node, key }),
        1 => (0..16usize).prop_map(|node| Op::Remove { node }),
        1 => (0..KEYS.len()).prop_map(|key| Op::Index { key }),
        1 => (0..KEYS.len()).prop_map(|key| Op::Unindex { key }),
        1 => Just(Op::Evict),
    ]
}

fn value_for(key: usize, value: i32) -> Value {
    match KEYS[key] {
        "name" => Value::string(format!("n{value}")),
        _ => Value::Int(value),
    }
}

fn pick(graph: &Graph, index: usize) -> Option<NodeRef> {
    let nodes = graph.nodes();
    if nodes.is_empty() {
        None
    } else {
        Some(nodes[index % nodes.len()].clone())
    }
}

fn apply(graph: &Graph, op: &Op) -> Result<()> {
    match *op {
        Op::Create { key, value } => {
            graph.create_node("Person", &[(KEYS[key], value_for(key, value))])?;
        }
        Op::Set { node, key, value } => {
            if let Some(node) = pick(graph, node) {
                graph.set_property(&node, KEYS[key], value_for(key, value))?;
            }
        }
        Op::Unset { node, key } => {
            if let Some(node) = pick(graph, node) {
                graph.remove_property(&node, KEYS[key])?;
            }
        }
        Op::Remove { node } => {
            if let Some(node) = pick(graph, node) {
                graph.remove_node(&node)?;
            }
        }
        Op::Index { key } => {
            graph.create_index(KEYS[key])?;
        }
        Op::Unindex { key } => {
            graph.drop_index(KEYS[key])?;
        }
        Op::Evict => {
            graph.request_eviction(usize::MAX);
            graph.apply_backpressure_maybe();
        }
    }
    Ok(())
}

fn scan(graph: &Graph, key: &str, value: &Value) -> Result<Vec<NodeRef>> {
    let mut found = Vec::new();
    for node in graph.nodes() {
        if graph.property(&node, key)?.as_ref() == Some(value) {
            found.push(node);
        }
    }
    Ok(found)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_lookup_matches_scan(ops in prop::collection::vec(arb_op(), 1..48)) {
        let graph = Graph::open_with_backend(
            Config::with_defaults(),
            schema(),
            Arc::new(MemoryBackend::new()),
        )
        .expect("graph");
        for op in &ops {
            apply(&graph, op).expect("apply");
        }

        for (key_index, key) in KEYS.iter().enumerate() {
            for raw in 0..4 {
                let value = value_for(key_index, raw);
                let scanned = scan(&graph, key, &value).expect("scan");
                prop_assert_eq!(graph.find(key, &value).expect("find"), scanned.clone());
                if graph.is_indexed(key) {
                    prop_assert_eq!(graph.lookup(key, &value), scanned);
                } else {
                    prop_assert!(graph.lookup(key, &value).is_empty());
                }
            }
            if graph.is_indexed(key) {
                let with_key = graph
                    .nodes()
                    .iter()
                    .filter(|node| graph.property(node, key).ok().flatten().is_some())
                    .count();
                prop_assert_eq!(graph.indexed_node_count(key), with_key);
            }
        }
    }
}

#[test]
fn index_survives_eviction_of_its_nodes() -> Result<()> {
    let graph = Graph::open_with_backend(
        Config::with_defaults(),
        schema(),
        Arc::new(MemoryBackend::new()),
    )?;
    graph.create_index("name")?;
    let carol = graph.create_node("Person", &[("name", Value::from("carol"))])?;
    graph.request_eviction(usize::MAX);
    graph.apply_backpressure_maybe();
    assert!(!carol.is_hydrated());

    assert_eq!(graph.lookup("name", &Value::from("carol")), vec![carol.clone()]);
    graph.set_property(&carol, "name", "caroline")?;
    assert!(graph.lookup("name", &Value::from("carol")).is_empty());
    assert_eq!(graph.lookup("name", &Value::from("caroline")), vec![carol]);
    Ok(())
}

struct Point(i32, i32);

fn point_converter() -> PropertyConverter {
    Arc::new(|custom: &CustomValue| match custom.downcast_ref::<Point>() {
        Some(p) => Value::IntArray(vec![p.0, p.1]),
        None => Value::Custom(custom.clone()),
    })
}

#[test]
fn custom_values_are_indexed_in_converted_form() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("points.db");
    let config = || {
        Config::with_defaults()
            .storage_location(&path)
            .property_converter(point_converter())
    };
    let converted = Value::IntArray(vec![1, 2]);
    {
        let graph = Graph::open(config(), schema())?;
        graph.create_index("pos")?;
        let a = graph.create_node("Person", &[("pos", Value::Custom(CustomValue::new(Point(1, 2))))])?;
        graph.save()?;
        assert_eq!(graph.lookup("pos", &converted), vec![a.clone()]);

        graph.request_eviction(usize::MAX);
        graph.apply_backpressure_maybe();
        assert_eq!(graph.property(&a, "pos")?, Some(converted.clone()));
        assert_eq!(graph.lookup("pos", &converted), vec![a.clone()]);
        assert_eq!(
            graph.lookup("pos", &Value::Custom(CustomValue::new(Point(1, 2)))),
            vec![a.clone()]
        );

        graph.set_property(&a, "pos", Value::Custom(CustomValue::new(Point(3, 4))))?;
        assert!(graph.lookup("pos", &converted).is_empty());
        graph.set_property(&a, "pos", converted.clone())?;
        graph.close()?;
    }

    let graph = Graph::open(config(), schema())?;
    let a = graph.node(0).expect("node");
    assert_eq!(graph.lookup("pos", &converted), vec![a.clone()]);
    assert_eq!(graph.property(&a, "pos")?, Some(converted));
    Ok(())
}
