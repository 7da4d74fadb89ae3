#![allow(missing_docs)]

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use penumbra::{Config, Graph, Result, Value};
use support::{schema, GatedBackend};

fn gated_graph() -> (Graph, Arc<GatedBackend>) {
    let backend = Arc::new(GatedBackend::new());
    let graph = Graph::open_with_backend(Config::with_defaults(), schema(), backend.clone())
        .expect("graph");
    (graph, backend)
}

#[test]
fn creators_wait_until_the_batch_is_stored() -> Result<()> {
    let (graph, backend) = gated_graph();
    for i in 0..8 {
        graph.create_node("Person", &[("age", Value::Int(i))])?;
    }
    backend.close_gate();
    assert!(graph.request_eviction(8));
    backend.wait_for_blocked_writer();

    let released = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                graph.apply_backpressure_maybe();
                released.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        backend.open_gate();
    });
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert_eq!(graph.hydrated_count(), 0);
    Ok(())
}

#[test]
fn requests_beyond_the_queue_are_dropped_and_kept() -> Result<()> {
    let (graph, backend) = gated_graph();
    let nodes: Vec<_> = (0..3)
        .map(|i| graph.create_node("Person", &[("age", Value::Int(i))]))
        .collect::<Result<_>>()?;
    backend.close_gate();

    assert!(graph.request_eviction(1));
    backend.wait_for_blocked_writer();
    assert!(graph.request_eviction(1));
    assert!(!graph.request_eviction(1));

    backend.open_gate();
    graph.apply_backpressure_maybe();
    let metrics = graph.eviction_metrics().expect("overflow enabled");
    assert_eq!(metrics.batches_requested, 3);
    assert_eq!(metrics.batches_dropped, 1);
    assert_eq!(metrics.batches_completed, 2);
    assert!(nodes[2].is_hydrated());

    assert!(graph.request_eviction(1));
    graph.apply_backpressure_maybe();
    assert_eq!(graph.hydrated_count(), 0);
    Ok(())
}

#[test]
fn bodies_changed_mid_batch_stay_resident() -> Result<()> {
    let (graph, backend) = gated_graph();
    let alice = graph.create_node("Person", &[("name", Value::from("alice"))])?;
    let bob = graph.create_node("Person", &[("name", Value::from("bob"))])?;
    backend.close_gate();
    assert!(graph.request_eviction(2));
    backend.wait_for_blocked_writer();

    graph.set_property(&alice, "name", "alicia")?;
    backend.open_gate();
    graph.apply_backpressure_maybe();

    assert!(alice.is_hydrated());
    assert!(alice.is_dirty());
    assert!(!bob.is_hydrated());

    assert!(graph.request_eviction(10));
    graph.apply_backpressure_maybe();
    assert!(!alice.is_hydrated());
    assert_eq!(graph.property(&alice, "name")?, Some(Value::from("alicia")));
    Ok(())
}
