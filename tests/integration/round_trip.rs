#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use penumbra::storage::{MemoryBackend, NodeCodec, NodeResolver, OverflowStorage, StringInterner};
use penumbra::{Direction, NodeBody, NodeId, NodeRef, Result, Schema, Value};
use proptest::prelude::*;

struct Literals;

impl NodeResolver for Literals {
    fn resolve(&self, id: NodeId) -> Result<NodeRef> {
        Ok(NodeRef::evicted(id, "Literal".into()))
    }
}

fn codec() -> NodeCodec {
    let schema = Schema::builder()
        .edge("AST", ["order"])
        .edge("CFG", Vec::<String>::new())
        .node("Method", ["AST", "CFG"], ["AST"])
        .node("Literal", Vec::<String>::new(), ["AST", "CFG"])
        .build()
        .expect("schema");
    let storage = OverflowStorage::with_backend(
        Arc::new(MemoryBackend::new()),
        Arc::new(StringInterner::new()),
    )
    .expect("storage");
    NodeCodec::new(Arc::new(storage), Arc::new(schema), None, false)
}

fn finite_f32() -> impl Strategy<Value = f32> {
    any::<f32>().prop_map(|f| if f.is_nan() { 0.0 } else { f })
}

fn finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_map(|f| if f.is_nan() { 0.0 } else { f })
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::string),
        any::<i8>().prop_map(Value::Byte),
        any::<i16>().prop_map(Value::Short),
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Long),
        finite_f32().prop_map(Value::Float),
        finite_f64().prop_map(Value::Double),
        any::<char>().prop_map(Value::Char),
        (0i64..100).prop_map(|id| Value::Node(NodeRef::evicted(id, "Literal".into()))),
    ]
}

fn arb_array() -> impl Strategy<Value = Value> {
    prop_oneof![
        prop::collection::vec(any::<i8>(), 0..8).prop_map(Value::ByteArray),
        prop::collection::vec(any::<i16>(), 0..8).prop_map(Value::ShortArray),
        prop::collection::vec(any::<i32>(), 0..8).prop_map(Value::IntArray),
        prop::collection::vec(any::<i64>(), 0..8).prop_map(Value::LongArray),
        prop::collection::vec(finite_f32(), 0..8).prop_map(Value::FloatArray),
        prop::collection::vec(finite_f64(), 0..8).prop_map(Value::DoubleArray),
        prop::collection::vec(any::<char>(), 0..8).prop_map(Value::CharArray),
        prop::collection::vec(any::<bool>(), 0..8).prop_map(Value::BoolArray),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![arb_scalar(), arb_array()];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::vec(
                prop_oneof![Just(Value::Null), inner],
                0..4
            )
            .prop_map(Value::ObjectArray),
        ]
    })
}

#[derive(Debug, Clone)]
enum EdgeOp {
    Ast { target: NodeId, order: Option<i32> },
    Cfg { target: NodeId },
    AstIn { source: NodeId, order: Option<i32> },
    Remove { target: NodeId },
}

fn arb_edge_op() -> impl Strategy<Value = EdgeOp> {
    prop_oneof![
        (0i64..20, prop::option::of(any::<i32>()))
            .prop_map(|(target, order)| EdgeOp::Ast { target, order }),
        (0i64..20).prop_map(|target| EdgeOp::Cfg { target }),
        (0i64..20, prop::option::of(any::<i32>()))
            .prop_map(|(source, order)| EdgeOp::AstIn { source, order }),
        (0i64..20).prop_map(|target| EdgeOp::Remove { target }),
    ]
}

fn order(order: Option<i32>) -> Vec<(&'static str, Value)> {
    order
        .map(|o| vec![("order", Value::Int(o))])
        .unwrap_or_default()
}

fn apply(body: &mut NodeBody, op: &EdgeOp) {
    let literal = |id| NodeRef::evicted(id, "Literal".into());
    match op {
        EdgeOp::Ast { target, order: o } => body
            .store_adjacent(Direction::Out, "AST", literal(*target), &order(*o))
            .expect("AST out"),
        EdgeOp::Cfg { target } => body
            .store_adjacent::<&str>(Direction::Out, "CFG", literal(*target), &[])
            .expect("CFG out"),
        EdgeOp::AstIn { source, order: o } => body
            .store_adjacent(Direction::In, "AST", literal(*source), &order(*o))
            .expect("AST in"),
        EdgeOp::Remove { target } => {
            body.remove_adjacent(Direction::Out, "AST", *target);
        }
    }
}

fn assert_same(before: &NodeBody, after: &NodeBody) {
    assert_eq!(before.properties(), after.properties());
    for (direction, label) in [
        (Direction::Out, "AST"),
        (Direction::Out, "CFG"),
        (Direction::In, "AST"),
    ] {
        assert_eq!(
            before.adjacent_edges(direction, label),
            after.adjacent_edges(direction, label),
            "{direction:?} {label}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_records_round_trip(
        properties in prop::collection::btree_map("[a-z]{1,8}", arb_value(), 0..6),
        ops in prop::collection::vec(arb_edge_op(), 0..40),
        id in 0i64..1_000_000,
    ) {
        let codec = codec();
        let layout = Arc::clone(codec.schema().node_layout("Method").expect("layout"));
        let mut body = NodeBody::new(layout);
        for (key, value) in &properties {
            body.set_property(Arc::from(key.as_str()), value.clone());
        }
        for op in &ops {
            apply(&mut body, op);
        }

        let bytes = codec.serialize(id, &mut body).expect("serialize");
        prop_assert!(!body.is_dirty());
        let decoded = codec.deserialize(&bytes, &Literals).expect("deserialize");
        prop_assert_eq!(decoded.id, id);
        prop_assert_eq!(&*decoded.label, "Method");
        prop_assert!(!decoded.body.is_dirty());
        assert_same(&body, &decoded.body);

        let identity = codec.deserialize_ref(&bytes).expect("reference decode");
        prop_assert_eq!(identity.id, id);
    }
}

#[test]
fn method_record_has_expected_shape() -> Result<()> {
    let codec = codec();
    let layout = Arc::clone(codec.schema().node_layout("Method")?);
    let mut body = NodeBody::new(layout);
    body.set_property("name".into(), Value::from("foo"));
    body.set_property("lineNumber".into(), Value::Int(42));
    body.store_adjacent(
        Direction::Out,
        "AST",
        NodeRef::evicted(10, "Literal".into()),
        &[("order", Value::Int(0))],
    )?;
    body.store_adjacent(
        Direction::Out,
        "AST",
        NodeRef::evicted(11, "Literal".into()),
        &[("order", Value::Int(1))],
    )?;

    let bytes = codec.serialize(1, &mut body)?;
    let property_count = i32::from_le_bytes(bytes[12..16].try_into().expect("4 bytes"));
    assert_eq!(property_count, 2);

    let decoded = codec.deserialize(&bytes, &Literals)?;
    let out: Vec<NodeId> = decoded
        .body
        .adjacent(Direction::Out, "AST")
        .iter()
        .map(NodeRef::id)
        .collect();
    assert_eq!(out, vec![10, 11]);
    let expected: BTreeMap<Arc<str>, Value> = [
        (Arc::from("lineNumber"), Value::Int(42)),
        (Arc::from("name"), Value::from("foo")),
    ]
    .into_iter()
    .collect();
    assert_eq!(decoded.body.properties(), &expected);
    Ok(())
}
