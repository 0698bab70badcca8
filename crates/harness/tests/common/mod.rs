#![allow(dead_code)]

use concord_core::FieldSchema;
use concord_core::field::ListSplice;
use concord_core::FieldUpdate;
use concord_engine::Schema;
use concord_harness::{HarnessError, TestNetwork};
use serde_json::{Value as JsonValue, json};
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("concord=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

pub fn schemas() -> Vec<Schema> {
    vec![
        Schema::new("cues")
            .with_field("label", FieldSchema::value(json!("")))
            .with_field("level", FieldSchema::value(json!(0)))
            .with_field("props", FieldSchema::map())
            .with_field("steps", FieldSchema::list()),
    ]
}

/// A settled network of `n` connected peers.
pub fn network(n: usize) -> Result<TestNetwork, HarnessError> {
    let mut net = TestNetwork::new(schemas())?;
    for _ in 0..n {
        net.add_peer()?;
    }
    net.settle()?;
    Ok(net)
}

pub fn value(v: JsonValue) -> FieldUpdate {
    FieldUpdate::Value(v)
}

pub fn props(pairs: &[(&str, Option<JsonValue>)]) -> FieldUpdate {
    FieldUpdate::Map(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

pub fn splice(index: usize, remove: usize, values: &[JsonValue]) -> FieldUpdate {
    FieldUpdate::List(vec![ListSplice {
        index,
        remove,
        values: values.to_vec(),
    }])
}

/// Every peer reads the same record.
pub fn assert_converged(net: &TestNetwork, schema: &str, record: &str) {
    let first = net.peer(0).record(schema, record).unwrap();
    for (i, peer) in net.peers().iter().enumerate().skip(1) {
        assert_eq!(peer.record(schema, record).unwrap(), first, "peer {i} diverged");
    }
}
