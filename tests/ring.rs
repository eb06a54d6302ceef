//! End-to-end scenarios over real listeners on ephemeral localhost ports.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use chordify::kv::Record;
use chordify::net;
use chordify::node::NodeRef;
use chordify::proto::{Message, Origin, Response, Status};
use chordify::threads::chord::ChordService;
use chordify::threads::join::process_node_join;
use chordify::threads::tcp_service::serve;
use chordify::utils::config::Config;
use chordify::utils::crypto::{hash, in_interval, HashPos};

const TIMEOUT_MILLIS: u64 = 3_000;

fn client_origin() -> Origin {
    Origin {
        ip: "client".to_string(),
        port: 0,
    }
}

/// Binds an ephemeral port, serves it, and (optionally) joins the ring
/// through `peer`. Returns once the node is a consistent ring member.
async fn start_node(peer: Option<&ChordService>) -> ChordService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let service = ChordService::new(NodeRef::new("127.0.0.1", port), Config::default());
    let server = service.clone();
    tokio::spawn(async move { serve(server, listener).await });
    if let Some(peer) = peer {
        process_node_join(&service, &peer.node().address())
            .await
            .unwrap();
    }
    service
}

async fn send(target: &ChordService, message: Message) -> Response {
    let request = message.to_request(&client_origin());
    net::send_request(&target.node().address(), &request, TIMEOUT_MILLIS)
        .await
        .unwrap()
}

async fn send_raw(target: &ChordService, raw: Value) -> Response {
    net::send_request(&target.node().address(), &raw, TIMEOUT_MILLIS)
        .await
        .unwrap()
}

async fn insert(target: &ChordService, key: &str, value: &str) -> Response {
    send(
        target,
        Message::Insert {
            key: key.to_string(),
            value: value.to_string(),
        },
    )
    .await
}

async fn query(target: &ChordService, key: &str) -> Response {
    send(
        target,
        Message::Query {
            key: key.to_string(),
        },
    )
    .await
}

async fn overlay_ring(target: &ChordService) -> Vec<NodeRef> {
    let response = send(
        target,
        Message::Overlay {
            start_id: None,
            acc: Vec::new(),
        },
    )
    .await;
    assert_eq!(response.status, Status::Ok);
    serde_json::from_value(response.data["ring"].clone()).unwrap()
}

async fn store_dump(target: &ChordService) -> HashMap<String, HashMap<String, Record>> {
    let response = query(target, "*").await;
    assert_eq!(response.status, Status::Ok);
    serde_json::from_value(response.data["result"].clone()).unwrap()
}

/// The node whose arc `(predecessor.id, self.id]` contains the hash of `key`.
fn owner_of<'a>(members: &[&'a ChordService], key: &str) -> &'a ChordService {
    let key_id = hash(key.as_bytes());
    members
        .iter()
        .copied()
        .find(|member| in_interval(key_id, member.predecessor().id, member.node().id))
        .expect("some member must own the key")
}

/// Each record must sit on the node owning its arc.
fn assert_ownership_invariant(members: &[&ChordService]) {
    for member in members {
        let (left, right) = (member.predecessor().id, member.node().id);
        for key_id in member_store_ids(member) {
            assert!(
                in_interval(key_id, left, right),
                "node {} holds {} outside its arc ({}, {}]",
                member.node(),
                key_id,
                left,
                right
            );
        }
    }
}

fn member_store_ids(member: &ChordService) -> Vec<HashPos> {
    member.storage_snapshot().into_keys().collect()
}

#[tokio::test]
async fn single_node_store() {
    let a = start_node(None).await;
    let port = a.node().port;

    let inserted = insert(&a, "alpha", "1").await;
    assert_eq!(inserted.status, Status::Ok);
    assert_eq!(inserted.data["stored_at"], port);

    let queried = query(&a, "alpha").await;
    assert_eq!(queried.data["result"]["value"], "1");
    assert_eq!(queried.data["result"]["key"], "alpha");

    let dump = store_dump(&a).await;
    assert_eq!(dump.len(), 1);
    let records = &dump[&a.node().address()];
    assert_eq!(records.len(), 1);
    assert!(records.values().any(|record| record.key == "alpha"));

    send(&a, Message::Delete { key: "alpha".to_string() }).await;
    let gone = query(&a, "alpha").await;
    assert!(gone.data["result"].is_null());
}

#[tokio::test]
async fn two_node_bootstrap() {
    let a = start_node(None).await;
    let b = start_node(Some(&a)).await;

    assert_eq!(a.successor(), *b.node());
    assert_eq!(a.predecessor(), *b.node());
    assert_eq!(b.successor(), *a.node());
    assert_eq!(b.predecessor(), *a.node());

    let ring_from_a = overlay_ring(&a).await;
    assert_eq!(ring_from_a.len(), 2);
    assert_eq!(ring_from_a[0], *a.node());
    assert_eq!(ring_from_a[1], *b.node());

    let ring_from_b = overlay_ring(&b).await;
    assert_eq!(ring_from_b.len(), 2);
    assert_eq!(ring_from_b[0], *b.node());
}

#[tokio::test]
async fn ownership_migrates_on_join() {
    let a = start_node(None).await;
    let keys = ["apple", "banana", "cherry", "dates", "elderberry"];
    for (i, key) in keys.iter().enumerate() {
        insert(&a, key, &i.to_string()).await;
    }

    let b = start_node(Some(&a)).await;
    let members = [&a, &b];
    assert_ownership_invariant(&members);

    // Every key answers from either entry node, regardless of where it
    // ended up after the transfer.
    for (i, key) in keys.iter().enumerate() {
        for entry in members {
            let response = query(entry, key).await;
            assert_eq!(response.status, Status::Ok, "query {} via {}", key, entry.node());
            assert_eq!(response.data["result"]["value"], i.to_string());
        }
    }

    // No key was lost or duplicated by the migration.
    let total: usize = store_dump(&a).await.values().map(HashMap::len).sum();
    assert_eq!(total, keys.len());
}

#[tokio::test]
async fn concat_across_entry_nodes() {
    let a = start_node(None).await;
    let b = start_node(Some(&a)).await;

    insert(&a, "x", "a").await;
    insert(&b, "x", "b").await;
    insert(&a, "x", "c").await;

    for entry in [&a, &b] {
        let response = query(entry, "x").await;
        assert_eq!(response.data["result"]["value"], "a,b,c");
    }
}

#[tokio::test]
async fn three_node_depart() {
    let a = start_node(None).await;
    let b = start_node(Some(&a)).await;
    let c = start_node(Some(&a)).await;
    assert_eq!(overlay_ring(&a).await.len(), 3);

    let keys = ["k0", "k1", "k2", "k3", "k4", "k5"];
    for (i, key) in keys.iter().enumerate() {
        insert(&a, key, &format!("v{}", i)).await;
    }

    let departed = send(&b, Message::Depart).await;
    assert_eq!(departed.status, Status::Ok);

    // B is back to the alone state, A and C are spliced together.
    assert_eq!(b.successor(), *b.node());
    assert_eq!(b.predecessor(), *b.node());
    assert_eq!(a.successor(), *c.node());
    assert_eq!(a.predecessor(), *c.node());
    assert_eq!(c.successor(), *a.node());
    assert_eq!(c.predecessor(), *a.node());

    let ring = overlay_ring(&a).await;
    assert_eq!(ring.len(), 2);
    assert!(!ring.contains(b.node()));

    // Every key survived the depart and still answers from both members.
    for (i, key) in keys.iter().enumerate() {
        for entry in [&a, &c] {
            let response = query(entry, key).await;
            assert_eq!(response.data["result"]["value"], format!("v{}", i));
        }
    }
    assert_ownership_invariant(&[&a, &c]);
}

#[tokio::test]
async fn indirect_routing_reaches_the_owner() {
    let a = start_node(None).await;
    let b = start_node(Some(&a)).await;
    let c = start_node(Some(&a)).await;
    let members = [&a, &b, &c];

    let key = "route-me";
    let owner = owner_of(&members, key);
    let entry = members
        .iter()
        .copied()
        .find(|member| member.node() != owner.node())
        .unwrap();

    let inserted = insert(entry, key, "42").await;
    assert_eq!(inserted.status, Status::Ok);
    assert_eq!(inserted.data["stored_at"], owner.node().port);

    for member in members {
        let response = query(member, key).await;
        assert_eq!(response.data["result"]["value"], "42");
    }
}

#[tokio::test]
async fn overlay_is_cyclic_and_pointer_symmetric() {
    let a = start_node(None).await;
    let b = start_node(Some(&a)).await;
    let c = start_node(Some(&b)).await;

    let ring = overlay_ring(&a).await;
    assert_eq!(ring.len(), 3);
    let services = [&a, &b, &c];
    for window in 0..ring.len() {
        let current = &ring[window];
        let next = &ring[(window + 1) % ring.len()];
        let service = services
            .iter()
            .find(|service| service.node() == current)
            .unwrap();
        assert_eq!(service.successor(), *next);
        let next_service = services
            .iter()
            .find(|service| service.node() == next)
            .unwrap();
        assert_eq!(next_service.predecessor(), *current);
    }
}

#[tokio::test]
async fn malformed_and_unknown_requests_over_the_wire() {
    let a = start_node(None).await;

    let missing_type = send_raw(&a, json!({ "req_id": "r1", "data": {} })).await;
    assert_eq!(missing_type.status, Status::Error);
    assert_eq!(missing_type.req_id.as_deref(), Some("r1"));

    let unknown = send_raw(
        &a,
        json!({ "type": "REPLICATE", "req_id": "r2", "origin": { "ip": "client", "port": 0 }, "data": {} }),
    )
    .await;
    assert_eq!(unknown.status, Status::Unknown);
    assert_eq!(unknown.data["received_type"], "REPLICATE");

    let bad_insert = send_raw(
        &a,
        json!({ "type": "INSERT", "req_id": "r3", "origin": { "ip": "client", "port": 0 }, "data": { "key": "x" } }),
    )
    .await;
    assert_eq!(bad_insert.status, Status::Error);
}
