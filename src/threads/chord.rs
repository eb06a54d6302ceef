use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::kv::{KvStore, Storage};
use crate::net;
use crate::node::NodeRef;
use crate::proto::{
    data_field, expect_ok, Envelope, Message, Origin, Response, StoreDump, TransferItem,
    MISSING_TYPE_ERROR,
};
use crate::utils::config::Config;
use crate::utils::crypto::{hash, in_interval, HashPos};
use crate::utils::types::Address;

/// The struct representing the running node.
#[derive(Clone)]
pub struct ChordService {
    /// identity of this node, fixed at startup
    node: NodeRef,
    /// clockwise neighbor handle
    successor: Arc<Mutex<NodeRef>>,
    /// counter-clockwise neighbor handle
    predecessor: Arc<Mutex<NodeRef>>,
    /// key value storage
    storage: Arc<Storage>,
    /// outbound request tunables
    config: Config,
}

impl ChordService {
    /// A fresh node starts alone: both pointers refer to itself.
    pub fn new(node: NodeRef, config: Config) -> ChordService {
        ChordService {
            successor: Arc::new(Mutex::new(node.clone())),
            predecessor: Arc::new(Mutex::new(node.clone())),
            storage: Arc::new(Storage::new()),
            node,
            config,
        }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn successor(&self) -> NodeRef {
        self.successor.lock().unwrap().clone()
    }

    pub fn predecessor(&self) -> NodeRef {
        self.predecessor.lock().unwrap().clone()
    }

    pub fn set_successor(&self, node: NodeRef) {
        *self.successor.lock().unwrap() = node;
    }

    pub fn set_predecessor(&self, node: NodeRef) {
        *self.predecessor.lock().unwrap() = node;
    }

    /// Detached copy of the local store, for inspection and tests.
    pub fn storage_snapshot(&self) -> KvStore {
        self.storage.get_all()
    }

    pub fn origin(&self) -> Origin {
        Origin {
            ip: self.node.ip.clone(),
            port: self.node.port,
        }
    }

    fn is_alone(&self) -> bool {
        self.successor().id == self.node.id
    }

    /// This node owns exactly the arc `(predecessor.id, self.id]`.
    fn is_responsible(&self, key_id: HashPos) -> bool {
        in_interval(key_id, self.predecessor().id, self.node.id)
    }

    /// One request/response exchange against a known ring member.
    pub async fn request_peer(&self, peer: &NodeRef, message: Message) -> Result<Value, NodeError> {
        self.request_address(&peer.address(), message).await
    }

    pub async fn request_address(
        &self,
        addr: &Address,
        message: Message,
    ) -> Result<Value, NodeError> {
        let request = message.to_request(&self.origin());
        let response = net::send_request(addr, &request, self.config.request_timeout_millis).await?;
        expect_ok(addr, response)
    }

    /// Like `request_address`, retrying the connection while the peer is
    /// still starting up. Only used during the join handshake.
    pub async fn request_address_with_retry(
        &self,
        addr: &Address,
        message: Message,
    ) -> Result<Value, NodeError> {
        let request = message.to_request(&self.origin());
        let response = net::send_request_with_retry(addr, &request, &self.config).await?;
        expect_ok(addr, response)
    }

    /// Resolves successor-of(id), chasing the successor chain over the
    /// network when the answer is not locally known.
    pub async fn find_successor(&self, id: HashPos) -> Result<NodeRef, NodeError> {
        let successor = self.successor();
        if successor.id == self.node.id {
            return Ok(self.node.clone());
        }
        if in_interval(id, self.node.id, successor.id) {
            return Ok(successor);
        }
        let data = self
            .request_peer(&successor, Message::FindSuccessor { id })
            .await?;
        data_field(&data, "successor")
    }

    /// Entry point for every accepted connection: one decoded envelope in,
    /// one response out.
    pub async fn handle_message(&self, raw: Value) -> Response {
        let envelope: Envelope = match serde_json::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(e) => return Response::error(None, format!("malformed envelope: {}", e)),
        };
        let req_id = envelope.req_id.clone();
        let msg_type = match envelope.msg_type {
            Some(msg_type) => msg_type,
            None => return Response::error(req_id, MISSING_TYPE_ERROR),
        };
        let message = match Message::parse(&msg_type, &envelope.data) {
            Ok(message) => message,
            Err(detail) => return Response::error(req_id, detail),
        };

        match message {
            Message::Ping => self.handle_ping(req_id),
            Message::FindSuccessor { id } => self.handle_find_successor(req_id, id, &raw).await,
            Message::GetSuccessor => Response::ok(req_id, json!({ "successor": self.successor() })),
            Message::GetPredecessor => {
                Response::ok(req_id, json!({ "predecessor": self.predecessor() }))
            }
            Message::SetSuccessor { node } => {
                debug!("Setting successor to {}", node);
                self.set_successor(node.clone());
                Response::ok(req_id, json!({ "successor": node }))
            }
            Message::SetPredecessor { node } => {
                debug!("Setting predecessor to {}", node);
                self.set_predecessor(node.clone());
                Response::ok(req_id, json!({ "predecessor": node }))
            }
            Message::JoinRequest { new_node } => self.handle_join_request(req_id, new_node).await,
            Message::TransferKeys { new_node } => self.handle_transfer_keys(req_id, new_node).await,
            Message::BulkInsert { items } => self.handle_bulk_insert(req_id, items),
            Message::Insert { key, value } => self.handle_insert(req_id, key, value, &raw).await,
            Message::Query { key } => self.handle_query(req_id, key, &raw).await,
            Message::Delete { key } => self.handle_delete(req_id, key, &raw).await,
            Message::QueryAll { start_id, acc } => {
                self.handle_query_all(req_id, start_id, acc).await
            }
            Message::Overlay { start_id, acc } => self.handle_overlay(req_id, start_id, acc).await,
            Message::Depart => self.handle_depart(req_id).await,
            Message::Unknown { received_type } => {
                warn!("Received message of unknown type {}", received_type);
                Response::unknown(req_id, &received_type)
            }
        }
    }

    fn handle_ping(&self, req_id: Option<String>) -> Response {
        Response::ok(
            req_id,
            json!({
                "node_id": self.node.id,
                "ip": self.node.ip,
                "port": self.node.port,
                "successor": self.successor(),
                "predecessor": self.predecessor(),
            }),
        )
    }

    /// Passes the envelope to the successor unchanged and relays the
    /// downstream reply. A transport failure becomes a local ERROR reply.
    async fn forward_to_successor(&self, raw: &Value) -> Response {
        let successor = self.successor();
        debug!("Forwarding request to successor {}", successor);
        match net::send_request(
            &successor.address(),
            raw,
            self.config.request_timeout_millis,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Forward to {} failed: {}", successor, e);
                let req_id = raw
                    .get("req_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Response::error(req_id, e.to_string())
            }
        }
    }

    async fn handle_find_successor(
        &self,
        req_id: Option<String>,
        id: HashPos,
        raw: &Value,
    ) -> Response {
        let successor = self.successor();
        debug!("Received find_successor call for {}", id);
        if successor.id == self.node.id {
            return Response::ok(req_id, json!({ "successor": self.node }));
        }
        if in_interval(id, self.node.id, successor.id) {
            return Response::ok(req_id, json!({ "successor": successor }));
        }
        self.forward_to_successor(raw).await
    }

    async fn handle_join_request(&self, req_id: Option<String>, new_node: NodeRef) -> Response {
        if new_node.id == self.node.id {
            return Response::error(req_id, "a node with this id is already part of the ring");
        }
        if self.is_alone() {
            info!("Bootstrapping a two node ring with {}", new_node);
            self.set_successor(new_node.clone());
            self.set_predecessor(new_node);
            return Response::ok(
                req_id,
                json!({
                    "successor": self.node,
                    "predecessor": self.node,
                    "mode": "two_node_bootstrap",
                }),
            );
        }
        match self.find_successor(new_node.id).await {
            Ok(successor) => {
                info!("Join of {} lands before {}", new_node, successor);
                Response::ok(req_id, json!({ "successor": successor, "mode": "normal" }))
            }
            Err(e) => {
                error!("Successor lookup for joining node {} failed: {}", new_node, e);
                Response::error(req_id, e.to_string())
            }
        }
    }

    /// Ships every record of the newcomer's arc to it in one `BULK_INSERT`,
    /// deleting the shipped entries locally once the newcomer acknowledged.
    async fn handle_transfer_keys(&self, req_id: Option<String>, new_node: NodeRef) -> Response {
        let predecessor = self.predecessor();
        // If the newcomer is already our predecessor (two node bootstrap),
        // the pre-join left bound was this node itself.
        let left = if predecessor.id == new_node.id {
            self.node.id
        } else {
            predecessor.id
        };
        let right = new_node.id;

        let items: Vec<TransferItem> = self
            .storage
            .get_all()
            .into_iter()
            .filter(|(key_id, _)| in_interval(*key_id, left, right))
            .map(|(key_id, record)| TransferItem {
                key_id,
                key: record.key,
                value: record.value,
            })
            .collect();

        if items.is_empty() {
            return Response::ok(req_id, json!({ "moved": 0 }));
        }

        let moved = items.len();
        let transferred: Vec<HashPos> = items.iter().map(|item| item.key_id).collect();
        match self
            .request_peer(&new_node, Message::BulkInsert { items })
            .await
        {
            Ok(_) => {
                for key_id in transferred {
                    self.storage.delete(key_id);
                }
                info!("Handed over {} records from ({}, {}] to {}", moved, left, right, new_node);
                Response::ok(req_id, json!({ "moved": moved }))
            }
            Err(e) => {
                error!("Key transfer to {} failed: {}", new_node, e);
                Response::error(req_id, e.to_string())
            }
        }
    }

    fn handle_bulk_insert(&self, req_id: Option<String>, items: Vec<TransferItem>) -> Response {
        let count = items.len();
        for item in items {
            self.storage.insert(item.key_id, &item.key, &item.value);
        }
        debug!("Bulk insert absorbed {} records", count);
        Response::ok(req_id, json!({ "count": count }))
    }

    async fn handle_insert(
        &self,
        req_id: Option<String>,
        key: String,
        value: String,
        raw: &Value,
    ) -> Response {
        let key_id = hash(key.as_bytes());
        if !self.is_responsible(key_id) {
            return self.forward_to_successor(raw).await;
        }
        info!("Received INSERT for key {:?} ({})", key, key_id);
        self.storage.insert(key_id, &key, &value);
        Response::ok(req_id, json!({ "stored_at": self.node.port }))
    }

    async fn handle_query(&self, req_id: Option<String>, key: String, raw: &Value) -> Response {
        if key == "*" {
            return self.start_query_all(req_id).await;
        }
        let key_id = hash(key.as_bytes());
        if !self.is_responsible(key_id) {
            return self.forward_to_successor(raw).await;
        }
        debug!("Received QUERY for key {:?} ({})", key, key_id);
        Response::ok(req_id, json!({ "result": self.storage.query(key_id) }))
    }

    async fn handle_delete(&self, req_id: Option<String>, key: String, raw: &Value) -> Response {
        let key_id = hash(key.as_bytes());
        if !self.is_responsible(key_id) {
            return self.forward_to_successor(raw).await;
        }
        info!("Received DELETE for key {:?} ({})", key, key_id);
        self.storage.delete(key_id);
        Response::ok(req_id, json!({ "deleted_from": self.node.port }))
    }

    /// A `QUERY` for the literal key `*` turns into an accumulator
    /// traversal over the whole ring, keeping the client's request id.
    async fn start_query_all(&self, req_id: Option<String>) -> Response {
        let mut acc: StoreDump = HashMap::new();
        acc.insert(self.node.address(), self.storage.get_all());
        if self.is_alone() {
            return Response::ok(req_id, json!({ "result": acc }));
        }
        let request = Message::QueryAll {
            start_id: self.node.id,
            acc,
        }
        .to_request_with_id(&self.origin(), req_id.clone());
        self.forward_to_successor(&request).await
    }

    async fn handle_query_all(
        &self,
        req_id: Option<String>,
        start_id: HashPos,
        mut acc: StoreDump,
    ) -> Response {
        acc.insert(self.node.address(), self.storage.get_all());
        let successor = self.successor();
        if successor.id == start_id {
            return Response::ok(req_id, json!({ "result": acc }));
        }
        let request =
            Message::QueryAll { start_id, acc }.to_request_with_id(&self.origin(), req_id.clone());
        self.forward_to_successor(&request).await
    }

    /// `OVERLAY` without a `start_id` marks this node as the traversal
    /// initiator; with one it appends itself and passes the ring along.
    async fn handle_overlay(
        &self,
        req_id: Option<String>,
        start_id: Option<HashPos>,
        mut acc: Vec<NodeRef>,
    ) -> Response {
        let start_id = match start_id {
            None => {
                acc = vec![self.node.clone()];
                if self.is_alone() {
                    return Response::ok(req_id, json!({ "ring": acc }));
                }
                self.node.id
            }
            Some(start_id) => {
                acc.push(self.node.clone());
                let successor = self.successor();
                if successor.id == start_id {
                    return Response::ok(req_id, json!({ "ring": acc }));
                }
                start_id
            }
        };
        let request = Message::Overlay {
            start_id: Some(start_id),
            acc,
        }
        .to_request_with_id(&self.origin(), req_id.clone());
        self.forward_to_successor(&request).await
    }

    /// Graceful depart: hand every record to the successor, splice the
    /// neighbors together, then return to the alone state. The process
    /// keeps running; only the ring identity is given up.
    async fn handle_depart(&self, req_id: Option<String>) -> Response {
        if self.is_alone() {
            info!("Depart requested, but this node is alone; nothing to hand off");
            return Response::ok(req_id, json!({ "msg": "node was alone; departed" }));
        }
        let successor = self.successor();
        let predecessor = self.predecessor();

        let records = self.storage.get_all();
        if !records.is_empty() {
            let items: Vec<TransferItem> = records
                .into_iter()
                .map(|(key_id, record)| TransferItem {
                    key_id,
                    key: record.key,
                    value: record.value,
                })
                .collect();
            let count = items.len();
            if let Err(e) = self
                .request_peer(&successor, Message::BulkInsert { items })
                .await
            {
                error!("Depart hand-off to {} failed: {}", successor, e);
                return Response::error(req_id, e.to_string());
            }
            info!("Handed over {} records to {}", count, successor);
        }

        if let Err(e) = self
            .request_peer(
                &predecessor,
                Message::SetSuccessor {
                    node: successor.clone(),
                },
            )
            .await
        {
            error!("Failed to relink predecessor {}: {}", predecessor, e);
            return Response::error(req_id, e.to_string());
        }
        if let Err(e) = self
            .request_peer(
                &successor,
                Message::SetPredecessor {
                    node: predecessor.clone(),
                },
            )
            .await
        {
            error!("Failed to relink successor {}: {}", successor, e);
            return Response::error(req_id, e.to_string());
        }

        self.storage.clear();
        self.set_successor(self.node.clone());
        self.set_predecessor(self.node.clone());
        info!("Departed the ring; {} and {} are now neighbors", predecessor, successor);
        Response::ok(
            req_id,
            json!({ "msg": format!("node {} departed", self.node) }),
        )
    }
}
