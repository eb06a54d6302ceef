//! The request/response envelope shared by every peer exchange.
//!
//! On the wire a request is `{type, req_id, origin, data}` and a response is
//! `{status, req_id, data, error?}`, both as length-prefixed JSON. Incoming
//! requests decode into the closed [`Message`] sum by dispatching on `type`;
//! types outside the catalog land in `Message::Unknown`.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::NodeError;
use crate::kv::KvStore;
use crate::node::NodeRef;
use crate::utils::crypto::HashPos;
use crate::utils::types::Address;

pub static MISSING_TYPE_ERROR: &str = "Missing 'type' field";

/// `QUERY_ALL` accumulator: `ip:port` of each visited node to a snapshot of
/// its local store.
pub type StoreDump = HashMap<Address, KvStore>;

/// Initial sender of a request. Recorded for diagnostics, never used for
/// routing; clients send `{ip: "client", port: 0}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::Unknown => "UNKNOWN",
        })
    }
}

/// Raw shape of an incoming request, before dispatch. Every field is
/// optional so that validation errors stay reportable per field.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub req_id: Option<String>,
    pub origin: Option<Origin>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub req_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(req_id: Option<String>, data: Value) -> Response {
        Response {
            status: Status::Ok,
            req_id,
            data,
            error: None,
        }
    }

    pub fn error(req_id: Option<String>, error: impl Into<String>) -> Response {
        Response {
            status: Status::Error,
            req_id,
            data: json!({}),
            error: Some(error.into()),
        }
    }

    pub fn unknown(req_id: Option<String>, received_type: &str) -> Response {
        Response {
            status: Status::Unknown,
            req_id,
            data: json!({ "received_type": received_type }),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// A record in flight during `TRANSFER_KEYS` / `BULK_INSERT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub key_id: HashPos,
    pub key: String,
    pub value: String,
}

/// The closed message catalog. One variant per wire type, plus `Unknown`
/// for everything outside the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping,
    FindSuccessor { id: HashPos },
    GetSuccessor,
    GetPredecessor,
    SetSuccessor { node: NodeRef },
    SetPredecessor { node: NodeRef },
    JoinRequest { new_node: NodeRef },
    TransferKeys { new_node: NodeRef },
    BulkInsert { items: Vec<TransferItem> },
    Insert { key: String, value: String },
    Query { key: String },
    Delete { key: String },
    QueryAll { start_id: HashPos, acc: StoreDump },
    Overlay { start_id: Option<HashPos>, acc: Vec<NodeRef> },
    Depart,
    Unknown { received_type: String },
}

#[derive(Deserialize)]
struct FindSuccessorData {
    id: HashPos,
}

#[derive(Deserialize)]
struct PointerData {
    node: NodeRef,
}

#[derive(Deserialize)]
struct NewNodeData {
    new_node: NodeRef,
}

#[derive(Deserialize)]
struct BulkInsertData {
    items: Vec<TransferItem>,
}

#[derive(Deserialize)]
struct InsertData {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct KeyData {
    key: String,
}

#[derive(Deserialize)]
struct QueryAllData {
    start_id: HashPos,
    #[serde(default)]
    acc: StoreDump,
}

#[derive(Deserialize)]
struct OverlayData {
    #[serde(default)]
    start_id: Option<HashPos>,
    #[serde(default)]
    acc: Vec<NodeRef>,
}

fn fields<T: DeserializeOwned>(msg_type: &str, data: &Value) -> Result<T, String> {
    let data = if data.is_null() {
        json!({})
    } else {
        data.clone()
    };
    serde_json::from_value(data).map_err(|e| format!("invalid {} request: {}", msg_type, e))
}

impl Message {
    /// Dispatch on the wire type. An unrecognized type is not an error;
    /// it decodes to `Unknown` and is answered with `status = "UNKNOWN"`.
    pub fn parse(msg_type: &str, data: &Value) -> Result<Message, String> {
        Ok(match msg_type {
            "PING" => Message::Ping,
            "FIND_SUCCESSOR" => {
                let FindSuccessorData { id } = fields(msg_type, data)?;
                Message::FindSuccessor { id }
            }
            "GET_SUCCESSOR" => Message::GetSuccessor,
            "GET_PREDECESSOR" => Message::GetPredecessor,
            "SET_SUCCESSOR" => {
                let PointerData { node } = fields(msg_type, data)?;
                Message::SetSuccessor { node }
            }
            "SET_PREDECESSOR" => {
                let PointerData { node } = fields(msg_type, data)?;
                Message::SetPredecessor { node }
            }
            "JOIN_REQUEST" => {
                let NewNodeData { new_node } = fields(msg_type, data)?;
                Message::JoinRequest { new_node }
            }
            "TRANSFER_KEYS" => {
                let NewNodeData { new_node } = fields(msg_type, data)?;
                Message::TransferKeys { new_node }
            }
            "BULK_INSERT" => {
                let BulkInsertData { items } = fields(msg_type, data)?;
                Message::BulkInsert { items }
            }
            "INSERT" => {
                let InsertData { key, value } = fields(msg_type, data)?;
                Message::Insert { key, value }
            }
            "QUERY" => {
                let KeyData { key } = fields(msg_type, data)?;
                Message::Query { key }
            }
            "DELETE" => {
                let KeyData { key } = fields(msg_type, data)?;
                Message::Delete { key }
            }
            "QUERY_ALL" => {
                let QueryAllData { start_id, acc } = fields(msg_type, data)?;
                Message::QueryAll { start_id, acc }
            }
            "OVERLAY" => {
                let OverlayData { start_id, acc } = fields(msg_type, data)?;
                Message::Overlay { start_id, acc }
            }
            "DEPART" => Message::Depart,
            other => Message::Unknown {
                received_type: other.to_string(),
            },
        })
    }

    pub fn wire_type(&self) -> &str {
        match self {
            Message::Ping => "PING",
            Message::FindSuccessor { .. } => "FIND_SUCCESSOR",
            Message::GetSuccessor => "GET_SUCCESSOR",
            Message::GetPredecessor => "GET_PREDECESSOR",
            Message::SetSuccessor { .. } => "SET_SUCCESSOR",
            Message::SetPredecessor { .. } => "SET_PREDECESSOR",
            Message::JoinRequest { .. } => "JOIN_REQUEST",
            Message::TransferKeys { .. } => "TRANSFER_KEYS",
            Message::BulkInsert { .. } => "BULK_INSERT",
            Message::Insert { .. } => "INSERT",
            Message::Query { .. } => "QUERY",
            Message::Delete { .. } => "DELETE",
            Message::QueryAll { .. } => "QUERY_ALL",
            Message::Overlay { .. } => "OVERLAY",
            Message::Depart => "DEPART",
            Message::Unknown { received_type } => received_type,
        }
    }

    fn to_data(&self) -> Value {
        match self {
            Message::Ping
            | Message::GetSuccessor
            | Message::GetPredecessor
            | Message::Depart
            | Message::Unknown { .. } => json!({}),
            Message::FindSuccessor { id } => json!({ "id": id }),
            Message::SetSuccessor { node } | Message::SetPredecessor { node } => {
                json!({ "node": node })
            }
            Message::JoinRequest { new_node } | Message::TransferKeys { new_node } => {
                json!({ "new_node": new_node })
            }
            Message::BulkInsert { items } => json!({ "items": items }),
            Message::Insert { key, value } => json!({ "key": key, "value": value }),
            Message::Query { key } | Message::Delete { key } => json!({ "key": key }),
            Message::QueryAll { start_id, acc } => json!({ "start_id": start_id, "acc": acc }),
            Message::Overlay { start_id, acc } => match start_id {
                Some(start_id) => json!({ "start_id": start_id, "acc": acc }),
                None => json!({}),
            },
        }
    }

    /// Builds a complete request envelope with a fresh request id.
    pub fn to_request(&self, origin: &Origin) -> Value {
        self.to_request_with_id(origin, None)
    }

    /// Traversals and rewritten requests keep the id of the request that
    /// triggered them, so the reply unwinds with the id the client sent.
    pub fn to_request_with_id(&self, origin: &Origin, req_id: Option<String>) -> Value {
        json!({
            "type": self.wire_type(),
            "req_id": req_id.unwrap_or_else(new_req_id),
            "origin": origin,
            "data": self.to_data(),
        })
    }
}

pub fn new_req_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Unwraps an OK response or surfaces the peer-reported failure.
pub fn expect_ok(addr: &Address, response: Response) -> Result<Value, NodeError> {
    match response.status {
        Status::Ok => Ok(response.data),
        status => Err(NodeError::Peer {
            addr: addr.clone(),
            status: status.to_string(),
            message: response
                .error
                .unwrap_or_else(|| "peer reported no error detail".to_string()),
        }),
    }
}

/// Pulls one typed field out of a peer's response `data`.
pub fn data_field<T: DeserializeOwned>(data: &Value, field: &str) -> Result<T, NodeError> {
    let value = data.get(field).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| NodeError::Protocol(format!("bad '{}' field in peer reply: {}", field, e)))
}
