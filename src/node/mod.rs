use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::crypto::{hash, HashPos};
use crate::utils::types::Address;

/// Identity of a ring member. Refs are plain values, copied freely between
/// nodes; two refs denote the same member iff their ring positions match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRef {
    pub ip: String,
    pub port: u16,
    pub id: HashPos,
}

impl NodeRef {
    pub fn new(ip: &str, port: u16) -> NodeRef {
        NodeRef {
            ip: ip.to_string(),
            port,
            id: hash(format!("{}:{}", ip, port).as_bytes()),
        }
    }

    pub fn address(&self) -> Address {
        format!("{}:{}", self.ip, self.port)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
