//! Overlay contacts.

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A peer on the overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub address: String,
    pub port: u16,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    /// Protocol version the peer speaks (`major.minor.patch`)
    pub protocol: String,
}

impl Contact {
    /// Create a contact, validating the 160-bit hex node identifier.
    pub fn new(
        address: impl Into<String>,
        port: u16,
        node_id: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Result<Self> {
        let node_id = node_id.into();
        if !is_valid_node_id(&node_id) {
            return Err(NetworkError::InvalidContact(format!(
                "invalid nodeID: {}",
                node_id
            )));
        }
        Ok(Self {
            address: address.into(),
            port,
            node_id,
            protocol: protocol.into(),
        })
    }

    /// `host:port` endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            &self.node_id[..8.min(self.node_id.len())],
            self.address,
            self.port
        )
    }
}

/// A nodeID is the hex form of `rmd160(sha256(pubkey))`: 40 hex chars.
pub fn is_valid_node_id(node_id: &str) -> bool {
    node_id.len() == 40 && node_id.chars().all(|c| c.is_ascii_hexdigit())
}
