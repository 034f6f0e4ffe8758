//! Bridge wire models
//!
//! Serde types for the bridge's JSON surface. Field names follow the wire
//! contract (`nodeID`, camelCase timestamps).

use serde::{Deserialize, Serialize};

/// A farmer endpoint as issued inside contracts and pointers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerContact {
    pub address: String,
    pub port: u16,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl FarmerContact {
    /// `host:port` endpoint for the data channel
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Bridge info from `GET /`
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeInfo {
    #[serde(default)]
    pub info: serde_json::Value,
    #[serde(default)]
    pub host: Option<String>,
}

/// A bucket: a namespace handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created: Option<String>,
}

/// A file entry inside a bucket, referencing a promoted frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    #[serde(default)]
    pub bucket: Option<String>,
    pub frame: String,
    pub mimetype: String,
    pub filename: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A short-lived capability scoped to one bucket and operation
#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    pub token: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
}

/// Token operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Push,
    Pull,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Push => "PUSH",
            Operation::Pull => "PULL",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staging frame: the bridge-side mutable set of shard entries
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    pub id: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub shards: Vec<serde_json::Value>,
}

/// The bridge's answer to adding a shard to a frame: a storage contract
/// plus the farmer to push the shard to
#[derive(Debug, Clone, Deserialize)]
pub struct ShardContract {
    #[serde(default)]
    pub hash: Option<String>,
    pub token: String,
    #[serde(default)]
    pub operation: Option<String>,
    pub farmer: FarmerContact,
}

/// A pointer: an issued capability to read one shard at one farmer
#[derive(Debug, Clone, Deserialize)]
pub struct Pointer {
    pub index: usize,
    pub size: u64,
    pub hash: String,
    pub token: String,
    pub farmer: FarmerContact,
}

/// A registered public key record from `GET /keys`
#[derive(Debug, Clone, Deserialize)]
pub struct PublicKey {
    pub key: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// A contact page entry from `GET /contacts`
#[derive(Debug, Clone, Deserialize)]
pub struct ContactRecord {
    pub address: String,
    pub port: u16,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_wire_form() {
        let json = r#"{
            "index": 0,
            "size": 2097152,
            "hash": "fde400fe0b6a5a454679266e6b39bbd1768f2f54",
            "token": "99cf1af00b552113a856f8ef44f58d4269bd2a83",
            "farmer": {
                "address": "127.0.0.1",
                "port": 8080,
                "nodeID": "32033d2dc11b877df4b1caefbffba06495ae6b18"
            }
        }"#;

        let pointer: Pointer = serde_json::from_str(json).unwrap();
        assert_eq!(pointer.index, 0);
        assert_eq!(pointer.farmer.endpoint(), "127.0.0.1:8080");
        assert_eq!(
            pointer.farmer.node_id,
            "32033d2dc11b877df4b1caefbffba06495ae6b18"
        );
    }

    #[test]
    fn test_operation_strings() {
        assert_eq!(Operation::Push.as_str(), "PUSH");
        assert_eq!(Operation::Pull.to_string(), "PULL");
    }

    #[test]
    fn test_farmer_contact_serializes_node_id() {
        let farmer = FarmerContact {
            address: "10.0.0.1".into(),
            port: 4000,
            node_id: "ab".repeat(20),
            protocol: None,
        };
        let value = serde_json::to_value(&farmer).unwrap();
        assert!(value.get("nodeID").is_some());
        assert!(value.get("protocol").is_none());
    }
}
