//! Peer-message protocol
//!
//! Every overlay message is an RPC envelope `{ method, id, params }`.
//! Outbound messages get a millisecond nonce and a recoverable signature
//! over `method || id || JSON(params)`; inbound messages are gated on
//! protocol version, nonce freshness, and signature recovery against the
//! sender's nodeID.

use crate::contact::Contact;
use crate::error::{NetworkError, Result};
use crate::ratelimit::RateLimiter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use storj_core::crypto::sha256_rmd160;
use storj_core::keypair::{recover_public_key, verify_with_key};
use storj_core::KeyPair;
use tracing::debug;

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: &str = "1.2.0";

/// Maximum accepted age of a message nonce, in milliseconds
pub const NONCE_TOLERANCE_MS: i64 = 5_000;

/// An RPC envelope exchanged between overlay nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    pub method: String,
    pub id: String,
    pub params: Map<String, Value>,
}

impl RpcMessage {
    /// Create an envelope with a random message id.
    pub fn new(method: impl Into<String>, params: Map<String, Value>) -> Self {
        use rand::RngCore;
        let mut id_bytes = [0u8; 20];
        rand::rngs::OsRng.fill_bytes(&mut id_bytes);

        Self {
            method: method.into(),
            id: hex::encode(id_bytes),
            params,
        }
    }

    /// An error reply to a received message.
    pub fn error_reply(id: &str, message: &str) -> Self {
        let mut params = Map::new();
        params.insert("error".to_string(), json!(message));
        Self {
            method: "ERROR".to_string(),
            id: id.to_string(),
            params,
        }
    }

    /// Whether this message reports an error.
    pub fn error(&self) -> Option<&str> {
        self.params.get("error").and_then(Value::as_str)
    }

    /// The canonical byte string covered by the signature:
    /// `method || id || JSON(params without signature)`. `serde_json`
    /// object keys iterate sorted, so the JSON rendering is stable.
    fn signed_payload(&self) -> String {
        let mut params = self.params.clone();
        params.remove("signature");
        format!("{}{}{}", self.method, self.id, Value::Object(params))
    }
}

/// Signs outbound and verifies inbound envelopes, caching recovered
/// public keys by nodeID.
pub struct Protocol {
    keypair: KeyPair,
    version: String,
    pubkey_cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl Protocol {
    pub fn new(keypair: KeyPair) -> Self {
        Self {
            keypair,
            version: PROTOCOL_VERSION.to_string(),
            pubkey_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Our own nodeID.
    pub fn node_id(&self) -> String {
        self.keypair.node_id()
    }

    /// Add a `nonce` and `signature` to an outbound message.
    pub fn sign_message(&self, message: &mut RpcMessage) -> Result<()> {
        message
            .params
            .insert("nonce".to_string(), json!(unix_millis()));

        let payload = message.signed_payload();
        let signature = self
            .keypair
            .sign_recoverable(payload.as_bytes())
            .map_err(|_| NetworkError::SignatureFailed)?;
        message
            .params
            .insert("signature".to_string(), json!(signature));
        Ok(())
    }

    /// Verify an inbound message against its sender contact.
    pub fn verify_message(&self, message: &RpcMessage, contact: &Contact) -> Result<()> {
        if !version_compatible(&self.version, &contact.protocol) {
            return Err(NetworkError::IncompatibleVersion);
        }

        let nonce = message
            .params
            .get("nonce")
            .and_then(Value::as_i64)
            .ok_or_else(|| NetworkError::MissingParams("nonce".to_string()))?;
        if unix_millis() - nonce > NONCE_TOLERANCE_MS {
            return Err(NetworkError::SignatureExpired);
        }

        let signature = message
            .params
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| NetworkError::MissingParams("signature".to_string()))?;
        let payload = message.signed_payload();

        if let Some(cached) = self.pubkey_cache.read().get(&contact.node_id) {
            return verify_with_key(cached, payload.as_bytes(), signature)
                .map_err(|_| NetworkError::SignatureFailed);
        }

        let pubkey = recover_public_key(payload.as_bytes(), signature)
            .map_err(|_| NetworkError::SignatureFailed)?;
        if hex::encode(sha256_rmd160(&pubkey)) != contact.node_id {
            return Err(NetworkError::SignatureFailed);
        }

        debug!(node_id = %contact.node_id, "caching recovered public key");
        self.pubkey_cache
            .write()
            .insert(contact.node_id.clone(), pubkey);
        Ok(())
    }

    /// Gate an inbound message on the rate limiter, then verify it.
    /// A limited sender gets an error reply and the message is dropped.
    pub fn verify_incoming(
        &self,
        message: &RpcMessage,
        contact: &Contact,
        limiter: &RateLimiter,
    ) -> Result<()> {
        if !limiter.check(&contact.node_id) {
            return Err(NetworkError::RateLimited(contact.node_id.clone()));
        }
        self.verify_message(message, contact)
    }
}

/// Versions are compatible when major and minor match.
fn version_compatible(ours: &str, theirs: &str) -> bool {
    let split = |v: &str| -> Option<(u32, u32)> {
        let mut parts = v.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    };
    match (split(ours), split(theirs)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
