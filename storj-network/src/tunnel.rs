//! Tunnel discovery
//!
//! NAT-restricted nodes locate traffic relays ("tunnelers") through two
//! pub/sub topics: `0e00` announces tunnel capacity, `0e01` withdraws it.
//! Every node keeps a bounded set of known tunnelers; a restricted node
//! probes its reachability through a seed and, on failure, asks neighbors
//! for a tunneler and opens a tunnel through it.

use crate::contact::Contact;
use crate::error::{NetworkError, Result};
use crate::overlay::Overlay;
use crate::protocol::{Protocol, RpcMessage};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Topic announcing tunnel capacity
pub const TOPIC_TUNNEL_AVAILABLE: &str = "0e00";

/// Topic withdrawing tunnel capacity
pub const TOPIC_TUNNEL_UNAVAILABLE: &str = "0e01";

/// Maximum tunnelers remembered per node
pub const MAX_TUNNELERS: usize = 20;

/// Bounded set of known tunneler contacts
pub struct TunnelerSet {
    contacts: Mutex<Vec<Contact>>,
    capacity: usize,
}

impl TunnelerSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            contacts: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Add a tunneler if there is room and it is not already known.
    /// Returns whether the contact is in the set afterwards.
    pub fn add(&self, contact: Contact) -> bool {
        let mut contacts = self.contacts.lock();
        if contacts.iter().any(|c| c.node_id == contact.node_id) {
            return true;
        }
        if contacts.len() >= self.capacity {
            return false;
        }
        contacts.push(contact);
        true
    }

    /// Remove a tunneler by nodeID.
    pub fn remove(&self, node_id: &str) {
        self.contacts.lock().retain(|c| c.node_id != node_id);
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.contacts.lock().iter().any(|c| c.node_id == node_id)
    }

    pub fn len(&self) -> usize {
        self.contacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.lock().is_empty()
    }

    /// Any known tunneler, if one exists.
    pub fn pick(&self) -> Option<Contact> {
        self.contacts.lock().first().cloned()
    }

    /// Apply a pub/sub announcement to the set.
    pub fn handle_announcement(&self, topic: &str, contact: Contact) {
        match topic {
            TOPIC_TUNNEL_AVAILABLE => {
                if !self.add(contact) {
                    debug!("tunneler set full, announcement ignored");
                }
            }
            TOPIC_TUNNEL_UNAVAILABLE => self.remove(&contact.node_id),
            other => warn!(topic = other, "unknown tunnel topic"),
        }
    }
}

impl Default for TunnelerSet {
    fn default() -> Self {
        Self::new(MAX_TUNNELERS)
    }
}

/// Address of an established tunnel entrance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub address: String,
    pub port: u16,
}

/// Announcement state for a node that serves tunnels itself
pub struct TunnelServerState {
    capacity: usize,
    active: Mutex<usize>,
}

impl TunnelServerState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: Mutex::new(0),
        }
    }

    pub fn has_tunnel_available(&self) -> bool {
        *self.active.lock() < self.capacity
    }

    /// A tunnel was opened. Returns the topic to publish when the server
    /// just ran out of capacity (`locked`).
    pub fn on_opened(&self) -> Option<&'static str> {
        let mut active = self.active.lock();
        *active += 1;
        (*active >= self.capacity).then_some(TOPIC_TUNNEL_UNAVAILABLE)
    }

    /// A tunnel was closed (`unlocked`). Returns the topic to publish:
    /// availability if capacity remains, withdrawal otherwise.
    pub fn on_closed(&self) -> &'static str {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        if *active < self.capacity {
            TOPIC_TUNNEL_AVAILABLE
        } else {
            TOPIC_TUNNEL_UNAVAILABLE
        }
    }
}

/// Tunnel discovery client for a possibly NAT-restricted node
pub struct TunnelClient {
    overlay: Arc<dyn Overlay>,
    protocol: Arc<Protocol>,
    contact: Contact,
    tunnelers: Arc<TunnelerSet>,
}

impl TunnelClient {
    pub fn new(overlay: Arc<dyn Overlay>, protocol: Arc<Protocol>, contact: Contact) -> Self {
        Self {
            overlay,
            protocol,
            contact,
            tunnelers: Arc::new(TunnelerSet::default()),
        }
    }

    pub fn tunnelers(&self) -> Arc<TunnelerSet> {
        self.tunnelers.clone()
    }

    /// Full setup: probe reachability through the first seed; when the
    /// probe fails, locate a tunneler via the neighbors and open a tunnel,
    /// then follow tunneler announcements.
    pub async fn setup(&self, seeds: &[Contact]) -> Result<Option<TunnelInfo>> {
        let seed = seeds.first().ok_or(NetworkError::NoProbeNeighbor)?;

        match self.request_probe(seed).await {
            Ok(()) => {
                debug!("probe succeeded, node is directly reachable");
                Ok(None)
            }
            Err(NetworkError::ProbeFailed(reason)) => {
                info!(%reason, "probe failed, establishing tunnel");
                let tunneler = self.find_tunnel(seeds).await?;
                let info = self.establish_tunnel(&tunneler).await?;
                self.follow_announcements().await?;
                Ok(Some(info))
            }
            Err(err) => Err(err),
        }
    }

    /// Ask `seed` to probe us back. An error in the reply body means our
    /// node is not reachable from outside.
    pub async fn request_probe(&self, seed: &Contact) -> Result<()> {
        let mut params = Map::new();
        params.insert("contact".to_string(), json!(self.contact));

        let mut message = RpcMessage::new("PROBE", params);
        self.protocol.sign_message(&mut message)?;

        let reply = self.overlay.send(seed, message).await?;
        match reply.error() {
            Some(error) => Err(NetworkError::ProbeFailed(error.to_string())),
            None => Ok(()),
        }
    }

    /// Ask neighbors for a known tunneler contact.
    pub async fn find_tunnel(&self, neighbors: &[Contact]) -> Result<Contact> {
        if neighbors.is_empty() {
            return Err(NetworkError::NoTunnelNeighbor);
        }

        for neighbor in neighbors {
            let mut params = Map::new();
            params.insert("contact".to_string(), json!(self.contact));

            let mut message = RpcMessage::new("FIND_TUNNEL", params);
            self.protocol.sign_message(&mut message)?;

            let reply = match self.overlay.send(neighbor, message).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(neighbor = %neighbor, %err, "tunnel query failed");
                    continue;
                }
            };

            let tunnels = reply
                .params
                .get("tunnels")
                .cloned()
                .and_then(|v| serde_json::from_value::<Vec<Contact>>(v).ok())
                .unwrap_or_default();

            if let Some(tunneler) = tunnels.into_iter().next() {
                self.tunnelers.add(tunneler.clone());
                return Ok(tunneler);
            }
        }

        Err(NetworkError::TunnelFailed(
            "no neighbor returned a tunneler".to_string(),
        ))
    }

    /// Open a tunnel through `tunneler` and return the entrance address.
    pub async fn establish_tunnel(&self, tunneler: &Contact) -> Result<TunnelInfo> {
        let mut params = Map::new();
        params.insert("contact".to_string(), json!(self.contact));

        let mut message = RpcMessage::new("OPEN_TUNNEL", params);
        self.protocol.sign_message(&mut message)?;

        let reply = self.overlay.send(tunneler, message).await?;
        if let Some(error) = reply.error() {
            return Err(NetworkError::TunnelFailed(error.to_string()));
        }

        let address = reply
            .params
            .get("address")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| NetworkError::MissingParams("address".to_string()))?
            .to_string();
        let port = reply
            .params
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| NetworkError::MissingParams("port".to_string()))?
            as u16;

        info!(%address, port, tunneler = %tunneler, "tunnel established");
        Ok(TunnelInfo { address, port })
    }

    /// Subscribe to both tunnel topics and keep the tunneler set current.
    pub async fn follow_announcements(&self) -> Result<()> {
        for topic in [TOPIC_TUNNEL_AVAILABLE, TOPIC_TUNNEL_UNAVAILABLE] {
            let mut rx = self.overlay.subscribe(topic).await?;
            let tunnelers = self.tunnelers.clone();
            tokio::spawn(async move {
                while let Some(contact) = rx.recv().await {
                    tunnelers.handle_announcement(topic, contact);
                }
            });
        }
        Ok(())
    }
}
