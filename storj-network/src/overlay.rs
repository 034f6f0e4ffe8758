//! Overlay seam
//!
//! The Kademlia overlay (contact lookup, RPC dispatch, pub/sub) is provided
//! by an external library. The client only needs these three primitives;
//! tests substitute an in-process fake.

use crate::contact::Contact;
use crate::error::Result;
use crate::protocol::RpcMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// The overlay operations the client consumes
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Send an RPC to a peer and await its reply.
    async fn send(&self, contact: &Contact, message: RpcMessage) -> Result<RpcMessage>;

    /// Publish our contact on a pub/sub topic.
    async fn publish(&self, topic: &str, contact: &Contact) -> Result<()>;

    /// Subscribe to a topic; published contacts arrive on the receiver.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Contact>>;
}
