//! Storj Network Library
//!
//! The peer substrate of the client:
//! - Signed RPC envelopes with nonce freshness and version gating
//! - Per-node token-bucket rate limiting
//! - Tunnel discovery over the overlay's pub/sub topics
//! - Direct framed data channels to farmers for shard transfer
//!
//! The DHT overlay itself (contact routing, RPC dispatch, pub/sub) is an
//! external collaborator behind the [`Overlay`] trait.

pub mod channel;
pub mod contact;
pub mod error;
pub mod overlay;
pub mod protocol;
pub mod ratelimit;
pub mod tunnel;

pub use channel::{ChannelFactory, ChannelState, DataChannel, ShardChannel, TcpChannelFactory};
pub use contact::Contact;
pub use error::{NetworkError, Result};
pub use overlay::Overlay;
pub use protocol::{Protocol, RpcMessage, NONCE_TOLERANCE_MS, PROTOCOL_VERSION};
pub use ratelimit::RateLimiter;
pub use tunnel::{TunnelClient, TunnelServerState, TunnelerSet};
