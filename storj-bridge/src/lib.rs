//! Storj Bridge Client
//!
//! Authenticated HTTP client for the bridge: the trusted coordinator that
//! holds buckets, files, staging frames, and contracts, and brokers farmer
//! assignments. Requests are signed with a secp256k1 keypair or fall back
//! to basic auth; response outcomes are normalized into [`BridgeError`].

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod transport;

pub use auth::Auth;
pub use client::{BridgeClient, BridgeOptions};
pub use error::{BridgeError, Result};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Default bridge URI when neither an explicit URI nor `STORJ_BRIDGE` is set.
pub const DEFAULT_BRIDGE_URL: &str = "https://api.storj.io";

/// Environment variable overriding the default bridge URI.
pub const BRIDGE_URL_ENV: &str = "STORJ_BRIDGE";
