//! Request authentication
//!
//! Two modes, at most one applied per request, keypair taking precedence:
//! - ECDSA: sign `METHOD PATH CANONICAL` where the canonical payload is the
//!   querystring for GET and the JSON body otherwise; attach the compressed
//!   public key and DER signature as `x-pubkey` / `x-signature`.
//! - Basic auth: email plus the SHA-256 hex of the plaintext password.

use storj_core::crypto::sha256_hex;
use storj_core::KeyPair;

/// Header carrying the hex compressed public key
pub const PUBKEY_HEADER: &str = "x-pubkey";

/// Header carrying the hex DER signature
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Configured authentication mode
#[derive(Clone)]
pub enum Auth {
    /// Unauthenticated (public endpoints only)
    None,
    /// Email plus hashed password
    Basic { email: String, password_hash: String },
    /// ECDSA request signing
    Key(KeyPair),
}

impl Auth {
    /// Basic auth from plaintext credentials; the password is hashed
    /// immediately and the plaintext is not retained.
    pub fn basic(email: impl Into<String>, password: &str) -> Self {
        Auth::Basic {
            email: email.into(),
            password_hash: sha256_hex(password.as_bytes()),
        }
    }

    /// Keypair request signing
    pub fn key(keypair: KeyPair) -> Self {
        Auth::Key(keypair)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Auth::None)
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => write!(f, "Auth::None"),
            Auth::Basic { email, .. } => write!(f, "Auth::Basic({})", email),
            Auth::Key(kp) => write!(f, "Auth::Key({})", kp.node_id()),
        }
    }
}

/// Render a JSON object as a querystring. `serde_json` maps iterate in key
/// order, so the rendering is canonical for signing.
pub fn querystring(params: &serde_json::Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());

    if let Some(map) = params.as_object() {
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            serializer.append_pair(key, &rendered);
        }
    }

    serializer.finish()
}

/// The canonical payload covered by the request signature: the querystring
/// for GET, the compact JSON body for everything else.
pub fn canonical_payload(method: &str, params: &serde_json::Value) -> String {
    if method == "GET" {
        querystring(params)
    } else {
        params.to_string()
    }
}

/// The signed message: `METHOD PATH CANONICAL`.
pub fn signature_message(method: &str, path: &str, canonical: &str) -> String {
    format!("{} {} {}", method, path, canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_auth_hashes_password() {
        let auth = Auth::basic("g@s.io", "password");
        match auth {
            Auth::Basic { email, password_hash } => {
                assert_eq!(email, "g@s.io");
                assert_eq!(
                    password_hash,
                    "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
                );
            }
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn test_querystring_sorted_keys() {
        let qs = querystring(&json!({"skip": 6, "limit": 6, "exclude": "a,b"}));
        // serde_json object keys iterate sorted
        assert_eq!(qs, "exclude=a%2Cb&limit=6&skip=6");
    }

    #[test]
    fn test_canonical_payload_by_method() {
        let params = json!({"operation": "PULL"});
        assert_eq!(canonical_payload("GET", &params), "operation=PULL");
        assert_eq!(canonical_payload("POST", &params), r#"{"operation":"PULL"}"#);
    }

    #[test]
    fn test_signature_message_layout() {
        assert_eq!(
            signature_message("GET", "/buckets", "limit=10"),
            "GET /buckets limit=10"
        );
    }
}
