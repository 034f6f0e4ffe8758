//! Bridge client
//!
//! Composes authenticated requests for the bridge HTTP surface and
//! normalizes response outcomes. One method per endpoint, mirroring the
//! bridge's REST layout.

use crate::auth::{
    canonical_payload, querystring, signature_message, Auth, PUBKEY_HEADER, SIGNATURE_HEADER,
};
use crate::error::{BridgeError, Result};
use crate::models::{
    Bucket, ContactRecord, FileEntry, Frame, Operation, Pointer, PublicKey, ShardContract, Token,
};
use crate::retry::with_backoff;
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::{BRIDGE_URL_ENV, DEFAULT_BRIDGE_URL};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storj_core::crypto::sha256_hex;
use storj_core::ShardMeta;
use tracing::{debug, instrument};

/// Client configuration
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Bridge base URI
    pub base_url: String,
    /// Total per-request timeout
    pub timeout: Duration,
    /// Retry budget for add-shard negotiation
    pub retries: usize,
    /// First backoff delay; doubles per attempt
    pub backoff_base: Duration,
    /// Authentication mode
    pub auth: Auth,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        // STORJ_BRIDGE is read once here and stored; no later env reads
        let base_url =
            std::env::var(BRIDGE_URL_ENV).unwrap_or_else(|_| DEFAULT_BRIDGE_URL.to_string());
        Self {
            base_url,
            timeout: Duration::from_secs(20),
            retries: 6,
            backoff_base: Duration::from_millis(500),
            auth: Auth::None,
        }
    }
}

impl BridgeOptions {
    /// Options pointing at an explicit bridge URI
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the authentication mode
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the add-shard retry budget
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Set the first backoff delay
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

/// Authenticated bridge client
#[derive(Clone)]
pub struct BridgeClient {
    options: BridgeOptions,
    transport: Arc<dyn Transport>,
}

impl BridgeClient {
    /// Create a client over the production HTTP transport
    pub fn new(options: BridgeOptions) -> Self {
        Self::with_transport(options, Arc::new(ReqwestTransport::new()))
    }

    /// Create a client over a custom transport (tests wire fakes here)
    pub fn with_transport(options: BridgeOptions, transport: Arc<dyn Transport>) -> Self {
        Self { options, transport }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Execute one bridge request: attach authentication, send, and
    /// normalize the outcome.
    #[instrument(skip(self, params), fields(method, path))]
    pub async fn request(&self, method: &str, path: &str, params: Value) -> Result<Value> {
        let mut params = if params.is_null() { json!({}) } else { params };

        let mut headers = Vec::new();
        let mut basic_auth = None;

        match &self.options.auth {
            Auth::Key(keypair) => {
                if let Some(map) = params.as_object_mut() {
                    map.insert("__nonce".to_string(), json!(unix_millis()));
                }
                let canonical = canonical_payload(method, &params);
                let message = signature_message(method, path, &canonical);
                headers.push((PUBKEY_HEADER.to_string(), keypair.public_key_hex()));
                headers.push((SIGNATURE_HEADER.to_string(), keypair.sign(message.as_bytes())));
            }
            Auth::Basic { email, password_hash } => {
                basic_auth = Some((email.clone(), password_hash.clone()));
            }
            Auth::None => {}
        }

        let mut url = format!("{}{}", self.options.base_url.trim_end_matches('/'), path);
        let body = if method == "GET" {
            let qs = querystring(&params);
            if !qs.is_empty() {
                url.push('?');
                url.push_str(&qs);
            }
            None
        } else {
            Some(params)
        };

        debug!(%method, %url, "bridge request");

        let response = self
            .transport
            .send(HttpRequest {
                method: method.to_string(),
                url,
                headers,
                basic_auth,
                body,
                timeout: self.options.timeout,
            })
            .await?;

        if response.status >= 400 {
            let message = serde_json::from_str::<Value>(&response.body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| response.body.clone());
            return Err(BridgeError::Api {
                status: response.status,
                message,
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| BridgeError::Deserialize(e.to_string()))
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| BridgeError::Deserialize(e.to_string()))
    }

    // ==================== Info and contacts ====================

    /// `GET /` bridge info
    pub async fn get_info(&self) -> Result<Value> {
        self.request("GET", "/", Value::Null).await
    }

    /// `GET /contacts`: a page of overlay contacts
    pub async fn get_contacts(&self, page: Option<u32>) -> Result<Vec<ContactRecord>> {
        let params = match page {
            Some(page) => json!({ "page": page }),
            None => Value::Null,
        };
        Self::parse(self.request("GET", "/contacts", params).await?)
    }

    /// `GET /contacts/:id`
    pub async fn get_contact(&self, node_id: &str) -> Result<ContactRecord> {
        let path = format!("/contacts/{}", node_id);
        Self::parse(self.request("GET", &path, Value::Null).await?)
    }

    // ==================== Users and keys ====================

    /// `POST /users`: register a user; the bridge receives the SHA-256 hex of
    /// the password, never the plaintext
    pub async fn create_user(&self, email: &str, password: &str) -> Result<Value> {
        let body = json!({
            "email": email,
            "password": sha256_hex(password.as_bytes()),
        });
        self.request("POST", "/users", body).await
    }

    /// `DELETE /users/:email`
    pub async fn destroy_user(&self, email: &str) -> Result<Value> {
        let path = format!("/users/{}", email);
        self.request("DELETE", &path, Value::Null).await
    }

    /// `PATCH /users/:email`: password reset
    pub async fn reset_password(&self, email: &str, new_password: &str) -> Result<Value> {
        let path = format!("/users/{}", email);
        let body = json!({ "password": sha256_hex(new_password.as_bytes()) });
        self.request("PATCH", &path, body).await
    }

    /// `GET /keys`
    pub async fn get_public_keys(&self) -> Result<Vec<PublicKey>> {
        Self::parse(self.request("GET", "/keys", Value::Null).await?)
    }

    /// `POST /keys`
    pub async fn add_public_key(&self, key: &str) -> Result<PublicKey> {
        Self::parse(self.request("POST", "/keys", json!({ "key": key })).await?)
    }

    /// `DELETE /keys/:key`
    pub async fn destroy_public_key(&self, key: &str) -> Result<Value> {
        let path = format!("/keys/{}", key);
        self.request("DELETE", &path, Value::Null).await
    }

    // ==================== Buckets and files ====================

    /// `GET /buckets`
    pub async fn get_buckets(&self) -> Result<Vec<Bucket>> {
        Self::parse(self.request("GET", "/buckets", Value::Null).await?)
    }

    /// `GET /buckets/:id`
    pub async fn get_bucket(&self, bucket: &str) -> Result<Bucket> {
        let path = format!("/buckets/{}", bucket);
        Self::parse(self.request("GET", &path, Value::Null).await?)
    }

    /// `POST /buckets`
    pub async fn create_bucket(&self, name: &str) -> Result<Bucket> {
        Self::parse(self.request("POST", "/buckets", json!({ "name": name })).await?)
    }

    /// `PATCH /buckets/:id`
    pub async fn update_bucket(&self, bucket: &str, name: &str) -> Result<Bucket> {
        let path = format!("/buckets/{}", bucket);
        Self::parse(self.request("PATCH", &path, json!({ "name": name })).await?)
    }

    /// `DELETE /buckets/:id`
    pub async fn destroy_bucket(&self, bucket: &str) -> Result<Value> {
        let path = format!("/buckets/{}", bucket);
        self.request("DELETE", &path, Value::Null).await
    }

    /// `GET /buckets/:id/files`
    pub async fn list_files(&self, bucket: &str) -> Result<Vec<FileEntry>> {
        let path = format!("/buckets/{}/files", bucket);
        Self::parse(self.request("GET", &path, Value::Null).await?)
    }

    /// `DELETE /buckets/:id/files/:file`
    pub async fn remove_file(&self, bucket: &str, file: &str) -> Result<Value> {
        let path = format!("/buckets/{}/files/{}", bucket, file);
        self.request("DELETE", &path, Value::Null).await
    }

    /// `POST /buckets/:id/files`: promote a frame into a file entry
    pub async fn create_file_entry(
        &self,
        bucket: &str,
        token: Option<&str>,
        frame: &str,
        mimetype: &str,
        filename: &str,
    ) -> Result<FileEntry> {
        let path = format!("/buckets/{}/files", bucket);
        let mut body = json!({
            "frame": frame,
            "mimetype": mimetype,
            "filename": filename,
        });
        if let Some(token) = token {
            body.as_object_mut()
                .expect("body is an object")
                .insert("token".to_string(), json!(token));
        }
        Self::parse(self.request("POST", &path, body).await?)
    }

    /// `POST /buckets/:id/tokens`
    pub async fn create_token(&self, bucket: &str, operation: Operation) -> Result<Token> {
        let path = format!("/buckets/{}/tokens", bucket);
        let body = json!({ "operation": operation.as_str() });
        Self::parse(self.request("POST", &path, body).await?)
    }

    /// `POST /buckets/:id/mirrors`: request replication of a file
    pub async fn replicate_file(
        &self,
        bucket: &str,
        file: &str,
        redundancy: u32,
    ) -> Result<Value> {
        let path = format!("/buckets/{}/mirrors", bucket);
        let body = json!({ "file": file, "redundancy": redundancy });
        self.request("POST", &path, body).await
    }

    /// `GET /buckets/:id/files/:file`: one page of shard pointers
    pub async fn get_file_pointers(
        &self,
        bucket: &str,
        file: &str,
        token: &str,
        skip: usize,
        limit: usize,
        exclude: &[String],
    ) -> Result<Vec<Pointer>> {
        let path = format!("/buckets/{}/files/{}", bucket, file);
        let params = json!({
            "token": token,
            "skip": skip,
            "limit": limit,
            "exclude": exclude.join(","),
        });
        Self::parse(self.request("GET", &path, params).await?)
    }

    // ==================== Frames ====================

    /// `POST /frames`: open a staging frame
    pub async fn create_frame(&self) -> Result<Frame> {
        Self::parse(self.request("POST", "/frames", Value::Null).await?)
    }

    /// `GET /frames`
    pub async fn get_frames(&self) -> Result<Vec<Frame>> {
        Self::parse(self.request("GET", "/frames", Value::Null).await?)
    }

    /// `GET /frames/:id`
    pub async fn get_frame(&self, frame: &str) -> Result<Frame> {
        let path = format!("/frames/{}", frame);
        Self::parse(self.request("GET", &path, Value::Null).await?)
    }

    /// `DELETE /frames/:id`
    pub async fn destroy_frame(&self, frame: &str) -> Result<Value> {
        let path = format!("/frames/{}", frame);
        self.request("DELETE", &path, Value::Null).await
    }

    /// `PUT /frames/:id`: negotiate a contract for one shard.
    ///
    /// Retries transient outcomes up to the configured budget with
    /// exponential backoff; `exclude` carries the nodeIDs of farmers that
    /// already failed for this shard.
    #[instrument(skip(self, shard), fields(frame, index = shard.index))]
    pub async fn add_shard_to_frame(
        &self,
        frame: &str,
        shard: &ShardMeta,
        exclude: &[String],
    ) -> Result<ShardContract> {
        let path = format!("/frames/{}", frame);
        let mut body = serde_json::to_value(shard)
            .map_err(|e| BridgeError::Deserialize(e.to_string()))?;
        body.as_object_mut()
            .expect("shard meta serializes to an object")
            .insert("exclude".to_string(), json!(exclude));

        let value = with_backoff(
            self.options.retries,
            self.options.backoff_base,
            BridgeError::is_transient,
            || self.request("PUT", &path, body.clone()),
        )
        .await?;

        Self::parse(value)
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use storj_core::{KeyPair, ShardHasher};

    /// Scripted transport: records every request, pops canned outcomes
    struct FakeTransport {
        requests: Mutex<Vec<HttpRequest>>,
        outcomes: Mutex<Vec<Result<crate::transport::HttpResponse>>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                outcomes: Mutex::new(Vec::new()),
            })
        }

        fn push_ok(&self, status: u16, body: &str) {
            self.outcomes.lock().push(Ok(crate::transport::HttpResponse {
                status,
                body: body.to_string(),
            }));
        }

        fn push_network_error(&self, message: &str) {
            self.outcomes
                .lock()
                .push(Err(BridgeError::Network(message.to_string())));
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: HttpRequest) -> Result<crate::transport::HttpResponse> {
            self.requests.lock().push(request);
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                // Keep replaying the last scripted outcome semantics:
                // default to a network failure so retry tests terminate
                return Err(BridgeError::Network("no scripted outcome".to_string()));
            }
            outcomes.remove(0)
        }
    }

    fn client_with(transport: Arc<FakeTransport>) -> BridgeClient {
        let options = BridgeOptions::new("https://bridge.test")
            .with_backoff_base(Duration::from_millis(1));
        BridgeClient::with_transport(options, transport)
    }

    #[test]
    fn test_default_base_url_from_env() {
        std::env::set_var(BRIDGE_URL_ENV, "https://staging.api.storj.io");
        let options = BridgeOptions::default();
        std::env::remove_var(BRIDGE_URL_ENV);

        assert_eq!(options.base_url, "https://staging.api.storj.io");

        // Without the variable, the public default applies
        let options = BridgeOptions::default();
        assert_eq!(options.base_url, DEFAULT_BRIDGE_URL);
    }

    #[tokio::test]
    async fn test_create_user_hashes_password() {
        let transport = FakeTransport::new();
        transport.push_ok(201, r#"{"email":"g@s.io"}"#);
        let client = client_with(transport.clone());

        client.create_user("g@s.io", "password").await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "https://bridge.test/users");

        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["email"], "g@s.io");
        assert_eq!(
            body["password"],
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[tokio::test]
    async fn test_add_shard_retries_to_budget() {
        let transport = FakeTransport::new();
        for _ in 0..7 {
            transport.push_network_error("connection refused");
        }
        let client = client_with(transport.clone());

        let mut hasher = ShardHasher::new(0);
        hasher.update(b"data");
        let meta = hasher.finalize().unwrap();

        let err = client
            .add_shard_to_frame("frame-1", &meta, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Network(_)));
        // retries (6) + 1 initial attempt
        assert_eq!(transport.requests().len(), 7);
    }

    #[tokio::test]
    async fn test_add_shard_permanent_error_fails_fast() {
        let transport = FakeTransport::new();
        transport.push_ok(400, r#"{"error":"Invalid tree"}"#);
        let client = client_with(transport.clone());

        let mut hasher = ShardHasher::new(0);
        hasher.update(b"data");
        let meta = hasher.finalize().unwrap();

        let err = client
            .add_shard_to_frame("frame-1", &meta, &["bad-farmer".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Api { status: 400, .. }));
        assert_eq!(transport.requests().len(), 1);

        let body = transport.requests()[0].body.clone().unwrap();
        assert_eq!(body["exclude"][0], "bad-farmer");
    }

    #[tokio::test]
    async fn test_error_normalization_prefers_error_field() {
        let transport = FakeTransport::new();
        transport.push_ok(404, r#"{"error":"Bucket not found"}"#);
        let client = client_with(transport.clone());

        let err = client.get_bucket("missing").await.unwrap_err();
        match err {
            BridgeError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Bucket not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_error_normalization_falls_back_to_body() {
        let transport = FakeTransport::new();
        transport.push_ok(500, "Internal Server Error");
        let client = client_with(transport.clone());

        let err = client.get_info().await.unwrap_err();
        match err {
            BridgeError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_keypair_signing_on_get() {
        let transport = FakeTransport::new();
        transport.push_ok(200, "[]");
        let keypair = KeyPair::generate();
        let pubkey_hex = keypair.public_key_hex();

        let options = BridgeOptions::new("https://bridge.test").with_auth(Auth::key(keypair));
        let client = BridgeClient::with_transport(options, transport.clone());

        client.get_buckets().await.unwrap();

        let request = &transport.requests()[0];
        assert!(request.body.is_none());
        // Signed GETs carry the nonce in the querystring
        assert!(request.url.contains("__nonce="));

        let headers: std::collections::HashMap<_, _> =
            request.headers.iter().cloned().collect();
        assert_eq!(headers.get(PUBKEY_HEADER), Some(&pubkey_hex));
        assert!(headers.get(SIGNATURE_HEADER).unwrap().starts_with("30"));
    }

    #[tokio::test]
    async fn test_basic_auth_attached() {
        let transport = FakeTransport::new();
        transport.push_ok(200, "[]");

        let options =
            BridgeOptions::new("https://bridge.test").with_auth(Auth::basic("g@s.io", "password"));
        let client = BridgeClient::with_transport(options, transport.clone());

        client.get_buckets().await.unwrap();

        let request = &transport.requests()[0];
        let (user, pass) = request.basic_auth.clone().unwrap();
        assert_eq!(user, "g@s.io");
        assert_eq!(
            pass,
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
        assert!(request.headers.is_empty());
    }

    #[tokio::test]
    async fn test_pointer_page_query() {
        let transport = FakeTransport::new();
        transport.push_ok(200, "[]");
        let client = client_with(transport.clone());

        client
            .get_file_pointers(
                "bucket-1",
                "file-1",
                "tok",
                6,
                6,
                &["aa".repeat(20), "bb".repeat(20)],
            )
            .await
            .unwrap();

        let url = &transport.requests()[0].url;
        assert!(url.starts_with("https://bridge.test/buckets/bucket-1/files/file-1?"));
        assert!(url.contains("skip=6"));
        assert!(url.contains("limit=6"));
        assert!(url.contains("token=tok"));
        // Excluded nodeIDs are comma-joined then urlencoded
        assert!(url.contains(&format!("exclude={}%2C{}", "aa".repeat(20), "bb".repeat(20))));
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let transport = FakeTransport::new();
        transport.push_ok(204, "");
        let client = client_with(transport.clone());

        let value = client.destroy_frame("frame-1").await.unwrap();
        assert!(value.is_null());
        assert_eq!(transport.requests()[0].method, "DELETE");
    }
}
