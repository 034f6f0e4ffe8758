//! End-to-end pipeline tests over an in-process bridge and farmer network
//!
//! The bridge is a scripted [`Transport`] holding frames, files, and
//! farmer assignments in memory; farmers are a shared shard store behind
//! a fake [`ChannelFactory`]. Nothing touches the real network.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storj_bridge::models::{FarmerContact, Pointer};
use storj_bridge::{BridgeClient, BridgeError, BridgeOptions, HttpRequest, HttpResponse, Transport};
use storj_client::{ClientError, DownloadOptions, Downloader, UploadOptions, Uploader};
use storj_core::crypto::sha256_rmd160_hex;
use storj_network::{ChannelFactory, NetworkError, ShardChannel};
use tokio::sync::mpsc;

// ==================== Fake farmer network ====================

/// Shard bytes shared by every fake farmer, keyed by shard hash
#[derive(Default)]
struct FarmerStore {
    shards: Mutex<HashMap<String, Vec<u8>>>,
}

struct FakeChannel {
    store: Arc<FarmerStore>,
}

#[async_trait]
impl ShardChannel for FakeChannel {
    async fn push(
        &mut self,
        _token: &str,
        hash: &str,
        source: &Path,
    ) -> storj_network::Result<u64> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| NetworkError::Transfer(e.to_string()))?;
        let len = data.len() as u64;
        self.store.shards.lock().insert(hash.to_string(), data);
        Ok(len)
    }

    async fn pull(
        self: Box<Self>,
        _token: &str,
        hash: &str,
    ) -> storj_network::Result<mpsc::Receiver<storj_network::Result<Bytes>>> {
        let data = self.store.shards.lock().get(hash).cloned();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            match data {
                Some(data) => {
                    for chunk in data.chunks(16) {
                        if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
                            return;
                        }
                    }
                }
                None => {
                    let _ = tx
                        .send(Err(NetworkError::Transfer("Failed".to_string())))
                        .await;
                }
            }
        });

        Ok(rx)
    }
}

/// Factory over the shared store; endpoints listed in `fail_endpoints`
/// refuse every connection
struct FakeChannelFactory {
    store: Arc<FarmerStore>,
    open_delay: Duration,
    fail_endpoints: HashSet<String>,
    opens: Mutex<Vec<String>>,
}

impl FakeChannelFactory {
    fn new(store: Arc<FarmerStore>) -> Self {
        Self {
            store,
            open_delay: Duration::ZERO,
            fail_endpoints: HashSet::new(),
            opens: Mutex::new(Vec::new()),
        }
    }

    fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    fn failing(mut self, endpoint: &str) -> Self {
        self.fail_endpoints.insert(endpoint.to_string());
        self
    }

    fn opens_for(&self, endpoint: &str) -> usize {
        self.opens.lock().iter().filter(|e| *e == endpoint).count()
    }
}

#[async_trait]
impl ChannelFactory for FakeChannelFactory {
    async fn open(&self, endpoint: &str) -> storj_network::Result<Box<dyn ShardChannel>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.opens.lock().push(endpoint.to_string());

        if self.fail_endpoints.contains(endpoint) {
            return Err(NetworkError::Connect("connection refused".to_string()));
        }
        Ok(Box::new(FakeChannel {
            store: self.store.clone(),
        }))
    }
}

// ==================== Fake bridge ====================

#[derive(Clone)]
struct Farmer {
    address: String,
    port: u16,
    node_id: String,
}

impl Farmer {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn contact(&self) -> Value {
        json!({
            "address": self.address,
            "port": self.port,
            "nodeID": self.node_id,
        })
    }
}

/// In-memory bridge: frames accumulate shard descriptors, file entries
/// reference frames, pointer pages come back sorted by shard index
struct FakeBridge {
    farmers: Vec<Farmer>,
    frames: Mutex<HashMap<String, Vec<Value>>>,
    files: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<HttpRequest>>,
    next_id: Mutex<u32>,
}

impl FakeBridge {
    fn new(farmers: Vec<Farmer>) -> Arc<Self> {
        Arc::new(Self {
            farmers,
            frames: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        })
    }

    fn requests_matching(&self, method: &str, path_part: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url.contains(path_part))
            .count()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock();
        *next += 1;
        format!("{}-{}", prefix, next)
    }

    fn ok(body: Value) -> storj_bridge::Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn error(status: u16, message: &str) -> storj_bridge::Result<HttpResponse> {
        Ok(HttpResponse {
            status,
            body: json!({ "error": message }).to_string(),
        })
    }
}

#[async_trait]
impl Transport for FakeBridge {
    async fn send(&self, request: HttpRequest) -> storj_bridge::Result<HttpResponse> {
        self.requests.lock().push(request.clone());

        let url = url::Url::parse(&request.url)
            .map_err(|e| BridgeError::Network(e.to_string()))?;
        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();

        match (request.method.as_str(), segments.as_slice()) {
            ("POST", ["frames"]) => {
                let id = self.fresh_id("frame");
                self.frames.lock().insert(id.clone(), Vec::new());
                Self::ok(json!({ "id": id }))
            }

            ("PUT", ["frames", frame_id]) => {
                let body = request.body.clone().unwrap_or_default();
                let exclude: HashSet<String> = body["exclude"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                // Prefer a farmer the client has not excluded; with the
                // pool exhausted, reissue the first one and let the
                // client decide the upload is dead
                let Some(farmer) = self
                    .farmers
                    .iter()
                    .find(|f| !exclude.contains(&f.node_id))
                    .or_else(|| self.farmers.first())
                else {
                    return Self::error(400, "No farmers available for contract");
                };

                let mut frames = self.frames.lock();
                let Some(shards) = frames.get_mut(*frame_id) else {
                    return Self::error(404, "Frame not found");
                };
                // Renegotiations replace the earlier descriptor
                shards.retain(|s| s["index"] != body["index"]);
                shards.push(body.clone());

                Self::ok(json!({
                    "hash": body["hash"],
                    "token": format!("push-{}", body["hash"].as_str().unwrap_or("")),
                    "operation": "PUSH",
                    "farmer": farmer.contact(),
                }))
            }

            ("POST", ["buckets", _bucket, "tokens"]) => Self::ok(json!({
                "token": "token-1",
                "operation": request.body.clone().unwrap_or_default()["operation"],
                "expires": "2026-01-01T00:00:00Z",
            })),

            ("POST", ["buckets", bucket, "files"]) => {
                let body = request.body.clone().unwrap_or_default();
                let frame = body["frame"].as_str().unwrap_or_default().to_string();
                if !self.frames.lock().contains_key(&frame) {
                    return Self::error(404, "Frame not found");
                }
                let id = self.fresh_id("file");
                self.files.lock().insert(id.clone(), frame.clone());
                Self::ok(json!({
                    "id": id,
                    "bucket": bucket,
                    "frame": frame,
                    "mimetype": body["mimetype"],
                    "filename": body["filename"],
                }))
            }

            ("GET", ["buckets", _bucket, "files", file_id]) => {
                let files = self.files.lock();
                let Some(frame_id) = files.get(*file_id) else {
                    return Self::error(404, "File not found");
                };

                let frames = self.frames.lock();
                let mut shards = frames.get(frame_id).cloned().unwrap_or_default();
                shards.sort_by_key(|s| s["index"].as_u64().unwrap_or(0));

                let skip: usize = query.get("skip").and_then(|s| s.parse().ok()).unwrap_or(0);
                let limit: usize =
                    query.get("limit").and_then(|s| s.parse().ok()).unwrap_or(6);

                let pointers: Vec<Value> = shards
                    .iter()
                    .skip(skip)
                    .take(limit)
                    .map(|shard| {
                        json!({
                            "index": shard["index"],
                            "size": shard["size"],
                            "hash": shard["hash"],
                            "token": format!("pull-{}", shard["hash"].as_str().unwrap_or("")),
                            "farmer": self.farmers[0].contact(),
                        })
                    })
                    .collect();

                Self::ok(json!(pointers))
            }

            _ => Self::error(404, "Not found"),
        }
    }
}

// ==================== Harness ====================

fn farmer(n: u8) -> Farmer {
    Farmer {
        address: "127.0.0.1".to_string(),
        port: 8080 + n as u16,
        node_id: sha256_rmd160_hex(format!("nodeid-{}", n).as_bytes()),
    }
}

fn bridge_client(transport: Arc<FakeBridge>) -> BridgeClient {
    let options = BridgeOptions::new("https://bridge.test")
        .with_backoff_base(Duration::from_millis(1));
    BridgeClient::with_transport(options, transport)
}

fn patterned_file(size: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}

fn shard_options(shard_size: u64) -> UploadOptions {
    UploadOptions {
        shard_size: Some(shard_size),
        ..Default::default()
    }
}

// ==================== Tests ====================

#[tokio::test]
async fn test_upload_happy_path_two_shards() {
    let bridge = FakeBridge::new(vec![farmer(0)]);
    let store = Arc::new(FarmerStore::default());
    let channels = Arc::new(
        FakeChannelFactory::new(store.clone()).with_open_delay(Duration::from_millis(20)),
    );

    let uploader = Uploader::new(bridge_client(bridge.clone()), channels.clone())
        .with_options(shard_options(32));

    let file = patterned_file(64);
    let entry = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap();

    assert_eq!(entry.frame, "frame-1");
    // Two shards negotiated, two shards stored at the farmer
    assert_eq!(bridge.requests_matching("PUT", "/frames/"), 2);
    assert_eq!(store.shards.lock().len(), 2);
    // File entry POST observed after every shard completed
    assert_eq!(bridge.requests_matching("POST", "/files"), 1);
}

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let bridge = FakeBridge::new(vec![farmer(0)]);
    let store = Arc::new(FarmerStore::default());
    let channels = Arc::new(FakeChannelFactory::new(store));

    let client = bridge_client(bridge.clone());
    let uploader =
        Uploader::new(client.clone(), channels.clone()).with_options(shard_options(32));

    // 70 bytes: two full shards and a short tail shard
    let file = patterned_file(70);
    let original = std::fs::read(file.path()).unwrap();

    let entry = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap();

    // Page size 1 forces pagination: three pages of one pointer, then an
    // empty page ends the stream
    let downloader = Downloader::new(client, channels).with_options(DownloadOptions {
        page_size: 1,
        open_concurrency: 2,
    });

    let reader = downloader
        .create_file_stream("bucket-1", &entry.id)
        .await
        .unwrap();
    let downloaded = reader.read_to_end().await.unwrap();

    assert_eq!(downloaded, original);
}

#[tokio::test]
async fn test_upload_empty_file() {
    let bridge = FakeBridge::new(vec![farmer(0)]);
    let store = Arc::new(FarmerStore::default());
    let channels = Arc::new(FakeChannelFactory::new(store.clone()));

    let client = bridge_client(bridge.clone());
    let uploader = Uploader::new(client.clone(), channels.clone());

    let file = patterned_file(0);
    let entry = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap();

    // Frame created and promoted without any shard negotiation
    assert_eq!(bridge.requests_matching("POST", "/frames"), 1);
    assert_eq!(bridge.requests_matching("PUT", "/frames/"), 0);
    assert!(store.shards.lock().is_empty());

    // Downloading the empty file completes with zero bytes
    let downloader = Downloader::new(client, channels);
    let reader = downloader
        .create_file_stream("bucket-1", &entry.id)
        .await
        .unwrap();
    assert!(reader.read_to_end().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_shard_exactly_shard_size() {
    let bridge = FakeBridge::new(vec![farmer(0)]);
    let store = Arc::new(FarmerStore::default());
    let channels = Arc::new(FakeChannelFactory::new(store));

    let client = bridge_client(bridge.clone());
    let uploader =
        Uploader::new(client.clone(), channels.clone()).with_options(shard_options(64));

    let file = patterned_file(64);
    let original = std::fs::read(file.path()).unwrap();
    let entry = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap();

    assert_eq!(bridge.requests_matching("PUT", "/frames/"), 1);

    let downloader = Downloader::new(client, channels);
    let reader = downloader
        .create_file_stream("bucket-1", &entry.id)
        .await
        .unwrap();
    assert_eq!(reader.read_to_end().await.unwrap(), original);
}

#[tokio::test]
async fn test_transfer_retries_then_excludes_farmer() {
    // Farmer 0 refuses every connection; farmer 1 works
    let bad = farmer(0);
    let good = farmer(1);
    let bridge = FakeBridge::new(vec![bad.clone(), good.clone()]);

    let store = Arc::new(FarmerStore::default());
    let channels =
        Arc::new(FakeChannelFactory::new(store.clone()).failing(&bad.endpoint()));

    let uploader = Uploader::new(bridge_client(bridge.clone()), channels.clone())
        .with_options(shard_options(64));

    let file = patterned_file(40);
    uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap();

    // Three attempts against the failing farmer, then reassignment
    assert_eq!(channels.opens_for(&bad.endpoint()), 3);
    assert_eq!(channels.opens_for(&good.endpoint()), 1);
    // Negotiated twice: initial contract plus the renegotiation
    assert_eq!(bridge.requests_matching("PUT", "/frames/"), 2);
    assert_eq!(store.shards.lock().len(), 1);
}

#[tokio::test]
async fn test_all_farmers_excluded_is_fatal() {
    let bad = farmer(0);
    let bridge = FakeBridge::new(vec![bad.clone()]);

    let store = Arc::new(FarmerStore::default());
    let channels = Arc::new(FakeChannelFactory::new(store).failing(&bad.endpoint()));

    let uploader = Uploader::new(bridge_client(bridge.clone()), channels.clone())
        .with_options(shard_options(64));

    let file = patterned_file(40);
    let err = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::FarmersExhausted(0)));
    // Channel opened at most 3 times per candidate farmer
    assert_eq!(channels.opens_for(&bad.endpoint()), 3);
    // No file entry was created for the failed upload
    assert_eq!(bridge.requests_matching("POST", "/files"), 0);
}

#[tokio::test]
async fn test_frame_creation_failure_is_fatal_and_fast() {
    // A bridge with no routes: POST /frames itself 404s
    struct DeadBridge;
    #[async_trait]
    impl Transport for DeadBridge {
        async fn send(&self, _request: HttpRequest) -> storj_bridge::Result<HttpResponse> {
            Ok(HttpResponse {
                status: 404,
                body: json!({"error": "Not found"}).to_string(),
            })
        }
    }

    let options = BridgeOptions::new("https://bridge.test")
        .with_backoff_base(Duration::from_millis(1));
    let client = BridgeClient::with_transport(options, Arc::new(DeadBridge));
    let channels = Arc::new(FakeChannelFactory::new(Arc::new(FarmerStore::default())));

    let uploader = Uploader::new(client, channels);
    let file = patterned_file(10);
    let err = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Bridge(_)));
}

#[tokio::test]
async fn test_resolve_file_from_pointers_error_propagation() {
    let store = Arc::new(FarmerStore::default());
    store
        .shards
        .lock()
        .insert("hash-0".to_string(), b"present".to_vec());
    let channels = Arc::new(FakeChannelFactory::new(store));

    let contact = FarmerContact {
        address: "127.0.0.1".to_string(),
        port: 8080,
        node_id: sha256_rmd160_hex(b"nodeid"),
        protocol: None,
    };
    let pointers = vec![
        Pointer {
            index: 0,
            size: 7,
            hash: "hash-0".to_string(),
            token: "t0".to_string(),
            farmer: contact.clone(),
        },
        Pointer {
            index: 1,
            size: 7,
            // Not present at any farmer: the channel reports "Failed"
            hash: "hash-missing".to_string(),
            token: "t1".to_string(),
            farmer: contact,
        },
    ];

    let bridge = FakeBridge::new(vec![farmer(0)]);
    let downloader = Downloader::new(bridge_client(bridge), channels);

    let (reader, _queue) = downloader
        .resolve_file_from_pointers(pointers)
        .await
        .unwrap();

    let err = reader.read_to_end().await.unwrap_err();
    assert!(err.to_string().contains("Failed"));
}

#[tokio::test]
async fn test_later_page_failure_preserves_delivered_bytes() {
    // Bridge that serves the first pointer page, then breaks
    struct FlakyBridge {
        inner: Arc<FakeBridge>,
        pointer_calls: Mutex<u32>,
    }

    #[async_trait]
    impl Transport for FlakyBridge {
        async fn send(&self, request: HttpRequest) -> storj_bridge::Result<HttpResponse> {
            if request.method == "GET" && request.url.contains("/files/") {
                let mut calls = self.pointer_calls.lock();
                *calls += 1;
                if *calls > 1 {
                    return Err(BridgeError::Network("bridge went away".to_string()));
                }
            }
            self.inner.send(request).await
        }
    }

    let inner = FakeBridge::new(vec![farmer(0)]);
    let store = Arc::new(FarmerStore::default());
    let channels = Arc::new(FakeChannelFactory::new(store));

    let client = bridge_client(inner.clone());
    let uploader =
        Uploader::new(client, channels.clone()).with_options(shard_options(32));
    let file = patterned_file(64);
    let entry = uploader
        .store_file_in_bucket("bucket-1", "push-token", file.path())
        .await
        .unwrap();

    let flaky = Arc::new(FlakyBridge {
        inner,
        pointer_calls: Mutex::new(0),
    });
    let options = BridgeOptions::new("https://bridge.test")
        .with_retries(0)
        .with_backoff_base(Duration::from_millis(1));
    let downloader = Downloader::new(
        BridgeClient::with_transport(options, flaky),
        channels,
    )
    .with_options(DownloadOptions {
        page_size: 1,
        open_concurrency: 2,
    });

    let mut reader = downloader
        .create_file_stream("bucket-1", &entry.id)
        .await
        .unwrap();

    // First shard's bytes arrive intact, then the stream errors
    let mut delivered = Vec::new();
    let mut saw_error = false;
    while let Some(chunk) = reader.next_chunk().await {
        match chunk {
            Ok(bytes) => delivered.extend_from_slice(&bytes),
            Err(_) => {
                saw_error = true;
                break;
            }
        }
    }

    assert!(saw_error);
    assert_eq!(delivered.len(), 32);
    let original = std::fs::read(file.path()).unwrap();
    assert_eq!(delivered, &original[..32]);
}
