//! Upload orchestrator
//!
//! Drives a file into a staging frame: demux into shards, drain each
//! shard to a temp file while hashing, negotiate a contract per shard,
//! push the shard over a data channel, and promote the frame to a file
//! entry once every shard is placed.
//!
//! Per-shard transfer failures walk an explicit state machine: retry the
//! same farmer while the retry budget lasts, then exclude the farmer and
//! renegotiate. The first fatal error aborts every in-flight shard task
//! (temp files are removed as the tasks unwind).

use crate::demux::{DemuxEvent, FileDemuxer};
use crate::error::{ClientError, Result};
use std::path::Path;
use std::sync::Arc;
use storj_bridge::models::FileEntry;
use storj_bridge::BridgeClient;
use storj_core::{shard_size_for, ShardHasher};
use storj_network::ChannelFactory;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Default number of shards in flight
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Channel attempts per farmer before the farmer is excluded
pub const MAX_TRANSFER_RETRIES: u32 = 3;

/// Upload tuning knobs
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Override the staircase shard size (tests and power users)
    pub shard_size: Option<u64>,
    /// Shard tasks running in parallel
    pub concurrency: usize,
    /// Channel attempts per farmer before exclusion
    pub max_transfer_retries: u32,
    /// Override the guessed mimetype
    pub mimetype: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            shard_size: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_transfer_retries: MAX_TRANSFER_RETRIES,
            mimetype: None,
        }
    }
}

/// Outcome of a failed channel attempt
#[derive(Debug, PartialEq, Eq)]
enum TransferOutcome {
    /// Budget remains: reconnect to the same farmer
    RetrySame,
    /// Budget exhausted: exclude the farmer and renegotiate
    RetryOther,
}

/// Per-shard retry/exclusion state
struct TransferState {
    retries: u32,
    max_retries: u32,
    exclude: Vec<String>,
}

impl TransferState {
    fn new(max_retries: u32) -> Self {
        Self {
            retries: 0,
            max_retries,
            exclude: Vec::new(),
        }
    }

    /// Record a channel failure against `farmer` and decide the next move.
    fn on_error(&mut self, farmer: &str) -> TransferOutcome {
        self.retries += 1;
        if self.retries >= self.max_retries {
            self.exclude.push(farmer.to_string());
            self.retries = 0;
            TransferOutcome::RetryOther
        } else {
            TransferOutcome::RetrySame
        }
    }

    fn is_excluded(&self, farmer: &str) -> bool {
        self.exclude.iter().any(|f| f == farmer)
    }
}

/// Upload pipeline entry point
pub struct Uploader {
    bridge: BridgeClient,
    channels: Arc<dyn ChannelFactory>,
    options: UploadOptions,
}

impl Uploader {
    pub fn new(bridge: BridgeClient, channels: Arc<dyn ChannelFactory>) -> Self {
        Self {
            bridge,
            channels,
            options: UploadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Store the file at `path` into `bucket` under a PUSH `token`.
    ///
    /// Dropping the returned future cancels the upload: shard tasks are
    /// aborted and their temp files removed as they unwind.
    #[instrument(skip(self, token), fields(bucket, path = %path.display()))]
    pub async fn store_file_in_bucket(
        &self,
        bucket: &str,
        token: &str,
        path: &Path,
    ) -> Result<FileEntry> {
        let metadata = tokio::fs::metadata(path).await?;
        let file_size = metadata.len();
        let shard_size = self
            .options
            .shard_size
            .unwrap_or_else(|| shard_size_for(file_size));

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mimetype = self.options.mimetype.clone().unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string()
        });

        // Fail fast before any shard work starts
        let frame = self.bridge.create_frame().await?;
        info!(frame = %frame.id, file_size, shard_size, "staging frame created");

        if file_size == 0 {
            // Zero shards: the empty frame is still promoted
            return Ok(self
                .bridge
                .create_file_entry(bucket, Some(token), &frame.id, &mimetype, &filename)
                .await?);
        }

        let source = tokio::fs::File::open(path).await?;
        let mut events = FileDemuxer::start(source, shard_size);

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks: JoinSet<Result<usize>> = JoinSet::new();
        let mut shard_count = None;

        while let Some(event) = events.recv().await {
            match event {
                Ok(DemuxEvent::Shard { index, rx }) => {
                    let bridge = self.bridge.clone();
                    let channels = self.channels.clone();
                    let frame_id = frame.id.clone();
                    let semaphore = semaphore.clone();
                    let max_retries = self.options.max_transfer_retries;

                    tasks.spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| ClientError::Aborted("worker pool closed".into()))?;
                        upload_shard(bridge, channels, frame_id, index, rx, max_retries).await
                    });
                }
                Ok(DemuxEvent::Finished { shard_count: count }) => {
                    shard_count = Some(count);
                }
                Err(err) => {
                    tasks.abort_all();
                    return Err(err);
                }
            }
        }

        // Join every shard task. The first fatal error aborts the rest;
        // aborted tasks drop their temp files as they unwind.
        let mut first_error: Option<ClientError> = None;
        let mut complete = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(index)) => {
                    complete += 1;
                    debug!(index, complete, "shard complete");
                }
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                        tasks.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() => continue,
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(ClientError::Aborted(join_err.to_string()));
                        tasks.abort_all();
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let expected = shard_count
            .ok_or_else(|| ClientError::Demux("source ended without finishing".to_string()))?;
        if complete != expected {
            return Err(ClientError::Aborted(format!(
                "{} of {} shards transferred",
                complete, expected
            )));
        }

        info!(frame = %frame.id, shards = expected, "all shards placed, creating file entry");
        Ok(self
            .bridge
            .create_file_entry(bucket, Some(token), &frame.id, &mimetype, &filename)
            .await?)
    }
}

/// Drain one shard to a temp file, negotiate a contract, and push it to
/// the assigned farmer, excluding farmers that exhaust the retry budget.
async fn upload_shard(
    bridge: BridgeClient,
    channels: Arc<dyn ChannelFactory>,
    frame_id: String,
    index: usize,
    mut rx: mpsc::Receiver<bytes::Bytes>,
    max_retries: u32,
) -> Result<usize> {
    // Temp file lives for the duration of this task; dropped (and
    // removed) on success, failure, and abort alike
    let tmp = tempfile::NamedTempFile::new()?;
    let mut file = tokio::fs::File::create(tmp.path()).await?;
    let mut hasher = ShardHasher::new(index);

    while let Some(chunk) = rx.recv().await {
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    let meta = hasher.finalize()?;
    debug!(index, size = meta.size, hash = %meta.hash, "shard staged");

    let mut state = TransferState::new(max_retries);

    loop {
        // Transient add-shard failures are retried with backoff inside
        // the bridge client; an error here is final
        let contract = bridge
            .add_shard_to_frame(&frame_id, &meta, &state.exclude)
            .await?;
        let farmer = contract.farmer.clone();

        if state.is_excluded(&farmer.node_id) {
            warn!(index, farmer = %farmer.node_id, "bridge reissued an excluded farmer");
            return Err(ClientError::FarmersExhausted(index));
        }

        loop {
            let attempt = async {
                let mut channel = channels.open(&farmer.endpoint()).await?;
                channel.push(&contract.token, &meta.hash, tmp.path()).await
            };

            match attempt.await {
                Ok(sent) => {
                    debug!(index, sent, farmer = %farmer.node_id, "shard transferred");
                    return Ok(index);
                }
                Err(err) => {
                    warn!(index, farmer = %farmer.node_id, %err, "channel attempt failed");
                    match state.on_error(&farmer.node_id) {
                        TransferOutcome::RetrySame => continue,
                        TransferOutcome::RetryOther => break,
                    }
                }
            }
        }
    }
}
