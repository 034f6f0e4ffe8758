//! Download orchestrator
//!
//! Acquires a PULL token, resolves pointer pages, and feeds one data
//! channel per pointer into the muxer. Later pages are fetched in the
//! background as earlier inputs drain; an empty page ends the stream.

use crate::error::Result;
use crate::mux::{FileMuxer, InputQueue, MuxedReader, ShardInput};
use std::sync::Arc;
use storj_bridge::models::{Operation, Pointer};
use storj_bridge::BridgeClient;
use storj_network::{ChannelFactory, NetworkError};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// Download tuning knobs
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Pointers requested per page
    pub page_size: usize,
    /// Channel opens in flight at once
    pub open_concurrency: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            page_size: 6,
            open_concurrency: 4,
        }
    }
}

/// Download pipeline entry point
pub struct Downloader {
    bridge: BridgeClient,
    channels: Arc<dyn ChannelFactory>,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(bridge: BridgeClient, channels: Arc<dyn ChannelFactory>) -> Self {
        Self {
            bridge,
            channels,
            options: DownloadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// Open an ordered byte stream over the file's shards.
    ///
    /// The first pointer page is resolved before returning, so token and
    /// initial pointer failures fail the call itself. A failure fetching
    /// a later page surfaces as an error on the stream without discarding
    /// bytes already delivered.
    #[instrument(skip(self), fields(bucket, file_id))]
    pub async fn create_file_stream(&self, bucket: &str, file_id: &str) -> Result<MuxedReader> {
        let token = self.bridge.create_token(bucket, Operation::Pull).await?;
        let first_page = self
            .bridge
            .get_file_pointers(bucket, file_id, &token.token, 0, self.options.page_size, &[])
            .await?;

        info!(pointers = first_page.len(), "first pointer page resolved");

        let (reader, queue) = FileMuxer::new(None, None);

        if first_page.is_empty() {
            // Zero-shard file: the stream completes empty
            return Ok(reader);
        }

        let mut skip = first_page.len();
        wire_pointers(&self.channels, &queue, first_page, self.options.open_concurrency).await;

        let bridge = self.bridge.clone();
        let channels = self.channels.clone();
        let bucket = bucket.to_string();
        let file_id = file_id.to_string();
        let token = token.token;
        let page_size = self.options.page_size;
        let open_concurrency = self.options.open_concurrency;

        // Slice loop: fetch pages until one comes back empty. The queue
        // handle moves in here; dropping it completes the muxer.
        tokio::spawn(async move {
            loop {
                let page = bridge
                    .get_file_pointers(&bucket, &file_id, &token, skip, page_size, &[])
                    .await;

                match page {
                    Ok(pointers) if pointers.is_empty() => {
                        debug!(skip, "pointer pages exhausted");
                        break;
                    }
                    Ok(pointers) => {
                        skip += pointers.len();
                        wire_pointers(&channels, &queue, pointers, open_concurrency).await;
                    }
                    Err(err) => {
                        warn!(%err, skip, "pointer page fetch failed");
                        let _ = queue
                            .push(ShardInput::failed(
                                skip,
                                NetworkError::Transfer(err.to_string()),
                            ))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(reader)
    }

    /// Build a muxer over a known, complete pointer list.
    ///
    /// The muxer is sized to exactly these pointers (count and total
    /// length); channels open under the concurrency cap, and the returned
    /// queue wires any inputs the caller re-resolves later.
    pub async fn resolve_file_from_pointers(
        &self,
        pointers: Vec<Pointer>,
    ) -> Result<(MuxedReader, InputQueue)> {
        let total: u64 = pointers.iter().map(|p| p.size).sum();
        let (reader, queue) = FileMuxer::new(Some(pointers.len()), Some(total));

        wire_pointers(&self.channels, &queue, pointers, self.options.open_concurrency).await;

        Ok((reader, queue))
    }
}

/// Open a channel per pointer (capped concurrency) and register each as a
/// muxer input. Open and pull failures become pre-errored inputs so they
/// surface on the output stream in shard order.
async fn wire_pointers(
    channels: &Arc<dyn ChannelFactory>,
    queue: &InputQueue,
    pointers: Vec<Pointer>,
    open_concurrency: usize,
) {
    let semaphore = Arc::new(Semaphore::new(open_concurrency.max(1)));
    let mut joins = Vec::with_capacity(pointers.len());

    for pointer in pointers {
        let channels = channels.clone();
        let queue = queue.clone();
        let semaphore = semaphore.clone();

        joins.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let input = match open_pointer(&channels, &pointer).await {
                Ok(rx) => ShardInput::new(pointer.index, rx),
                Err(err) => {
                    warn!(index = pointer.index, %err, "pointer resolution failed");
                    ShardInput::failed(pointer.index, err)
                }
            };

            let _ = queue.push(input).await;
        }));
    }

    for join in joins {
        let _ = join.await;
    }
}

async fn open_pointer(
    channels: &Arc<dyn ChannelFactory>,
    pointer: &Pointer,
) -> std::result::Result<
    tokio::sync::mpsc::Receiver<std::result::Result<bytes::Bytes, NetworkError>>,
    NetworkError,
> {
    let channel = channels.open(&pointer.farmer.endpoint()).await?;
    channel.pull(&pointer.token, &pointer.hash).await
}
