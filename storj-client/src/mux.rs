//! File muxer
//!
//! Merges per-shard byte streams back into a single ordered byte stream:
//! all of input 0, then input 1, and so on, regardless of the order in
//! which inputs arrive or their chunks land. Inputs may be registered
//! after construction through the [`InputQueue`]; dropping the queue
//! signals end-of-pointers.

use crate::error::{ClientError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use storj_network::NetworkError;
use tokio::sync::mpsc;
use tracing::debug;

/// One shard's byte stream, tagged with its position in the file
pub struct ShardInput {
    pub index: usize,
    pub rx: mpsc::Receiver<std::result::Result<Bytes, NetworkError>>,
}

impl ShardInput {
    pub fn new(
        index: usize,
        rx: mpsc::Receiver<std::result::Result<Bytes, NetworkError>>,
    ) -> Self {
        Self { index, rx }
    }

    /// An input that immediately reports `err`, for lifting resolution
    /// failures into the output stream.
    pub fn failed(index: usize, err: NetworkError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // The receiver holds the buffered error even after tx drops
        let _ = tx.try_send(Err(err));
        Self { index, rx }
    }
}

/// Handle for registering inputs with a running muxer
#[derive(Clone)]
pub struct InputQueue {
    tx: mpsc::Sender<ShardInput>,
}

impl InputQueue {
    /// Register another input. Fails once the muxer has shut down.
    pub async fn push(&self, input: ShardInput) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| ClientError::Mux("muxer is no longer accepting inputs".to_string()))
    }
}

/// The muxer's readable output
pub struct MuxedReader {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl MuxedReader {
    /// Next ordered chunk; `None` once the stream completed cleanly.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.rx.recv().await
    }

    /// Drain the whole stream into memory.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// N-way ordered merge of shard inputs
pub struct FileMuxer;

impl FileMuxer {
    /// Start a muxer.
    ///
    /// With `expected_inputs` set, the stream completes after exactly that
    /// many inputs (and errors if the queue closes short); without it, the
    /// stream completes when the queue handle is dropped and every
    /// registered input has drained. `expected_len` adds a total-length
    /// check on completion.
    pub fn new(
        expected_inputs: Option<usize>,
        expected_len: Option<u64>,
    ) -> (MuxedReader, InputQueue) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(4);

        tokio::spawn(run_muxer(expected_inputs, expected_len, in_rx, out_tx));

        (MuxedReader { rx: out_rx }, InputQueue { tx: in_tx })
    }
}

async fn run_muxer(
    expected_inputs: Option<usize>,
    expected_len: Option<u64>,
    mut in_rx: mpsc::Receiver<ShardInput>,
    out_tx: mpsc::Sender<Result<Bytes>>,
) {
    let mut pending: BTreeMap<usize, mpsc::Receiver<std::result::Result<Bytes, NetworkError>>> =
        BTreeMap::new();
    let mut next = 0usize;
    let mut consumed = 0usize;
    let mut total = 0u64;

    loop {
        if expected_inputs == Some(consumed) {
            break;
        }

        // Wait until the next index is available, buffering out-of-order
        // arrivals as they come in
        let mut queue_open = true;
        while !pending.contains_key(&next) && queue_open {
            match in_rx.recv().await {
                Some(input) => {
                    pending.insert(input.index, input.rx);
                }
                None => queue_open = false,
            }
        }

        let Some(mut rx) = pending.remove(&next) else {
            // Queue closed without delivering the next input
            if expected_inputs.is_none() && pending.is_empty() {
                break;
            }
            let message = match expected_inputs {
                Some(n) => format!("input queue closed after {} of {} inputs", consumed, n),
                None => format!("missing input for shard {}", next),
            };
            let _ = out_tx.send(Err(ClientError::Mux(message))).await;
            return;
        };

        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(bytes) => {
                    total += bytes.len() as u64;
                    if out_tx.send(Ok(bytes)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = out_tx.send(Err(err.into())).await;
                    return;
                }
            }
        }

        debug!(index = next, "shard input drained");
        consumed += 1;
        next += 1;
    }

    if let Some(expected) = expected_len {
        if total != expected {
            let _ = out_tx
                .send(Err(ClientError::Mux(format!(
                    "expected {} bytes, muxed {}",
                    expected, total
                ))))
                .await;
        }
    }
}
