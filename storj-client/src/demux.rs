//! File demuxer
//!
//! Splits a byte source into consecutive fixed-size shard streams. Shard
//! N's stream always ends before shard N+1's begins, and bounded channels
//! hold the source back when no consumer is reading.

use crate::error::ClientError;
use crate::TRANSFER_CHUNK_SIZE;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Events produced while demuxing a file
pub enum DemuxEvent {
    /// A new shard began; its bytes arrive on `rx` in order, totaling
    /// exactly the shard size (the last shard may be shorter)
    Shard {
        index: usize,
        rx: mpsc::Receiver<Bytes>,
    },
    /// The source is exhausted and every shard stream has ended
    Finished { shard_count: usize },
}

/// Streaming shard splitter
pub struct FileDemuxer;

impl FileDemuxer {
    /// Demux `source` into `shard_size`-byte shard streams.
    ///
    /// Events arrive on the returned receiver; a source error surfaces as
    /// an `Err` event and terminates the stream. An empty source yields
    /// `Finished { shard_count: 0 }` without any shard event.
    pub fn start<R>(
        mut source: R,
        shard_size: u64,
    ) -> mpsc::Receiver<std::result::Result<DemuxEvent, ClientError>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        assert!(shard_size > 0, "shard size must be positive");
        let (event_tx, event_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE.min(shard_size as usize)];
            let mut index = 0usize;
            let mut current: Option<mpsc::Sender<Bytes>> = None;
            let mut remaining = 0u64;

            loop {
                let read = match source.read(&mut buf).await {
                    Ok(n) => n,
                    Err(err) => {
                        let _ = event_tx
                            .send(Err(ClientError::Demux(err.to_string())))
                            .await;
                        return;
                    }
                };

                if read == 0 {
                    break;
                }

                let mut offset = 0usize;
                while offset < read {
                    if current.is_none() {
                        let (tx, rx) = mpsc::channel(4);
                        if event_tx
                            .send(Ok(DemuxEvent::Shard { index, rx }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        debug!(index, "shard stream started");
                        index += 1;
                        remaining = shard_size;
                        current = Some(tx);
                    }
                    let tx = current.as_ref().expect("shard stream just opened");

                    let take = remaining.min((read - offset) as u64) as usize;
                    if tx
                        .send(Bytes::copy_from_slice(&buf[offset..offset + take]))
                        .await
                        .is_err()
                    {
                        // Consumer hung up; the pipeline owner decides why
                        return;
                    }
                    offset += take;
                    remaining -= take as u64;

                    if remaining == 0 {
                        // Dropping the sender ends shard N before N+1 begins
                        current = None;
                    }
                }
            }

            drop(current);
            let _ = event_tx
                .send(Ok(DemuxEvent::Finished { shard_count: index }))
                .await;
        });

        event_rx
    }
}
