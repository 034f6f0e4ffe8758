//! Storj Client Library
//!
//! The upload and download pipelines:
//! - A file demuxer splitting a byte source into fixed-size shard streams
//! - A file muxer merging shard streams back into ordered file bytes
//! - The upload orchestrator: staging frame, contract negotiation, and
//!   concurrent shard transfer with retry/exclusion
//! - The download orchestrator: token and pointer acquisition feeding the
//!   muxer, with paginated pointer resolution

pub mod demux;
pub mod download;
pub mod error;
pub mod mux;
pub mod upload;

pub use demux::{DemuxEvent, FileDemuxer};
pub use download::{DownloadOptions, Downloader};
pub use error::{ClientError, Result};
pub use mux::{FileMuxer, InputQueue, MuxedReader, ShardInput};
pub use upload::{UploadOptions, Uploader};

/// Chunk size used when moving shard bytes between pipeline stages.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;
