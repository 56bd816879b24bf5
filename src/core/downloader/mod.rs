pub mod client;

pub use client::StreamingDownloader;
pub(crate) use client::{probe_content_length, stream_to_file, TransferOptions};
