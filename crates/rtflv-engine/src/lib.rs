//! # rtflv-engine
//!
//! Engine for downloading a seekable, real-time FLV stream in N parallel
//! parts and joining the results into a single well-formed file.
//!
//! The server is expected to deliver media at wall-clock rate; opening the
//! same logical stream at N distinct seek offsets therefore cuts the total
//! download time roughly N-fold. Each part discovers its true start time from
//! the stream's `timeBase` metadata, the coordinator turns those discoveries
//! into agreed-upon part boundaries, and the workers shift tag timestamps so
//! the parts concatenate monotonically.

use std::sync::Arc;

pub mod analyzer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lock;
pub mod message;
pub mod tracker;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::DownloadConfig;
pub use coordinator::{DownloadSummary, ParallelDownloader};
pub use error::DownloadError;
pub use events::{Event, EventBus, EventKind, HandlerId};
pub use lock::FileLock;
pub use transport::{HttpTransport, MediaStream, Transport};

/// Capability mapping a seek position in seconds to a URL that opens the
/// stream at that position. URL construction is the caller's business.
pub type UrlBuilder = Arc<dyn Fn(f64) -> String + Send + Sync>;
