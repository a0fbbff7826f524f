//! Stream registry
//!
//! The registry owns every camera stream: it opens the initial capture
//! session, spawns the stream's ingestion worker and hands delivery adapters
//! shared access to the per-stream state the worker writes.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌──────────────────────────┐
//!                     │ streams: HashMap<Id,     │
//!                     │   Arc<StreamEntry> {     │
//!                     │     cache, queue,        │
//!                     │     telemetry, consumers │
//!                     │   }                      │
//!                     │ >                        │
//!                     └────────────┬─────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!   [ingest-{id}]             [snapshot]               [push session]
//!   read_frame()              cache.latest()           queue.pop(1s)
//!         │                        ▲                        ▲
//!         └──► cache.publish() ────┘                        │
//!         └──► encode ──► queue.push() (drop oldest) ───────┘
//! ```
//!
//! # Zero-Copy Design
//!
//! Frames and encoded JPEGs are `bytes::Bytes`, so a reader's copy of the
//! latest frame shares the worker's allocation; only the reference count is
//! touched under the cache lock.

pub mod cache;
pub mod config;
pub mod consumers;
pub mod entry;
pub mod queue;
pub mod store;

pub use cache::FrameCache;
pub use config::RegistryConfig;
pub use consumers::{ConsumerGuard, ConsumerInfo, ConsumerSet};
pub use entry::{StreamEntry, StreamInfo, StreamState};
pub use queue::{DistributionQueue, Popped};
pub use store::StreamRegistry;
