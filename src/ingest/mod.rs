//! Ingestion
//!
//! Everything that runs on a stream's worker thread: the reconnect policy,
//! the read loop, frame encoding for delivery and the telemetry it updates.

pub mod encode;
pub mod policy;
pub mod telemetry;
pub mod worker;

pub use policy::{LinkHealth, ReconnectDecision, ReconnectPolicy};
pub use telemetry::{StateTransition, Telemetry, TelemetrySnapshot};
pub use worker::{spawn, WorkerHandle};
