//! Worker subprocess pool for article extraction.
//!
//! Each worker is a long-lived external program that reads one JSON request
//! line on stdin and answers with one JSON line on stdout, for as long as it
//! lives.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │ ArticleProcessor │
//!                     └────────┬─────────┘
//!                              │ acquire / release
//!                     ┌────────▼─────────┐
//!                     │    WorkerPool    │
//!                     └────────┬─────────┘
//!               ┌──────────────┼──────────────┐
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │  Slot 0   │  │  Slot 1   │  │  Slot N   │
//!         │ (process) │  │ (process) │  │ (process) │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Features
//!
//! - **Exclusive checkout**: a worker serves one caller at a time
//! - **Discard on fault**: a worker that timed out or misbehaved is replaced,
//!   never reused, since the protocol has no request ids
//! - **Restart budget**: each slot is replaced a bounded number of times

mod handle;
mod ipc;
mod pool;
mod protocol;
mod signals;
mod spawn;

pub use handle::{WorkerHandle, WorkerState};
pub use pool::{
    DEFAULT_MAX_RESTART_ATTEMPTS, SlotStats, WorkerLease, WorkerPool, WorkerPoolConfig,
    WorkerPoolStats, default_pool_size,
};
pub use protocol::{Document, ExtractRequest, ExtractionOptions, MODE_KEY, Mode, parse_response};
pub use signals::{TerminationReason, analyze_exit_status};
pub use spawn::WorkerCommand;
