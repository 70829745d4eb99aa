//! article-pool - article extraction through a pool of worker processes
//!
//! Requests go to long-lived external workers speaking line-delimited JSON.
//! When no worker can answer, local extractors take over, and as a last
//! resort the markup comes back untouched. Every result carries a `mode`
//! field naming the path that produced it.

pub mod config;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod processor;
pub mod worker;

pub use config::{DEFAULT_EXCHANGE_TIMEOUT, ProcessorConfig};
pub use error::{ArticleError, Result};
pub use fallback::{FallbackChain, FallbackExtractor, HeuristicExtractor, ReadabilityExtractor};
pub use processor::ArticleProcessor;
pub use worker::{
    Document, ExtractRequest, ExtractionOptions, Mode, WorkerCommand, WorkerPool,
    WorkerPoolConfig, WorkerPoolStats,
};
