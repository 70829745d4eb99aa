//! Request orchestration: worker first, local fallbacks after.

use crate::config::ProcessorConfig;
use crate::error::{ArticleError, Result};
use crate::fallback::{FallbackChain, FallbackExtractor, panic_message, raw_document};
use crate::worker::{Document, ExtractRequest, Mode, WorkerPool};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Turns markup into an extracted document, whatever state the workers are in.
///
/// [`process`](Self::process) never fails: worker faults, timeouts, a
/// degraded or closed pool, and failing fallbacks all end in a document
/// whose `mode` says which path produced it.
///
/// # Example
///
/// ```no_run
/// use article_pool::{ArticleProcessor, ProcessorConfig};
///
/// # async fn run() {
/// let processor = ArticleProcessor::new(ProcessorConfig::default().with_env_overrides());
/// if let Err(e) = processor.start().await {
///     eprintln!("workers unavailable, running on fallbacks: {e}");
/// }
/// let doc = processor.process_article("<html>...</html>", "https://example.com/").await;
/// println!("{}", doc["mode"]);
/// processor.shutdown().await;
/// # }
/// ```
#[derive(Debug)]
pub struct ArticleProcessor {
    config: ProcessorConfig,
    pool: WorkerPool,
    fallbacks: FallbackChain,
}

impl ArticleProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let pool = WorkerPool::new(config.pool.clone());
        Self {
            config,
            pool,
            fallbacks: FallbackChain::default(),
        }
    }

    /// Replace the local extractors used when the worker path fails.
    pub fn with_fallbacks(
        mut self,
        primary: impl FallbackExtractor + 'static,
        secondary: impl FallbackExtractor + 'static,
    ) -> Self {
        self.fallbacks = FallbackChain::new(primary, secondary);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Start every worker.
    ///
    /// On error the processor stays usable: unstarted slots are spawned on
    /// demand and requests fall back while that keeps failing.
    pub async fn start(&self) -> Result<()> {
        self.config.validate()?;
        self.pool.initialize().await
    }

    /// Extract one document. Always returns a document tagged with its [`Mode`].
    #[instrument(skip_all, fields(url = %request.url, html_len = request.html.len()))]
    pub async fn process(&self, request: &ExtractRequest) -> Document {
        let started = Instant::now();

        let document = match contain_panic(self.process_external(request)).await {
            Ok(document) => Mode::External.tag(document),
            Err(e @ ArticleError::Panicked(_)) => {
                error!(error = %e, "External extraction panicked, returning raw markup");
                raw_document(&request.html, Some(&e))
            }
            Err(e) => {
                warn!(error = %e, "External extraction failed, using local fallbacks");
                self.fallbacks.run(request)
            }
        };

        info!(
            mode = Mode::of(&document).map(|m| m.as_str()).unwrap_or("unknown"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Article processed"
        );
        document
    }

    /// [`process`](Self::process) with default extraction options.
    pub async fn process_article(&self, html: &str, url: &str) -> Document {
        self.process(&ExtractRequest::new(html, url)).await
    }

    /// Stop all workers. Later requests are served by the fallbacks.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn process_external(&self, request: &ExtractRequest) -> Result<Document> {
        let mut lease = self.pool.acquire().await?;
        let slot = lease.slot_id();

        let result = lease.exchange(request, self.config.exchange_timeout).await;
        let healthy = result.as_ref().err().is_none_or(|e| !e.is_worker_fault());
        if let Err(e) = self.pool.release(lease, healthy).await {
            // The answer, if any, is still good; the slot will report again on
            // its next checkout.
            debug!(slot, error = %e, "Worker release reported a problem");
        }
        result
    }
}

/// Turn a panic on the worker path into [`ArticleError::Panicked`].
///
/// A lease held by the panicking future discards its worker as it unwinds.
async fn contain_panic(external: impl Future<Output = Result<Document>>) -> Result<Document> {
    AssertUnwindSafe(external)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(ArticleError::Panicked(panic_message(payload.as_ref()))))
}
