//! Local extraction used when no worker can answer.
//!
//! Extractors run in order; the first to produce a non-empty document wins
//! and the document is tagged with that extractor's [`Mode`]. When all of
//! them come up empty the untouched markup is returned as [`Mode::Raw`].

mod article;
mod heuristic;

pub use article::ReadabilityExtractor;
pub use heuristic::HeuristicExtractor;

use crate::error::{ArticleError, Result};
use crate::worker::{Document, ExtractRequest, Mode};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

/// A local, synchronous extraction capability.
pub trait FallbackExtractor: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Extract a document from the request's markup.
    ///
    /// `Ok(None)` means nothing usable was found; `Err` is a failure worth
    /// reporting to the caller.
    fn extract(&self, request: &ExtractRequest) -> Result<Option<Document>>;
}

/// Ordered primary and secondary extractors.
pub struct FallbackChain {
    primary: Box<dyn FallbackExtractor>,
    secondary: Box<dyn FallbackExtractor>,
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(ReadabilityExtractor, HeuristicExtractor)
    }
}

impl FallbackChain {
    pub fn new(
        primary: impl FallbackExtractor + 'static,
        secondary: impl FallbackExtractor + 'static,
    ) -> Self {
        Self {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }

    /// Run the chain, always producing a tagged document.
    ///
    /// If an extractor failed (including by panicking) and nothing else
    /// succeeded, the raw document carries its message under `error`.
    pub fn run(&self, request: &ExtractRequest) -> Document {
        let mut last_error = None;
        match self.try_extractors(request, &mut last_error) {
            Ok(document) => document,
            Err(e) => {
                debug!(error = %e, "Returning raw markup");
                raw_document(&request.html, last_error.as_ref())
            }
        }
    }

    fn try_extractors(
        &self,
        request: &ExtractRequest,
        last_error: &mut Option<ArticleError>,
    ) -> Result<Document> {
        let stages = [
            (self.primary.as_ref(), Mode::FallbackPrimary),
            (self.secondary.as_ref(), Mode::FallbackSecondary),
        ];
        for (extractor, mode) in stages {
            match guarded_extract(extractor, request) {
                Ok(Some(document)) if !document.is_empty() => return Ok(mode.tag(document)),
                Ok(_) => debug!(extractor = extractor.name(), "Extractor found nothing"),
                Err(e) => {
                    warn!(extractor = extractor.name(), error = %e, "Extractor failed");
                    *last_error = Some(e);
                }
            }
        }
        Err(ArticleError::FallbackExhausted)
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}

/// Run an extractor, turning a panic into an error.
fn guarded_extract(
    extractor: &dyn FallbackExtractor,
    request: &ExtractRequest,
) -> Result<Option<Document>> {
    catch_unwind(AssertUnwindSafe(|| extractor.extract(request))).unwrap_or_else(|payload| {
        Err(ArticleError::Fallback {
            extractor: extractor.name(),
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        })
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The last-resort document: markup verbatim, tagged raw.
pub fn raw_document(html: &str, error: Option<&ArticleError>) -> Document {
    let mut document = Document::new();
    if let Some(e) = error {
        document.insert("error".to_string(), Value::String(e.to_string()));
    }
    document.insert("content".to_string(), Value::String(html.to_string()));
    Mode::Raw.tag(document)
}

// Shared scraper helpers.

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let selector = selector(css)?;
    document
        .select(&selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    let selector = selector(css)?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(String::from)
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let mut excerpt: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        excerpt.push_str("...");
    }
    excerpt
}
