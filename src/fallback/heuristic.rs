//! Secondary fallback: a plain structural guess at title and body.

use super::{FallbackExtractor, element_text, first_text, selector};
use crate::error::Result;
use crate::worker::{Document, ExtractRequest};
use scraper::{ElementRef, Html};
use serde_json::json;

/// Containers that usually hold the article body, in order of preference.
const CONTENT_SELECTORS: &[&str] = &["article", "main", r#"[role="main"]"#];

/// Elements considered when looking for the densest run of paragraphs.
const BLOCK_SELECTOR: &str = "div, section, td";

/// Title from `<title>` or the first `<h1>`; content from the most
/// article-like container.
///
/// Less selective than [`super::ReadabilityExtractor`] but tolerant of
/// markup that defeats scoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

impl FallbackExtractor for HeuristicExtractor {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn extract(&self, request: &ExtractRequest) -> Result<Option<Document>> {
        let page = Html::parse_document(&request.html);

        let title = first_text(&page, "title")
            .or_else(|| first_text(&page, "h1"))
            .unwrap_or_default();
        let body = main_content(&page);

        if title.is_empty() && body.is_none() {
            return Ok(None);
        }

        let (content, text) = body
            .map(|el| (el.inner_html().trim().to_string(), element_text(el)))
            .unwrap_or_default();

        let mut document = Document::new();
        document.insert("title".into(), json!(title));
        document.insert("content".into(), json!(content));
        document.insert("textContent".into(), json!(text));
        document.insert("length".into(), json!(text.chars().count()));
        Ok(Some(document))
    }
}

fn main_content(page: &Html) -> Option<ElementRef<'_>> {
    CONTENT_SELECTORS
        .iter()
        .find_map(|css| first_with_text(page, css))
        .or_else(|| densest_block(page))
        .or_else(|| first_with_text(page, "body"))
}

fn first_with_text<'a>(page: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = selector(css)?;
    page.select(&selector)
        .find(|el| el.text().any(|t| !t.trim().is_empty()))
}

/// The block whose direct `<p>` children carry the most text.
fn densest_block(page: &Html) -> Option<ElementRef<'_>> {
    let selector = selector(BLOCK_SELECTOR)?;
    page.select(&selector)
        .map(|el| (el, paragraph_chars(el)))
        .filter(|(_, chars)| *chars > 0)
        .max_by_key(|(_, chars)| *chars)
        .map(|(el, _)| el)
}

fn paragraph_chars(block: ElementRef<'_>) -> usize {
    block
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "p")
        .map(|p| p.text().map(|t| t.trim().chars().count()).sum::<usize>())
        .sum()
}
