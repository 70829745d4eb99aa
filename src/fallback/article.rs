//! Primary fallback: readability scoring plus page metadata.

use super::{FallbackExtractor, excerpt, first_text, meta_content, selector};
use crate::error::{ArticleError, Result};
use crate::worker::{Document, ExtractRequest};
use scraper::Html;
use serde_json::{Map, Value, json};
use std::io::Cursor;
use url::Url;

const NAME: &str = "readability";

/// Base used to resolve relative links when the request URL is unusable.
const PLACEHOLDER_URL: &str = "http://example.com";

const EXCERPT_CHARS: usize = 200;

/// Readability-style article extraction.
///
/// Produces the same field names a worker would (`title`, `content`,
/// `textContent`, `length`, `excerpt`, `byline`, `siteName`, `lang`) and,
/// unless `disableJSONLD` is set, prefers schema.org metadata for the
/// headline, author and publish date.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadabilityExtractor;

impl FallbackExtractor for ReadabilityExtractor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extract(&self, request: &ExtractRequest) -> Result<Option<Document>> {
        let base = Url::parse(&request.url)
            .or_else(|_| Url::parse(PLACEHOLDER_URL))
            .map_err(|e| fallback_error(e.to_string()))?;

        let mut cursor = Cursor::new(request.html.as_bytes());
        let product = ::readability::extractor::extract(&mut cursor, &base)
            .map_err(|e| fallback_error(format!("{e:?}")))?;

        let text = product.text.trim();
        let text_len = text.chars().count();
        if text.is_empty() {
            return Ok(None);
        }
        if let Some(threshold) = request.options.char_threshold
            && text_len < threshold as usize
        {
            return Ok(None);
        }

        let page = Html::parse_document(&request.html);
        let linked_data = if request.options.disable_json_ld {
            Map::new()
        } else {
            article_linked_data(&page)
        };

        let title = linked_string(&linked_data, "headline")
            .or_else(|| Some(product.title.trim().to_string()).filter(|t| !t.is_empty()))
            .or_else(|| first_text(&page, "title"))
            .unwrap_or_default();
        let byline = linked_author(&linked_data)
            .or_else(|| meta_content(&page, r#"meta[name="author"]"#));
        let excerpt = meta_content(&page, r#"meta[name="description"]"#)
            .or_else(|| meta_content(&page, r#"meta[property="og:description"]"#))
            .unwrap_or_else(|| excerpt(text, EXCERPT_CHARS));

        let mut document = Document::new();
        document.insert("title".into(), json!(title));
        document.insert("byline".into(), json!(byline));
        document.insert("content".into(), json!(product.content));
        document.insert("textContent".into(), json!(text));
        document.insert("length".into(), json!(text_len));
        document.insert("excerpt".into(), json!(excerpt));
        document.insert(
            "siteName".into(),
            json!(meta_content(&page, r#"meta[property="og:site_name"]"#)),
        );
        document.insert("lang".into(), json!(document_lang(&page)));
        if let Some(published) = linked_string(&linked_data, "datePublished")
            .or_else(|| meta_content(&page, r#"meta[property="article:published_time"]"#))
        {
            document.insert("publishedTime".into(), json!(published));
        }
        Ok(Some(document))
    }
}

fn fallback_error(message: String) -> ArticleError {
    ArticleError::Fallback {
        extractor: NAME,
        message,
    }
}

fn document_lang(page: &Html) -> Option<String> {
    let selector = selector("html[lang]")?;
    page.select(&selector)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
}

/// Schema.org types that describe the article itself.
const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "Report",
    "ScholarlyArticle",
    "TechArticle",
];

/// First article-like JSON-LD object on the page, if any.
fn article_linked_data(page: &Html) -> Map<String, Value> {
    let Some(selector) = selector(r#"script[type="application/ld+json"]"#) else {
        return Map::new();
    };
    for element in page.select(&selector) {
        let content = element.inner_html();
        let Ok(value) = serde_json::from_str::<Value>(content.trim()) else {
            continue;
        };
        if let Some(article) = find_article(&value) {
            return article.clone();
        }
    }
    Map::new()
}

fn find_article(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article),
        Value::Object(obj) => {
            if let Some(Value::Array(graph)) = obj.get("@graph") {
                return graph.iter().find_map(find_article);
            }
            is_article(obj).then_some(obj)
        }
        _ => None,
    }
}

fn is_article(obj: &Map<String, Value>) -> bool {
    match obj.get("@type") {
        Some(Value::String(t)) => ARTICLE_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| ARTICLE_TYPES.contains(&t)),
        _ => false,
    }
}

fn linked_string(data: &Map<String, Value>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// `author` may be a name, a Person object, or a list of either.
fn linked_author(data: &Map<String, Value>) -> Option<String> {
    fn name_of(value: &Value) -> Option<String> {
        match value {
            Value::String(name) => Some(name.trim().to_string()),
            Value::Object(obj) => obj
                .get("name")
                .and_then(Value::as_str)
                .map(|n| n.trim().to_string()),
            _ => None,
        }
    }

    let names: Vec<String> = match data.get("author")? {
        Value::Array(authors) => authors.iter().filter_map(name_of).collect(),
        other => name_of(other).into_iter().collect(),
    };
    let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
    (!names.is_empty()).then(|| names.join(", "))
}
