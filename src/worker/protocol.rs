//! Line protocol spoken with worker subprocesses.
//!
//! Each request is one JSON object terminated by `\n`; the worker answers with
//! exactly one JSON object line. There is no request id, so a handle can only
//! ever have one request outstanding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// An extracted document: an arbitrary JSON object.
pub type Document = Map<String, Value>;

/// Key injected into every document returned to callers.
pub const MODE_KEY: &str = "mode";

/// Extraction options forwarded verbatim to the worker.
///
/// Every field is always serialized. Unset values go out as `null` (or the
/// neutral `false`/`[]`), never as a missing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOptions {
    pub debug: bool,
    pub max_elems_to_parse: Option<u32>,
    pub nb_top_candidates: Option<u32>,
    pub char_threshold: Option<u32>,
    pub classes_to_preserve: Vec<String>,
    pub keep_classes: bool,
    pub serializer: Option<String>,
    #[serde(rename = "disableJSONLD")]
    pub disable_json_ld: bool,
    pub allowed_video_regex: Option<String>,
}

/// One extraction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRequest {
    /// Raw markup.
    pub html: String,
    /// Where the markup came from. May be empty.
    pub url: String,
    #[serde(flatten)]
    pub options: ExtractionOptions,
}

impl ExtractRequest {
    /// Create a request with default options.
    pub fn new(html: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            url: url.into(),
            options: ExtractionOptions::default(),
        }
    }

    /// Replace the extraction options.
    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Parse a worker response line into a document.
///
/// The line must hold a single JSON object.
pub fn parse_response(line: &str) -> std::result::Result<Document, String> {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Pipeline stage that produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Worker subprocess answered.
    External,
    /// Primary local extractor.
    FallbackPrimary,
    /// Secondary local extractor.
    FallbackSecondary,
    /// Markup returned untouched.
    Raw,
}

impl Mode {
    pub const ALL: [Mode; 4] = [
        Mode::External,
        Mode::FallbackPrimary,
        Mode::FallbackSecondary,
        Mode::Raw,
    ];

    /// Wire tag for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::FallbackPrimary => "fallback_primary",
            Self::FallbackSecondary => "fallback_secondary",
            Self::Raw => "raw",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == tag)
    }

    /// Read the mode tag from a document, if present and valid.
    pub fn of(document: &Document) -> Option<Self> {
        document
            .get(MODE_KEY)
            .and_then(Value::as_str)
            .and_then(Self::from_tag)
    }

    /// Set this mode on a document, replacing any mode the producer wrote.
    pub fn tag(self, mut document: Document) -> Document {
        document.insert(MODE_KEY.to_string(), Value::String(self.as_str().to_string()));
        document
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
