//! Content transformation
//!
//! Decodes fetched bytes using the charset the server declared and renders
//! the result as one of three representations: plain text (markup stripped),
//! raw markup, or parsed JSON. Decoding is lossy and never fails on its own;
//! the failure modes here are empty content and unparsable JSON.

use encoding_rs::{Encoding, UTF_8};
use scraper::Html;
use serde_json::Value;

use crate::error::{ScrapeError, ScrapeResult};

/// Elements whose subtrees are dropped entirely when rendering plain text
const DROPPED_ELEMENTS: [&str; 5] = ["script", "style", "nav", "footer", "header"];

/// Requested output representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Html,
    Json,
}

impl OutputFormat {
    /// Parses the request's `format` field. Case-insensitive; absent or
    /// blank means `Text`; anything unrecognized is `invalid_format`.
    pub fn parse(raw: Option<&str>) -> ScrapeResult<Self> {
        let trimmed = match raw {
            Some(s) => s.trim(),
            None => return Ok(Self::Text),
        };
        if trimmed.is_empty() {
            return Ok(Self::Text);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            _ => Err(ScrapeError::InvalidFormat),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

/// Decodes `body` using the declared charset label, falling back to UTF-8
/// when the label is absent or unknown. Undecodable sequences are replaced,
/// never surfaced as errors.
pub fn decode_body(body: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

/// Renders fetched bytes in the requested format.
///
/// `json` returns the parsed document as structured data; `html` the decoded
/// string unmodified; `text` the markup-stripped, whitespace-collapsed text.
pub fn transform(body: &[u8], charset: Option<&str>, format: OutputFormat) -> ScrapeResult<Value> {
    let decoded = decode_body(body, charset);

    match format {
        OutputFormat::Json => {
            let value: Value = serde_json::from_str(&decoded)
                .map_err(|_| ScrapeError::InvalidJson)?;
            if value.is_null() {
                return Err(ScrapeError::EmptyResponse);
            }
            Ok(value)
        }
        OutputFormat::Html => {
            if decoded.trim().is_empty() {
                return Err(ScrapeError::EmptyResponse);
            }
            Ok(Value::String(decoded))
        }
        OutputFormat::Text => {
            let text = html_to_text(&decoded);
            if text.is_empty() {
                return Err(ScrapeError::EmptyResponse);
            }
            Ok(Value::String(text))
        }
    }
}

/// Strips markup from `html`, dropping script/style/nav/footer/header
/// subtrees, and collapses runs of whitespace to single spaces.
///
/// Plain text input passes through unchanged apart from whitespace
/// normalization, since the parser treats it as one text node.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut parts: Vec<&str> = Vec::new();
    // Depth-first, children pushed in reverse so text lands in document order
    let mut stack = vec![document.tree.root()];
    while let Some(node) = stack.pop() {
        if let Some(element) = node.value().as_element() {
            if DROPPED_ELEMENTS.contains(&element.name()) {
                continue;
            }
        }
        if let Some(text) = node.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
        let children: Vec<_> = node.children().collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }

    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
