//! Rich-text payloads and the plain-text previews shown in draft lists.
//!
//! The editor can hand us HTML or a delta-like run encoding
//! (`insert=<text>` segments). Rows written with a known origin carry a
//! [`ContentFormat`] tag; untagged rows are sniffed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

const DELTA_KEYWORD: &str = "insert=";

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[^>]+(>|$)").expect("valid html tag pattern"));

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ContentFormat {
    Html,
    #[strum(serialize = "delta")]
    #[serde(rename = "delta")]
    DeltaEncoded,
    #[strum(serialize = "plain")]
    #[serde(rename = "plain")]
    PlainText,
}

impl ContentFormat {
    /// Best-effort guess for payloads stored without a tag.
    pub fn detect(payload: &str) -> Self {
        if HTML_TAG.is_match(payload) {
            ContentFormat::Html
        } else if payload.contains(DELTA_KEYWORD) {
            ContentFormat::DeltaEncoded
        } else {
            ContentFormat::PlainText
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftContent {
    pub format: Option<ContentFormat>,
    pub body: String,
}

impl DraftContent {
    pub fn new(format: ContentFormat, body: impl Into<String>) -> Self {
        Self {
            format: Some(format),
            body: body.into(),
        }
    }

    pub fn untagged(body: impl Into<String>) -> Self {
        Self {
            format: None,
            body: body.into(),
        }
    }

    pub fn preview(&self) -> String {
        match self.format {
            None => extract_preview(&self.body),
            Some(ContentFormat::Html) => strip_tags(&self.body),
            Some(ContentFormat::DeltaEncoded) => {
                join_delta_inserts(&self.body).unwrap_or_else(|| fallback(&self.body))
            }
            Some(ContentFormat::PlainText) => self.body.clone(),
        }
    }
}

/// Converts an untagged payload into display text. Never fails: anything
/// that is neither HTML nor delta-encoded comes back unchanged.
pub fn extract_preview(payload: &str) -> String {
    if payload.is_empty() {
        return String::new();
    }
    if HTML_TAG.is_match(payload) {
        return strip_tags(payload);
    }
    join_delta_inserts(payload).unwrap_or_else(|| fallback(payload))
}

fn fallback(payload: &str) -> String {
    tracing::trace!(len = payload.len(), "preview extraction fell back to raw payload");
    payload.to_string()
}

fn strip_tags(payload: &str) -> String {
    HTML_TAG.replace_all(payload, "").into_owned()
}

// A segment runs until a structural brace or the next keyword. The single
// space separating it from the next keyword is not part of the text.
fn join_delta_inserts(payload: &str) -> Option<String> {
    let mut pieces = payload.split(DELTA_KEYWORD);
    pieces.next()?;
    let mut segments = pieces.peekable();
    segments.peek()?;

    let mut out = String::new();
    while let Some(segment) = segments.next() {
        match segment.find(&['{', '}'][..]) {
            Some(end) => out.push_str(&segment[..end]),
            None if segments.peek().is_some() => {
                out.push_str(segment.strip_suffix(' ').unwrap_or(segment))
            }
            None => out.push_str(segment),
        }
    }
    Some(out)
}
