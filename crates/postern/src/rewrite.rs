//! URL rewriting over headers and bodies.
//!
//! A [`ReplacePattern`] matches either a literal URL or a URL-shaped
//! expression. Rewrites are always global and case-sensitive.

use std::borrow::Cow;

use regex_lite::{NoExpand, Regex};
use serde_json::Value;
use tracing::debug;

use crate::headers::Headers;

/// A compiled find pattern for URL rewriting.
#[derive(Debug, Clone)]
pub struct ReplacePattern {
    regex: Regex,
}

impl ReplacePattern {
    /// Match `text` exactly.
    pub fn literal(text: &str) -> Result<Self, regex_lite::Error> {
        Self::expression(&regex_lite::escape(text))
    }

    /// Match any scheme and host followed by `path`, e.g. the links a
    /// backend emits under a name other than the one it was called with.
    /// An empty `path` matches the origin of every absolute URL.
    pub fn any_host_with_path(path: &str) -> Result<Self, regex_lite::Error> {
        Self::expression(&format!("https?://[^/]+{}", regex_lite::escape(path)))
    }

    fn expression(expr: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            regex: Regex::new(&format!("(?m){}", expr))?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Replace every match; `replacement` is inserted verbatim.
    pub fn replace_all<'t>(&self, text: &'t str, replacement: &str) -> Cow<'t, str> {
        self.regex.replace_all(text, NoExpand(replacement))
    }
}

/// How rewrites are applied to structured values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// Replace inside every string leaf.
    #[default]
    Structural,
    /// Serialize to JSON, replace in the text, parse back.
    Serialized,
}

impl RewriteStrategy {
    pub fn from_flag(use_string_replace: bool) -> Self {
        if use_string_replace {
            Self::Serialized
        } else {
            Self::Structural
        }
    }

    /// Rewrite every header value.
    pub fn rewrite_headers(
        self,
        headers: &Headers,
        pattern: &ReplacePattern,
        replacement: &str,
    ) -> Headers {
        match self {
            Self::Structural => headers.map_values(|v| pattern.replace_all(v, replacement).into()),
            Self::Serialized => {
                let serialized = match serde_json::to_string(headers) {
                    Ok(s) => s,
                    Err(_) => return Self::Structural.rewrite_headers(headers, pattern, replacement),
                };
                let rewritten = pattern.replace_all(&serialized, replacement);
                match serde_json::from_str(&rewritten) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        // the replacement broke the JSON; fall back to leaves
                        debug!(error = %e, "serialized header rewrite produced invalid JSON");
                        Self::Structural.rewrite_headers(headers, pattern, replacement)
                    }
                }
            }
        }
    }

    /// Rewrite every string in a JSON value.
    pub fn rewrite_value(self, value: &Value, pattern: &ReplacePattern, replacement: &str) -> Value {
        match self {
            Self::Structural => deep_replace(value, pattern, replacement),
            Self::Serialized => {
                let serialized = value.to_string();
                let rewritten = pattern.replace_all(&serialized, replacement);
                serde_json::from_str(&rewritten)
                    .unwrap_or_else(|_| deep_replace(value, pattern, replacement))
            }
        }
    }
}

/// Apply `pattern` to every string leaf of `value`. Object keys are kept.
pub fn deep_replace(value: &Value, pattern: &ReplacePattern, replacement: &str) -> Value {
    match value {
        Value::String(s) => Value::String(pattern.replace_all(s, replacement).into_owned()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| deep_replace(item, pattern, replacement))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), deep_replace(v, pattern, replacement)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Rewrite body text.
pub fn rewrite_text(text: &str, pattern: &ReplacePattern, replacement: &str) -> String {
    pattern.replace_all(text, replacement).into_owned()
}
