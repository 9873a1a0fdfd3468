//! Canonical header model.
//!
//! Internally every header set is a [`Headers`] map: lower-cased names, each
//! mapped to an ordered list of values. Inbound events carry headers in two
//! conventions (single-valued and multi-valued) and outbound HTTP calls need
//! one line per header, so this module converts between the three.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Headers that take only their first value when flattened into one line.
const NEVER_SPLIT: &[&str] = &[
    "age",
    "authorization",
    "content-length",
    "content-type",
    "etag",
    "expires",
    "from",
    "host",
    "if-modified-since",
    "if-unmodified-since",
    "last-modified",
    "location",
    "max-forwards",
    "proxy-authorization",
    "referer",
    "retry-after",
    "server",
    "user-agent",
];

/// Hop-by-hop headers never forwarded to a backend.
pub const REQUEST_HOP_BY_HOP: &[&str] = &["host", "connection", "transfer-encoding"];

/// Forwarding headers only passed through when explicitly enabled.
pub const FORWARDED: &[&str] = &[
    "x-forwarded-host",
    "x-forwarded-port",
    "x-forwarded-for",
    "x-forwarded-proto",
];

/// Headers stripped from backend responses before they reach the caller.
pub const RESPONSE_STRIPPED: &[&str] = &[
    "content-length",
    "cache-control",
    "connection",
    "transfer-encoding",
    "pragma",
    "authorization",
    "x-api-key",
    "server",
];

/// Canonical multi-valued header map keyed by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge both conventions. Keys are lower-cased; on collision the
    /// multi-valued entry wins.
    pub fn canonical(
        single: Option<&BTreeMap<String, String>>,
        multi: Option<&BTreeMap<String, Vec<String>>>,
    ) -> Self {
        let mut headers = Self::new();
        for (name, value) in single.into_iter().flatten() {
            headers.insert(name, vec![value.clone()]);
        }
        for (name, values) in multi.into_iter().flatten() {
            headers.insert(name, values.clone());
        }
        headers
    }

    /// First value of every header.
    pub fn single_valued(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// The canonical map as-is, for events and responses.
    pub fn multi_valued(&self) -> BTreeMap<String, Vec<String>> {
        self.0.clone()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Replace all values of `name`.
    pub fn insert(&mut self, name: &str, values: Vec<String>) {
        self.0.insert(name.to_ascii_lowercase(), values);
    }

    /// Replace all values of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.insert(name, vec![value.into()]);
    }

    /// Add one more value to `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<String>> {
        self.0.iter()
    }

    /// A copy with `overlay` applied on top (overlay wins per header).
    pub fn merged(&self, overlay: &Headers) -> Headers {
        let mut merged = self.clone();
        for (name, values) in overlay.iter() {
            merged.0.insert(name.clone(), values.clone());
        }
        merged
    }

    /// A copy without the given names (case-insensitive).
    pub fn omit(&self, names: &[&str]) -> Headers {
        Headers(
            self.0
                .iter()
                .filter(|(name, _)| !names.iter().any(|n| n.eq_ignore_ascii_case(name)))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        )
    }

    /// A copy with every value passed through `f`.
    pub fn map_values(&self, mut f: impl FnMut(&str) -> String) -> Headers {
        Headers(
            self.0
                .iter()
                .map(|(name, values)| (name.clone(), values.iter().map(|v| f(v)).collect()))
                .collect(),
        )
    }

    /// One `(name, value)` line per header as an HTTP client sends them.
    ///
    /// `set-cookie` stays one line per value, `cookie` joins with `"; "`,
    /// never-split headers keep their first value and everything else joins
    /// with `", "`.
    pub fn to_transport(&self) -> Vec<(String, String)> {
        let mut lines = Vec::with_capacity(self.0.len());
        for (name, values) in &self.0 {
            if values.is_empty() {
                continue;
            }
            match name.as_str() {
                "set-cookie" => {
                    lines.extend(values.iter().map(|v| (name.clone(), v.clone())));
                }
                "cookie" => lines.push((name.clone(), concatenate(values, "; "))),
                n if NEVER_SPLIT.contains(&n) => lines.push((name.clone(), values[0].clone())),
                _ => lines.push((name.clone(), concatenate(values, ", "))),
            }
        }
        lines
    }
}

impl FromIterator<(String, Vec<String>)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, values) in iter {
            headers.insert(&name, values);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Join values into one header line.
///
/// A lone value is returned untouched. Otherwise values containing the
/// separator, a quote or a backslash are quoted, with quotes and
/// backslashes escaped.
pub fn concatenate(values: &[String], separator: &str) -> String {
    if let [only] = values {
        return only.clone();
    }
    values
        .iter()
        .map(|value| {
            if value.contains(separator) || value.contains('"') || value.contains('\\') {
                quote(value)
            } else {
                value.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Inverse of [`concatenate`] for lines holding more than one value.
pub fn split(line: &str, separator: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut rest = line;

    loop {
        let (value, remainder) = if rest.starts_with('"') {
            take_quoted(rest)
        } else {
            match rest.find(separator) {
                Some(at) => (rest[..at].to_string(), &rest[at..]),
                None => (rest.to_string(), ""),
            }
        };
        values.push(value);

        match remainder.strip_prefix(separator) {
            Some(next) => rest = next,
            None => break,
        }
    }
    values
}

/// Read a quoted token, returning the unescaped value and what follows it.
fn take_quoted(input: &str) -> (String, &str) {
    let mut value = String::new();
    let mut chars = input.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    value.push(escaped);
                }
            }
            '"' => return (value, &input[i + 1..]),
            other => value.push(other),
        }
    }
    // Unterminated quote: keep what was read.
    (value, "")
}
