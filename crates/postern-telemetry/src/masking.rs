//! Masking of sensitive values in logged request and response dumps.

use serde_json::Value;

/// Keys whose values never appear in masked dumps (compared case-insensitively).
const MASKED_KEYS: &[&str] = &["authorization", "x-api-key", "apikey", "principalid"];

/// Replacement for masked values.
pub const MASK: &str = "****";

/// Bodies longer than this are truncated in masked dumps.
const MAX_BODY_CHARS: usize = 76;

/// How dumps are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpMode {
    /// Credentials masked and long strings truncated.
    #[default]
    Masked,
    /// Dumped as-is. Only for debugging.
    Verbatim,
}

impl DumpMode {
    /// Render a value for logging.
    pub fn render(self, value: &Value) -> String {
        match self {
            DumpMode::Masked => mask_value(value).to_string(),
            DumpMode::Verbatim => value.to_string(),
        }
    }
}

/// Return a copy of `value` with credentials masked and long bodies truncated.
pub fn mask_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let lowered = key.to_ascii_lowercase();
                    let masked = if MASKED_KEYS.contains(&lowered.as_str()) {
                        mask_credential(v)
                    } else if lowered == "body" {
                        truncate_body(v)
                    } else {
                        mask_value(v)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_value).collect()),
        other => other.clone(),
    }
}

fn mask_credential(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(MASK.to_string()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(_) => Value::String(MASK.to_string()),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn truncate_body(value: &Value) -> Value {
    let text = match value {
        Value::Null => return Value::Null,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_BODY_CHARS {
        let mut short: String = text.chars().take(MAX_BODY_CHARS - 1).collect();
        short.push_str("....");
        Value::String(short)
    } else {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_are_masked() {
        let dump = json!({
            "headers": {"Authorization": "Bearer abc", "X-Api-Key": "k", "accept": "*/*"},
            "requestContext": {"authorizer": {"principalId": "user-1"}}
        });

        let masked = mask_value(&dump);
        assert_eq!(masked["headers"]["Authorization"], MASK);
        assert_eq!(masked["headers"]["X-Api-Key"], MASK);
        assert_eq!(masked["headers"]["accept"], "*/*");
        assert_eq!(masked["requestContext"]["authorizer"]["principalId"], MASK);
    }

    #[test]
    fn test_multi_value_credentials_are_masked() {
        let dump = json!({"multiValueHeaders": {"authorization": ["a", "b"]}});
        assert_eq!(
            mask_value(&dump)["multiValueHeaders"]["authorization"],
            json!([MASK, MASK])
        );
    }

    #[test]
    fn test_long_body_truncated() {
        let long = "x".repeat(100);
        let masked = mask_value(&json!({ "body": long, "path": long }));
        let body = masked["body"].as_str().unwrap();
        assert_eq!(body.len(), 75 + 4);
        assert!(body.ends_with("...."));
        assert_eq!(masked["path"].as_str().unwrap().len(), 100);
    }

    #[test]
    fn test_boundary_body_kept() {
        let exact = "y".repeat(76);
        let masked = mask_value(&json!({ "body": exact }));
        assert_eq!(masked["body"].as_str().unwrap().len(), 76);
    }

    #[test]
    fn test_structured_body_is_stringified_when_long() {
        let masked = mask_value(&json!({ "body": { "items": vec!["abcdefgh"; 20] } }));
        assert!(masked["body"].as_str().unwrap().ends_with("...."));
    }

    #[test]
    fn test_verbatim_dump_untouched() {
        let dump = json!({"authorization": "secret"});
        assert_eq!(DumpMode::Verbatim.render(&dump), r#"{"authorization":"secret"}"#);
        assert!(DumpMode::Masked.render(&dump).contains(MASK));
    }
}
