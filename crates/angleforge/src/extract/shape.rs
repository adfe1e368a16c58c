//! Recognised shapes of the upstream result payload.

use serde_json::{Map, Value};

/// Keys under which a list of variants is commonly returned.
pub(crate) const VARIANT_ARRAY_KEYS: &[&str] =
    &["swipe_results", "variants", "angles", "results", "items"];

/// Keys holding the content of a single variant.
pub(crate) const INLINE_CONTENT_KEYS: &[&str] = &["content", "sections", "slots"];

/// Keys naming the angle of a variant, in order of preference.
pub(crate) const LABEL_KEYS: &[&str] = &["angle", "angle_label", "label", "name", "title"];

/// Recursion guard for the nested-shape search and flattening.
pub(crate) const MAX_DEPTH: usize = 64;

/// How a JSON value should be read.
#[derive(Debug)]
pub(crate) enum PayloadShape<'a> {
    /// A list of variants, either the value itself or under a well-known key.
    VariantArray(&'a [Value]),
    /// One variant whose slots sit under a content key.
    InlineContent(&'a Map<String, Value>),
    /// The whole payload is a single piece of text.
    FlatString(&'a str),
    /// An object with none of the known keys; its children may hold one of
    /// the other shapes.
    Nested(&'a Map<String, Value>),
    Unrecognized,
}

impl<'a> PayloadShape<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Array(items) => PayloadShape::VariantArray(items),
            Value::String(s) if !s.trim().is_empty() => PayloadShape::FlatString(s),
            Value::Object(map) => {
                for key in VARIANT_ARRAY_KEYS {
                    if let Some(Value::Array(items)) = map.get(*key) {
                        return PayloadShape::VariantArray(items);
                    }
                }
                let has_inline = INLINE_CONTENT_KEYS.iter().any(|key| {
                    matches!(map.get(*key), Some(Value::Object(_)) | Some(Value::String(_)))
                });
                if has_inline {
                    PayloadShape::InlineContent(map)
                } else {
                    PayloadShape::Nested(map)
                }
            }
            _ => PayloadShape::Unrecognized,
        }
    }

    /// Whether this shape carries structured variants directly.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            PayloadShape::VariantArray(_) | PayloadShape::InlineContent(_)
        )
    }
}

/// First non-blank string under one of the label keys, with the key it
/// was found under.
pub(crate) fn find_label(map: &Map<String, Value>) -> Option<(&'static str, String)> {
    LABEL_KEYS.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some((*key, s.trim().to_string())),
        _ => None,
    })
}

/// Flattens `value` into `out` using dotted keys below `prefix`.
///
/// Nulls are skipped; numbers and booleans are rendered as text.
pub(crate) fn flatten_into(
    prefix: &str,
    value: &Value,
    out: &mut std::collections::BTreeMap<String, String>,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Null => {}
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(&join_key(prefix, &i.to_string()), item, out, depth + 1);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten_into(&join_key(prefix, key), item, out, depth + 1);
            }
        }
    }
}

pub(crate) fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}
