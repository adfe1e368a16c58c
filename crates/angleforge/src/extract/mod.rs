//! Normalises the upstream result payload into content variants.
//!
//! The generation service has returned its output in several layouts over
//! time. Each known layout is a [`PayloadShape`]; anything else degrades to
//! a depth-first scan for markup-bearing strings and, failing that, to an
//! empty list. Only input that is not JSON at all is an error.

mod shape;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use shape::{find_label, flatten_into, join_key, PayloadShape, INLINE_CONTENT_KEYS, MAX_DEPTH};

/// Slot name used when a variant is a single piece of text.
pub const BODY_SLOT: &str = "body";

static RE_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*/?\s*[a-zA-Z][a-zA-Z0-9-]*(\s[^<>]*)?/?\s*>").unwrap());

/// One creative angle extracted from a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentVariant {
    pub angle_label: String,
    /// Slot name to text or HTML fragment.
    pub content: BTreeMap<String, String>,
    /// Position within the payload's variant list.
    pub source_index: usize,
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Result payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parses `raw` and extracts its content variants.
pub fn extract(raw: &str) -> Result<Vec<ContentVariant>, ExtractionError> {
    let value = parse(raw)?;
    Ok(extract_value(&value))
}

/// Parses without serde_json's nesting limit; the walk below stops at
/// [`MAX_DEPTH`] on its own, so deep but valid JSON is not malformed.
fn parse(text: &str) -> Result<Value, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = Value::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Extracts content variants from an already parsed payload.
pub fn extract_value(value: &Value) -> Vec<ContentVariant> {
    extract_at(value, 0)
}

fn extract_at(value: &Value, depth: usize) -> Vec<ContentVariant> {
    if depth > MAX_DEPTH {
        return Vec::new();
    }

    match PayloadShape::classify(value) {
        PayloadShape::VariantArray(items) => items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| variant_from_item(index, item))
            .collect(),
        PayloadShape::InlineContent(map) => variant_from_object(0, map).into_iter().collect(),
        PayloadShape::FlatString(text) => {
            // Some producers double-encode their JSON.
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Ok(inner) = parse(text) {
                    return extract_at(&inner, depth + 1);
                }
            }
            vec![text_variant(0, default_label(0), text)]
        }
        PayloadShape::Nested(_) => match find_structured(value, depth) {
            Some(inner) => extract_at(inner, depth + 1),
            None => scan_markup(value),
        },
        PayloadShape::Unrecognized => Vec::new(),
    }
}

fn default_label(index: usize) -> String {
    format!("Angle {}", index + 1)
}

fn text_variant(index: usize, label: String, text: &str) -> ContentVariant {
    ContentVariant {
        angle_label: label,
        content: BTreeMap::from([(BODY_SLOT.to_string(), text.to_string())]),
        source_index: index,
    }
}

fn variant_from_item(index: usize, item: &Value) -> Option<ContentVariant> {
    match item {
        Value::Object(map) => variant_from_object(index, map),
        Value::String(s) if !s.trim().is_empty() => {
            Some(text_variant(index, default_label(index), s))
        }
        _ => None,
    }
}

/// Builds a variant from one object. Slots come from the first inline
/// content key if there is one, otherwise from every field except the one
/// that supplied the label. Variants without any slot are dropped.
fn variant_from_object(index: usize, map: &Map<String, Value>) -> Option<ContentVariant> {
    let label = find_label(map);
    let mut content = BTreeMap::new();

    let inline = INLINE_CONTENT_KEYS
        .iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()));
    match inline {
        Some(Value::String(s)) => {
            content.insert(BODY_SLOT.to_string(), s.clone());
        }
        Some(other) => flatten_into("", other, &mut content, 1),
        None => {
            let label_key = label.as_ref().map(|(key, _)| *key);
            for (key, value) in map {
                if Some(key.as_str()) != label_key {
                    flatten_into(key, value, &mut content, 1);
                }
            }
        }
    }

    if content.is_empty() {
        log::debug!("Skipping variant {} with no content slots", index);
        return None;
    }

    Some(ContentVariant {
        angle_label: label
            .map(|(_, l)| l)
            .unwrap_or_else(|| default_label(index)),
        content,
        source_index: index,
    })
}

/// Depth-first search for the first object below `value` that carries a
/// structured shape.
fn find_structured(value: &Value, depth: usize) -> Option<&Value> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => map.values().find_map(|child| visit(child, depth)),
        Value::Array(items) => items.iter().find_map(|child| visit(child, depth)),
        _ => None,
    }
}

fn visit(child: &Value, depth: usize) -> Option<&Value> {
    if child.is_object() && PayloadShape::classify(child).is_structured() {
        Some(child)
    } else {
        find_structured(child, depth + 1)
    }
}

/// Fallback: every string field that looks like markup becomes a variant
/// labelled with its field path.
fn scan_markup(value: &Value) -> Vec<ContentVariant> {
    let mut found = Vec::new();
    collect_markup("", value, &mut found, 0);
    found
        .into_iter()
        .enumerate()
        .map(|(index, (path, text))| text_variant(index, path, text))
        .collect()
}

fn collect_markup<'a>(
    path: &str,
    value: &'a Value,
    out: &mut Vec<(String, &'a str)>,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) if RE_MARKUP.is_match(s) => out.push((path.to_string(), s)),
        Value::Object(map) => {
            for (key, child) in map {
                collect_markup(&join_key(path, key), child, out, depth + 1);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_markup(&join_key(path, &i.to_string()), child, out, depth + 1);
            }
        }
        _ => {}
    }
}
