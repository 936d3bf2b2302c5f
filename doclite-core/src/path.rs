// src/path.rs
// Dotted field paths: validation, engine extraction expressions, in-memory lookup and update

use serde_json::{Map, Value};

use crate::error::{DocLiteError, Result};

/// Reserved payload key holding the document identifier
pub const ID_FIELD: &str = "_id";

/// Reserved field name that turns `$contains` into a whole-document search
pub const WILDCARD_FIELD: &str = "*";

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_array_position(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Check a dotted field path against the safe character set.
///
/// Paths end up inside SQL text (expression indexes must match query expressions
/// verbatim), so every segment must be non-empty and made of `[A-Za-z0-9_-]`.
pub fn validate_field_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(DocLiteError::Plan("empty field path".into()));
    }
    for segment in path.split('.') {
        if segment.is_empty() || !segment.chars().all(is_safe_char) {
            return Err(DocLiteError::Plan(format!("invalid field path: '{}'", path)));
        }
    }
    Ok(())
}

/// Check a collection or index name before it is used as an SQL identifier or literal.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 || !name.chars().all(is_safe_char) {
        return Err(DocLiteError::Plan(format!("invalid {} name: '{}'", kind, name)));
    }
    Ok(())
}

fn push_key(out: &mut String, segment: &str) {
    if segment.contains('-') {
        out.push_str(".\"");
        out.push_str(segment);
        out.push('"');
    } else {
        out.push('.');
        out.push_str(segment);
    }
}

/// JSON path for the engine; numeric segments after the first become array positions
/// when `array_positions` is set.
pub fn json_path(path: &str, array_positions: bool) -> String {
    let mut out = String::from("$");
    for (i, segment) in path.split('.').enumerate() {
        if array_positions && i > 0 && is_array_position(segment) {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            push_key(&mut out, segment);
        }
    }
    out
}

/// Extraction expression used in query predicates and sort keys.
pub fn extract_expr(path: &str) -> String {
    format!("json_extract(data, '{}')", json_path(path, true))
}

/// Extraction expression used for expression indexes. Numeric segments stay plain keys.
pub fn index_expr(path: &str) -> String {
    format!("json_extract(data, '{}')", json_path(path, false))
}

/// Whether the query and index expressions for this path differ.
pub fn has_array_position(path: &str) -> bool {
    path.split('.').skip(1).any(is_array_position)
}

/// Resolve a dotted path inside a document. `None` means the path is absent, which is
/// distinct from `Some(&Value::Null)`.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) if is_array_position(segment) => {
                items.get(segment.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn step_into<'a>(current: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value> {
    match current {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) if is_array_position(segment) => {
            let idx: usize = segment
                .parse()
                .map_err(|_| DocLiteError::Plan(format!("invalid array index in '{}'", path)))?;
            let len = items.len();
            items.get_mut(idx).ok_or_else(|| {
                DocLiteError::Plan(format!("array index {} out of bounds ({}) in '{}'", idx, len, path))
            })
        }
        _ => Err(DocLiteError::Plan(format!("cannot descend into scalar at '{}' in '{}'", segment, path))),
    }
}

/// Set `value` at a dotted path, creating intermediate mappings as needed.
///
/// A trailing numeric segment on an existing array replaces that element (or appends
/// when it equals the array length).
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    validate_field_path(path)?;
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(DocLiteError::Plan("empty field path".into())),
    };

    let mut current = doc;
    for segment in parents {
        current = step_into(current, segment, path)?;
    }

    match current {
        Value::Array(items) if is_array_position(last) => {
            let idx: usize = last
                .parse()
                .map_err(|_| DocLiteError::Plan(format!("invalid array index in '{}'", path)))?;
            if idx < items.len() {
                items[idx] = value;
            } else if idx == items.len() {
                items.push(value);
            } else {
                return Err(DocLiteError::Plan(format!(
                    "array index {} out of bounds ({}) in '{}'",
                    idx,
                    items.len(),
                    path
                )));
            }
            Ok(())
        }
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(DocLiteError::Plan(format!("cannot set '{}' on a scalar", path))),
    }
}

/// Remove the value at a dotted path. Returns whether anything was removed.
pub fn unset_path(doc: &mut Value, path: &str) -> bool {
    let (parent_path, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };

    let mut current = doc;
    if let Some(parent_path) = parent_path {
        for segment in parent_path.split('.') {
            current = match current {
                Value::Object(map) => match map.get_mut(segment) {
                    Some(next) => next,
                    None => return false,
                },
                Value::Array(items) if is_array_position(segment) => {
                    match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                        Some(next) => next,
                        None => return false,
                    }
                }
                _ => return false,
            };
        }
    }

    match current {
        Value::Object(map) => map.remove(last).is_some(),
        _ => false,
    }
}

/// Apply a JSON merge-patch: mappings merge recursively, `null` removes a key,
/// every other value replaces what was there.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, patch_value) in patch_map {
            if patch_value.is_null() {
                target_map.remove(key);
            } else {
                let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                merge_patch(slot, patch_value);
            }
        }
    }
}
