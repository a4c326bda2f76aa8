//! Deterministic field merge into course objects.

use crate::types::Fields;
use serde_json::Value;

/// Set `value` at a slash-separated `path` inside `obj`.
///
/// Intermediate objects are created as needed; a non-object value sitting
/// on the path is replaced by an object.
pub fn set_at_path(obj: &mut Fields, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = obj;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !slot.is_object() {
            *slot = Value::Object(Fields::new());
        }
        current = match slot.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Remove the value at a slash-separated `path`, leaving empty parents.
pub fn remove_at_path(obj: &mut Fields, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let (last, parents) = segments.split_last()?;

    let mut current = obj;
    for segment in parents {
        current = current.get_mut(*segment)?.as_object_mut()?;
    }
    current.remove(*last)
}

/// Shallow-copy `base`, then apply each `(path, value)` in iteration order.
///
/// A `None` value deletes the path from the result.
pub fn merge_fields<'a, I>(base: Option<&Fields>, updates: I) -> Fields
where
    I: IntoIterator<Item = (&'a String, Option<&'a Value>)>,
{
    let mut merged = base.cloned().unwrap_or_default();
    for (path, value) in updates {
        match value {
            Some(value) => set_at_path(&mut merged, path, value.clone()),
            None => {
                remove_at_path(&mut merged, path);
            }
        }
    }
    merged
}

/// Remove top-level high-volume fields.
pub fn strip_fields(obj: &mut Fields, names: &[String]) {
    for name in names {
        obj.remove(name);
    }
}
