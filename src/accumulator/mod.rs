//! Per-course partial-field accumulation.
//!
//! Field subscriptions deliver one whitelisted sub-path at a time. Each
//! course keeps the latest value per path, including deletions, so a field
//! removed remotely also disappears from the last refresh's snapshot. Full
//! course objects are always derived on demand by
//! [`Accumulators::merge_course`] and never stored.

mod merge;

pub use merge::{merge_fields, remove_at_path, set_at_path, strip_fields};

use crate::error::{Result, SyncError};
use crate::types::{CourseId, Fields};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Latest value per whitelisted path for one course.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CourseAccumulator {
    /// Ordered by path so merges are deterministic. `None` marks a path
    /// reported absent.
    fields: BTreeMap<String, Option<Value>>,
}

impl CourseAccumulator {
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get(path).and_then(Option::as_ref)
    }

    /// Number of paths currently holding a value.
    pub fn len(&self) -> usize {
        self.fields.values().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths currently holding a value.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields
            .iter()
            .filter_map(|(path, value)| value.as_ref().map(|v| (path, v)))
    }
}

/// Accumulators for every tracked course.
#[derive(Debug, Default)]
pub struct Accumulators {
    entries: HashMap<CourseId, CourseAccumulator>,
}

impl Accumulators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a course. Returns false if it was already tracked.
    pub fn seed(&mut self, course: &CourseId) -> bool {
        if self.entries.contains_key(course) {
            return false;
        }
        self.entries.insert(course.clone(), CourseAccumulator::default());
        true
    }

    pub fn remove(&mut self, course: &CourseId) -> Option<CourseAccumulator> {
        self.entries.remove(course)
    }

    pub fn contains(&self, course: &CourseId) -> bool {
        self.entries.contains_key(course)
    }

    pub fn get(&self, course: &CourseId) -> Option<&CourseAccumulator> {
        self.entries.get(course)
    }

    /// Tracked course ids, sorted.
    pub fn ids(&self) -> Vec<CourseId> {
        let mut ids: Vec<CourseId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Record the latest value of one field (`None` or null = the field is
    /// absent, which hides any base value at that path).
    ///
    /// Returns whether anything changed, so applying the same update twice
    /// reports `false` the second time. Updates for untracked courses are
    /// rejected with [`SyncError::MergeSkew`].
    pub fn apply_field_update(
        &mut self,
        course: &CourseId,
        path: &str,
        value: Option<Value>,
    ) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(course)
            .ok_or_else(|| SyncError::MergeSkew(course.clone()))?;

        let value = value.filter(|v| !v.is_null());
        if entry.fields.get(path) == Some(&value) {
            return Ok(false);
        }
        entry.fields.insert(path.to_string(), value);
        Ok(true)
    }

    /// Merge the base enrollment snapshot with every accumulated field.
    ///
    /// Reads the accumulator at call time. Returns `None` for untracked
    /// courses.
    pub fn merge_course(
        &self,
        course: &CourseId,
        base: Option<&Fields>,
        stripped: &[String],
    ) -> Option<Fields> {
        let entry = self.entries.get(course)?;
        let updates = entry
            .fields
            .iter()
            .map(|(path, value)| (path, value.as_ref()));
        let mut merged = merge_fields(base, updates);
        strip_fields(&mut merged, stripped);
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stripped() -> Vec<String> {
        vec!["jsonStudentNotes".to_string()]
    }

    #[test]
    fn test_unknown_course_is_merge_skew() {
        let mut acc = Accumulators::new();
        let result = acc.apply_field_update(&CourseId::new("9"), "Created", Some(json!("x")));
        assert!(matches!(result, Err(SyncError::MergeSkew(_))));
    }

    #[test]
    fn test_idempotent_update() {
        let mut acc = Accumulators::new();
        let id = CourseId::new("1");
        acc.seed(&id);

        assert!(acc.apply_field_update(&id, "Status/Value", Some(json!("Active"))).unwrap());
        let once = acc.merge_course(&id, None, &stripped());
        assert!(!acc.apply_field_update(&id, "Status/Value", Some(json!("Active"))).unwrap());
        let twice = acc.merge_course(&id, None, &stripped());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_null_removes_field() {
        let mut acc = Accumulators::new();
        let id = CourseId::new("1");
        acc.seed(&id);
        acc.apply_field_update(&id, "Program", Some(json!("AP"))).unwrap();

        assert!(acc.apply_field_update(&id, "Program", Some(Value::Null)).unwrap());
        assert!(acc.get(&id).unwrap().is_empty());
        assert!(!acc.apply_field_update(&id, "Program", None).unwrap());
    }

    #[test]
    fn test_deletion_hides_base_value() {
        let mut acc = Accumulators::new();
        let id = CourseId::new("1");
        acc.seed(&id);
        let base = json!({"Created": "2024-01-01", "Program": "AP"});

        acc.apply_field_update(&id, "Program", Some(json!("AP"))).unwrap();
        acc.apply_field_update(&id, "Program", None).unwrap();
        let merged = acc.merge_course(&id, base.as_object(), &[]).unwrap();

        assert!(!merged.contains_key("Program"));
        assert_eq!(merged["Created"], json!("2024-01-01"));
    }

    #[test]
    fn test_merge_overrides_base_and_strips_notes() {
        let mut acc = Accumulators::new();
        let id = CourseId::new("1");
        acc.seed(&id);
        acc.apply_field_update(&id, "Status/Value", Some(json!("Completed"))).unwrap();

        let base = json!({
            "Status": {"Value": "Active", "Id": 3},
            "jsonStudentNotes": [{"note": "long"}],
            "Created": "2024-01-01"
        });
        let merged = acc
            .merge_course(&id, base.as_object(), &stripped())
            .unwrap();

        assert_eq!(merged["Status"], json!({"Value": "Completed", "Id": 3}));
        assert_eq!(merged["Created"], json!("2024-01-01"));
        assert!(!merged.contains_key("jsonStudentNotes"));
    }

    #[test]
    fn test_merge_reads_latest_state() {
        let mut acc = Accumulators::new();
        let id = CourseId::new("1");
        acc.seed(&id);

        acc.apply_field_update(&id, "Created", Some(json!("2024-01-01"))).unwrap();
        acc.apply_field_update(&id, "CourseID", Some(json!(89))).unwrap();
        acc.apply_field_update(&id, "Program", Some(json!("Online"))).unwrap();

        let merged = acc.merge_course(&id, None, &[]).unwrap();
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_seed_twice_keeps_fields() {
        let mut acc = Accumulators::new();
        let id = CourseId::new("1");
        assert!(acc.seed(&id));
        acc.apply_field_update(&id, "Created", Some(json!(1))).unwrap();
        assert!(!acc.seed(&id));
        assert_eq!(acc.get(&id).unwrap().len(), 1);
    }
}
