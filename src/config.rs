//! Engine configuration.

use crate::error::{Result, SyncError};
use crate::types::{CourseId, StorePath, StudentKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Sub-paths of an enrollment record watched per course.
///
/// Large per-course payloads (notes, gradebook dumps) are never listed.
pub const DEFAULT_FIELD_PATHS: &[&str] = &[
    "ActiveFutureArchived/Value",
    "Comments",
    "Course/Value",
    "CourseID",
    "Created",
    "Final_x0020_Grade",
    "PercentCompleteGradebook",
    "PercentScheduleComplete",
    "Program",
    "School_x0020_Year/Value",
    "ScheduleEndDate",
    "ScheduleStartDate",
    "Status/Value",
    "StudentType/Value",
];

/// Where each source lives in the remote tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathLayout {
    pub students_root: String,
    pub profile_node: String,
    pub courses_node: String,
    pub catalog_root: String,
    pub notifications_root: String,
    pub important_dates: String,
    pub payments_root: String,
    pub payment_status_field: String,
    pub staff_root: String,
}

impl Default for PathLayout {
    fn default() -> Self {
        Self {
            students_root: "students".to_string(),
            profile_node: "profile".to_string(),
            courses_node: "courses".to_string(),
            catalog_root: "courses".to_string(),
            notifications_root: "notifications".to_string(),
            important_dates: "ImportantDates".to_string(),
            payments_root: "payments".to_string(),
            payment_status_field: "payment_status/status".to_string(),
            staff_root: "staff".to_string(),
        }
    }
}

impl PathLayout {
    pub fn profile(&self, student: &StudentKey) -> StorePath {
        StorePath::new(&self.students_root)
            .child(&student.0)
            .child(&self.profile_node)
    }

    /// Parent node holding one child per enrolled course.
    pub fn enrollment(&self, student: &StudentKey) -> StorePath {
        StorePath::new(&self.students_root)
            .child(&student.0)
            .child(&self.courses_node)
    }

    pub fn course_field(&self, student: &StudentKey, course: &CourseId, field: &str) -> StorePath {
        self.enrollment(student).child(&course.0).child(field)
    }

    pub fn catalog_root(&self) -> StorePath {
        StorePath::new(&self.catalog_root)
    }

    pub fn catalog(&self, course: &CourseId) -> StorePath {
        self.catalog_root().child(&course.0)
    }

    pub fn notifications(&self) -> StorePath {
        StorePath::new(&self.notifications_root)
    }

    pub fn important_dates(&self) -> StorePath {
        StorePath::new(&self.important_dates)
    }

    pub fn payment_status(&self, student: &StudentKey, course: &CourseId) -> StorePath {
        self.course_field(student, course, &self.payment_status_field)
    }

    pub fn payment_details(&self, student: &StudentKey, course: &CourseId) -> StorePath {
        StorePath::new(&self.payments_root)
            .child(&student.0)
            .child(&self.courses_node)
            .child(&course.0)
    }

    pub fn staff(&self, key: &str) -> StorePath {
        StorePath::new(&self.staff_root).child(key)
    }

    fn segments(&self) -> [(&'static str, &str); 9] {
        [
            ("students_root", &self.students_root),
            ("profile_node", &self.profile_node),
            ("courses_node", &self.courses_node),
            ("catalog_root", &self.catalog_root),
            ("notifications_root", &self.notifications_root),
            ("important_dates", &self.important_dates),
            ("payments_root", &self.payments_root),
            ("payment_status_field", &self.payment_status_field),
            ("staff_root", &self.staff_root),
        ]
    }
}

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whitelisted per-course sub-paths, one field subscription each.
    pub field_paths: Vec<String>,

    /// High-volume fields removed from merged course objects.
    pub stripped_fields: Vec<String>,

    /// Children of the enrollment node that are not courses.
    pub reserved_enrollment_keys: Vec<String>,

    /// Payment statuses that count as a valid payment.
    pub valid_payment_statuses: Vec<String>,

    /// Catalog field and value that mark a course as required.
    pub required_flag_field: String,
    pub required_flag_value: String,

    /// Catalog field holding the optional allow-list of emails.
    pub required_allow_field: String,

    /// Notification field that must equal `true` for global notifications.
    pub notification_active_field: String,

    pub layout: PathLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            field_paths: DEFAULT_FIELD_PATHS.iter().map(|s| s.to_string()).collect(),
            stripped_fields: vec!["jsonStudentNotes".to_string()],
            reserved_enrollment_keys: vec!["sections".to_string(), "normalizedSchedule".to_string()],
            valid_payment_statuses: vec![
                "paid".to_string(),
                "active".to_string(),
                "trialing".to_string(),
            ],
            required_flag_field: "Active".to_string(),
            required_flag_value: "Required".to_string(),
            required_allow_field: "allowedEmails".to_string(),
            notification_active_field: "active".to_string(),
            layout: PathLayout::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.field_paths.is_empty() {
            return Err(SyncError::Config("field_paths must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for path in &self.field_paths {
            let normalized = StorePath::new(path);
            if normalized.is_root() {
                return Err(SyncError::Config(format!("empty field path {:?}", path)));
            }
            if !seen.insert(normalized) {
                return Err(SyncError::Config(format!("duplicate field path {:?}", path)));
            }
        }

        for (name, segment) in self.layout.segments() {
            if StorePath::new(segment).is_root() {
                return Err(SyncError::Config(format!("layout.{} must not be empty", name)));
            }
        }

        Ok(())
    }

    pub(crate) fn is_reserved_key(&self, key: &str) -> bool {
        self.reserved_enrollment_keys.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"stripped_fields": ["jsonStudentNotes", "gradebook"], "layout": {"students_root": "pupils"}}"#,
        )
        .unwrap();
        assert_eq!(config.stripped_fields.len(), 2);
        assert_eq!(config.layout.students_root, "pupils");
        assert_eq!(config.layout.courses_node, "courses");
        assert_eq!(config.field_paths.len(), DEFAULT_FIELD_PATHS.len());
    }

    #[test]
    fn test_duplicate_field_paths_rejected() {
        let result = EngineConfig::from_json_str(r#"{"field_paths": ["Status/Value", "/Status/Value/"]}"#);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_empty_layout_segment_rejected() {
        let mut config = EngineConfig::default();
        config.layout.staff_root = "/".to_string();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_layout_paths() {
        let layout = PathLayout::default();
        let key = StudentKey("jane,doe@example,com".to_string());
        let course = CourseId::new("89");
        assert_eq!(
            layout.course_field(&key, &course, "Status/Value").as_str(),
            "students/jane,doe@example,com/courses/89/Status/Value"
        );
        assert_eq!(
            layout.payment_status(&key, &course).as_str(),
            "students/jane,doe@example,com/courses/89/payment_status/status"
        );
        assert_eq!(
            layout.payment_details(&key, &course).as_str(),
            "payments/jane,doe@example,com/courses/89"
        );
        assert_eq!(layout.catalog(&course).as_str(), "courses/89");
    }
}
