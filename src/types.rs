//! Core types for the enrollment sync engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Field map of a JSON object node.
pub type Fields = serde_json::Map<String, Value>;

/// Slash-separated location in the remote tree.
///
/// Paths are normalized: no leading, trailing or doubled slashes. The empty
/// path is the root.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        StorePath(normalized)
    }

    pub fn root() -> Self {
        StorePath(String::new())
    }

    /// Append one or more segments (`"Status/Value"` appends two).
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        if self.0.is_empty() {
            return StorePath::new(segment);
        }
        StorePath::new(format!("{}/{}", self.0, segment.as_ref()))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `other` is this path or lies beneath it.
    pub fn contains(&self, other: &StorePath) -> bool {
        if self.is_root() || self.0 == other.0 {
            return true;
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True if a write at one path can change the value at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath(/{})", self.0)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// Identifier of a course (enrollment child key and catalog key).
///
/// Ordered the way the remote tree lists child keys: canonical integer keys
/// first in numeric order, then every other key lexically.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub String);

impl CourseId {
    pub fn new(id: impl Into<String>) -> Self {
        CourseId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of an index-like key ("89", but not "089" or "+89").
    fn index(&self) -> Option<u32> {
        let s = self.0.as_str();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if s.len() > 1 && s.starts_with('0') {
            return None;
        }
        s.parse::<u32>().ok().filter(|n| *n < u32::MAX)
    }
}

impl Ord for CourseId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.index(), other.index()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for CourseId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CourseId({})", self.0)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage-safe key of the subject student.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentKey(pub String);

impl fmt::Debug for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StudentKey({})", self.0)
    }
}

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sort key derived from a course's `Created` field.
///
/// Numbers, numeric strings and ISO-8601 text all resolve to epoch millis
/// and compare chronologically. Ordering is total: missing values sort
/// lowest, then text that is not a recognizable timestamp (lexically), then
/// every resolved timestamp.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CreatedAt {
    Missing,
    Text(String),
    Millis(i64),
}

impl CreatedAt {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(CreatedAt::Millis)
                .unwrap_or(CreatedAt::Missing),
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    CreatedAt::Missing
                } else if let Ok(ms) = s.parse::<i64>() {
                    CreatedAt::Millis(ms)
                } else if let Some(ms) = parse_timestamp(s) {
                    CreatedAt::Millis(ms)
                } else {
                    CreatedAt::Text(s.to_string())
                }
            }
            _ => CreatedAt::Missing,
        }
    }
}

/// Epoch millis of an RFC 3339 timestamp, a zone-less date-time (taken as
/// UTC) or a bare `YYYY-MM-DD` date.
fn parse_timestamp(text: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Student profile record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    pub fields: Fields,
}

impl Profile {
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|fields| Profile {
            fields: fields.clone(),
        })
    }

    pub fn display_name(&self) -> Option<String> {
        let first = self.fields.get("firstName").and_then(Value::as_str);
        let last = self.fields.get("lastName").and_then(Value::as_str);
        match (first, last) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (Some(f), None) => Some(f.to_string()),
            (None, Some(l)) => Some(l.to_string()),
            (None, None) => None,
        }
    }
}

/// A global notification record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl NotificationRecord {
    pub fn from_snapshot(id: &str, value: &Value) -> Option<Self> {
        value.as_object().map(|fields| NotificationRecord {
            id: id.to_string(),
            fields: fields.clone(),
        })
    }

    /// Parse the children of a notifications node, in key order.
    pub fn list_from_children(value: Option<&Value>) -> Vec<Self> {
        match value.and_then(Value::as_object) {
            Some(children) => children
                .iter()
                .filter_map(|(id, v)| Self::from_snapshot(id, v))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    pub fn is_active(&self) -> bool {
        self.fields
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A staff member referenced by course metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub key: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// False when the staff record has not been (or could not be) read.
    pub resolved: bool,
}

impl StaffMember {
    pub fn unresolved(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            email: None,
            first_name: None,
            last_name: None,
            resolved: false,
        }
    }

    pub fn from_record(key: &str, value: &Value) -> Self {
        let text = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
        Self {
            key: key.to_string(),
            email: text("email"),
            first_name: text("firstName"),
            last_name: text("lastName"),
            resolved: true,
        }
    }
}

/// Resolved course catalog metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseMetadata {
    pub title: Option<String>,
    pub course_type: Option<String>,
    pub staff_keys: Vec<String>,
    pub staff: Vec<StaffMember>,
    pub structure: Option<Value>,
}

impl CourseMetadata {
    /// Build metadata from a catalog snapshot. Returns `None` for non-objects.
    pub fn from_catalog(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let mut staff_keys: Vec<String> = Vec::new();
        for list in ["Teachers", "SupportStaff"] {
            if let Some(keys) = obj.get(list).and_then(Value::as_array) {
                for key in keys.iter().filter_map(Value::as_str) {
                    if !staff_keys.iter().any(|k| k == key) {
                        staff_keys.push(key.to_string());
                    }
                }
            }
        }

        Some(Self {
            title: obj.get("Title").and_then(Value::as_str).map(String::from),
            course_type: obj
                .get("CourseType")
                .and_then(Value::as_str)
                .map(String::from),
            staff_keys,
            staff: Vec::new(),
            structure: obj
                .get("courseStructure")
                .or_else(|| obj.get("units"))
                .cloned(),
        })
    }
}

/// Payment state attached to a course.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub status: String,
    pub details: Option<Value>,
    pub has_valid_payment: bool,
}

impl PaymentInfo {
    pub fn unpaid() -> Self {
        Self {
            status: "unpaid".to_string(),
            details: None,
            has_valid_payment: false,
        }
    }

    /// Payment attached to injected required courses.
    pub fn required() -> Self {
        Self {
            status: "required".to_string(),
            details: None,
            has_valid_payment: true,
        }
    }

    /// Derive payment info from the status and details reads.
    pub fn from_reads(status: Option<&Value>, details: Option<Value>, valid: &[String]) -> Self {
        let status = match status {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Object(obj)) => match obj.get("status").and_then(Value::as_str) {
                Some(s) => s.to_string(),
                None => return Self::with_details(Self::unpaid(), details),
            },
            _ => return Self::with_details(Self::unpaid(), details),
        };
        let has_valid_payment = valid.iter().any(|v| v.eq_ignore_ascii_case(&status));
        Self {
            status,
            details: details.filter(|d| !d.is_null()),
            has_valid_payment,
        }
    }

    fn with_details(mut info: Self, details: Option<Value>) -> Self {
        info.details = details.filter(|d| !d.is_null());
        info
    }
}

impl Default for PaymentInfo {
    fn default() -> Self {
        Self::unpaid()
    }
}

/// Notification annotation attached to a course by the annotator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseNotification {
    pub id: String,
    pub title: Option<String>,
    pub actionable: bool,
    pub seen: bool,
}

/// One course entry of the published view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseView {
    pub id: CourseId,
    #[serde(flatten)]
    pub fields: Fields,
    pub course_details: Option<CourseMetadata>,
    pub payment: PaymentInfo,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_required_course: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<CourseNotification>,
}

impl CourseView {
    pub fn created_at(&self) -> CreatedAt {
        CreatedAt::from_value(self.fields.get("Created"))
    }

    /// Look up a (possibly nested) enrollment field, e.g. `"Status/Value"`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Catalog-wide course injected into every eligible subject's view.
#[derive(Clone, Debug, PartialEq)]
pub struct RequiredCourseTemplate {
    pub id: CourseId,
    pub fields: Fields,
    /// `None` means unrestricted.
    pub allowed_emails: Option<Vec<String>>,
}

impl RequiredCourseTemplate {
    pub fn from_catalog_entry(id: &str, value: &Value, allow_field: &str) -> Option<Self> {
        let obj = value.as_object()?;
        let allowed_emails = obj.get(allow_field).and_then(Value::as_array).map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .collect::<Vec<_>>()
        });
        Some(Self {
            id: CourseId::new(id),
            fields: obj.clone(),
            allowed_emails,
        })
    }

    pub fn is_eligible(&self, subject_email: &str) -> bool {
        match &self.allowed_emails {
            None => true,
            Some(list) => {
                let email = subject_email.trim().to_lowercase();
                list.iter().any(|allowed| *allowed == email)
            }
        }
    }

    /// Synthetic course entry for this template.
    pub fn to_course_view(&self) -> CourseView {
        let details = CourseMetadata::from_catalog(&Value::Object(self.fields.clone()));
        let mut fields = Fields::new();
        fields.insert("CourseID".to_string(), Value::String(self.id.0.clone()));
        if let Some(title) = details.as_ref().and_then(|d| d.title.clone()) {
            fields.insert("Course".to_string(), serde_json::json!({ "Value": title }));
        }
        fields.insert(
            "Status".to_string(),
            serde_json::json!({ "Value": "Required Course" }),
        );
        CourseView {
            id: self.id.clone(),
            fields,
            course_details: details,
            payment: PaymentInfo::required(),
            is_required_course: true,
            notifications: Vec::new(),
        }
    }
}

/// The published aggregate view for one subject student.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    pub courses: Vec<CourseView>,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<String>,
    pub student_exists: bool,
    pub important_dates: Option<Fields>,
    pub all_notifications: Vec<NotificationRecord>,
}

impl Default for EnrollmentView {
    fn default() -> Self {
        Self {
            courses: Vec::new(),
            profile: None,
            loading: true,
            error: None,
            student_exists: false,
            important_dates: None,
            all_notifications: Vec::new(),
        }
    }
}
