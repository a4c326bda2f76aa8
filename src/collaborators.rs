//! External collaborators consumed by the engine.
//!
//! Each collaborator is a small trait so embedders can plug in their own
//! implementation; plain closures work for the pure ones.

use crate::types::{CourseId, CourseView, NotificationRecord, Profile};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

// --- Identifier sanitizer ---

/// Maps a human-readable identifier to a storage-safe key.
pub trait KeySanitizer: Send + Sync {
    fn sanitize(&self, identifier: &str) -> String;
}

impl<F> KeySanitizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sanitize(&self, identifier: &str) -> String {
        self(identifier)
    }
}

/// Lowercases an email and replaces `.` (not allowed in keys) with `,`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmailKeySanitizer;

impl KeySanitizer for EmailKeySanitizer {
    fn sanitize(&self, identifier: &str) -> String {
        identifier.trim().to_lowercase().replace('.', ",")
    }
}

// --- Permission check ---

/// Set of permission names granted to a caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionBag(BTreeSet<String>);

impl PermissionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, permission: impl Into<String>) -> Self {
        self.0.insert(permission.into());
        self
    }

    pub fn has(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionBag {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        PermissionBag(iter.into_iter().map(Into::into).collect())
    }
}

/// Who is asking to mount a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    pub email: String,
    pub permissions: PermissionBag,
}

impl CallerIdentity {
    pub fn new(email: impl Into<String>, permissions: PermissionBag) -> Self {
        Self {
            email: email.into(),
            permissions,
        }
    }
}

/// Allow/deny predicate evaluated once at mount.
pub trait PermissionCheck: Send + Sync {
    fn allows(&self, caller: &str, permissions: &PermissionBag) -> bool;
}

impl<F> PermissionCheck for F
where
    F: Fn(&str, &PermissionBag) -> bool + Send + Sync,
{
    fn allows(&self, caller: &str, permissions: &PermissionBag) -> bool {
        self(caller, permissions)
    }
}

/// Allows callers holding one named permission.
#[derive(Clone, Debug)]
pub struct RequirePermission(pub String);

impl RequirePermission {
    pub fn staff() -> Self {
        RequirePermission("staff".to_string())
    }
}

impl PermissionCheck for RequirePermission {
    fn allows(&self, caller: &str, permissions: &PermissionBag) -> bool {
        !caller.trim().is_empty() && permissions.has(&self.0)
    }
}

// --- Notification annotation ---

/// Policy passed to the annotator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotationOptions {
    /// Staff views are read-only: notifications are never actionable.
    pub actionable: bool,
    /// Notification ids marked seen during this session.
    pub seen: BTreeSet<String>,
}

/// Pure function attaching notification state to courses.
pub trait NotificationAnnotator: Send + Sync {
    fn annotate(
        &self,
        courses: Vec<CourseView>,
        profile: &Profile,
        notifications: &[NotificationRecord],
        options: &AnnotationOptions,
    ) -> Vec<CourseView>;
}

/// Leaves courses unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughAnnotator;

impl NotificationAnnotator for PassThroughAnnotator {
    fn annotate(
        &self,
        courses: Vec<CourseView>,
        _profile: &Profile,
        _notifications: &[NotificationRecord],
        _options: &AnnotationOptions,
    ) -> Vec<CourseView> {
        courses
    }
}

// --- Survey RPC ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyOperation {
    MarkSeen,
    Submit,
}

impl SurveyOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyOperation::MarkSeen => "mark_seen",
            SurveyOperation::Submit => "submit",
        }
    }
}

/// Payload of `submitNotificationSurvey`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRequest {
    pub operation: SurveyOperation,
    pub notification_id: String,
    pub course_ids: Vec<CourseId>,
    pub user_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Value>,
}

/// Completion of an RPC call.
pub type RpcReply = Box<dyn FnOnce(Result<Value, String>) + Send>;

/// Fire-and-forget RPC boundary.
pub trait SurveyRpc: Send + Sync {
    fn submit_notification_survey(&self, request: SurveyRequest, reply: RpcReply);
}

/// Accepts every call and replies with `null`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRpc;

impl SurveyRpc for NoopRpc {
    fn submit_notification_survey(&self, _request: SurveyRequest, reply: RpcReply) {
        reply(Ok(Value::Null));
    }
}

/// Bundle of collaborators handed to the engine.
pub struct Collaborators {
    pub sanitizer: Box<dyn KeySanitizer>,
    pub permissions: Box<dyn PermissionCheck>,
    pub annotator: Box<dyn NotificationAnnotator>,
    pub rpc: Box<dyn SurveyRpc>,
}

impl Collaborators {
    pub fn with_sanitizer(mut self, sanitizer: impl KeySanitizer + 'static) -> Self {
        self.sanitizer = Box::new(sanitizer);
        self
    }

    pub fn with_permissions(mut self, permissions: impl PermissionCheck + 'static) -> Self {
        self.permissions = Box::new(permissions);
        self
    }

    pub fn with_annotator(mut self, annotator: impl NotificationAnnotator + 'static) -> Self {
        self.annotator = Box::new(annotator);
        self
    }

    pub fn with_rpc(mut self, rpc: impl SurveyRpc + 'static) -> Self {
        self.rpc = Box::new(rpc);
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            sanitizer: Box::new(EmailKeySanitizer),
            permissions: Box::new(RequirePermission::staff()),
            annotator: Box::new(PassThroughAnnotator),
            rpc: Box::new(NoopRpc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_sanitizer() {
        assert_eq!(
            EmailKeySanitizer.sanitize(" Jane.Doe@Example.com "),
            "jane,doe@example,com"
        );
    }

    #[test]
    fn test_closure_sanitizer() {
        let sanitizer = |id: &str| id.replace('@', "_");
        assert_eq!(sanitizer.sanitize("a@b"), "a_b");
    }

    #[test]
    fn test_require_permission() {
        let check = RequirePermission::staff();
        let bag: PermissionBag = ["staff", "admin"].into_iter().collect();
        assert!(check.allows("kyle@rtd.ca", &bag));
        assert!(!check.allows("kyle@rtd.ca", &PermissionBag::new()));
        assert!(!check.allows("  ", &bag));
    }

    #[test]
    fn test_survey_request_wire_shape() {
        let request = SurveyRequest {
            operation: SurveyOperation::MarkSeen,
            notification_id: "n1".into(),
            course_ids: vec![CourseId::new("89")],
            user_email: "jane@example.com".into(),
            student_name: None,
            answers: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "operation": "mark_seen",
                "notificationId": "n1",
                "courseIds": ["89"],
                "userEmail": "jane@example.com"
            })
        );
    }
}
