//! Conversion issues
//!
//! Every data-level problem found while converting a message is reported as an
//! [`Issue`] through an [`IssueSink`]. Issues never stop a conversion; the
//! sink decides what to do with them. [`LogSink`] forwards them to `tracing`,
//! and a `Vec<Issue>` collects them for inspection.

use crate::error::ConversionError;
use crate::path::position_to_attribute;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Where an issue came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// A field value could not be converted or written
    Data,
    /// Part of the message tree could not be traversed
    Structural,
}

/// A problem found during conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    /// Location in position notation
    pub location: String,
    /// Rule that raised the issue, when one did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub message: String,
}

impl Issue {
    pub fn data(location: impl Into<String>, rule: impl Into<String>, error: &ConversionError) -> Self {
        Self {
            severity: Severity::Warning,
            kind: IssueKind::Data,
            location: location.into(),
            rule: Some(rule.into()),
            message: error.to_string(),
        }
    }

    pub fn structural(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind: IssueKind::Structural,
            location: location.into(),
            rule: None,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The location in attribute notation
    pub fn attribute_location(&self) -> String {
        position_to_attribute(&self.location)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "{} at {} ({}): {}", self.severity, self.location, rule, self.message),
            None => write!(f, "{} at {}: {}", self.severity, self.location, self.message),
        }
    }
}

/// Receiver for conversion issues
pub trait IssueSink {
    fn report(&mut self, issue: Issue);
}

impl IssueSink for Vec<Issue> {
    fn report(&mut self, issue: Issue) {
        self.push(issue);
    }
}

/// Sink that writes every issue to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl IssueSink for LogSink {
    fn report(&mut self, issue: Issue) {
        match issue.severity {
            Severity::Error => tracing::error!(
                location = %issue.location,
                rule = issue.rule.as_deref().unwrap_or("-"),
                "{}",
                issue.message
            ),
            Severity::Warning => tracing::warn!(
                location = %issue.location,
                rule = issue.rule.as_deref().unwrap_or("-"),
                "{}",
                issue.message
            ),
            Severity::Info => tracing::info!(
                location = %issue.location,
                rule = issue.rule.as_deref().unwrap_or("-"),
                "{}",
                issue.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_issue() {
        let err = ConversionError::invalid_value("abc", "integer");
        let issue = Issue::data("/PATIENT_RESULT/OBX(2)", "OBX-5", &err);
        assert_eq!(issue.kind, IssueKind::Data);
        assert_eq!(issue.severity, Severity::Warning);
        assert_eq!(issue.attribute_location(), "patient_result.obx[1]");
        assert_eq!(
            issue.to_string(),
            "warning at /PATIENT_RESULT/OBX(2) (OBX-5): Cannot convert 'abc' to integer"
        );
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<Issue> = Vec::new();
        sink.report(Issue::structural("/BAD", "unresolved"));
        sink.report(Issue::structural("/WORSE", "unresolved").with_severity(Severity::Warning));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].severity, Severity::Warning);
    }

    #[test]
    fn test_serialization() {
        let issue = Issue::structural("/BAD", "unresolved");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "structural");
        assert_eq!(json["severity"], "error");
        assert!(json.get("rule").is_none());
    }
}
