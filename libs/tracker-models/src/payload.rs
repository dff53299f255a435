//! The inbound payload document: four ordered lists of tracker objects in
//! their camelCase wire form.
//!
//! Objects reference metadata by external identifier strings, interpreted
//! under the run's [`crate::IdSchemeParams`]. Entity uids are optional on
//! create; the commit stage assigns generated ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four tracker object types, in parent-before-child order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerType {
    Subject,
    Enrollment,
    Event,
    Relationship,
}

impl TrackerType {
    pub const ORDERED: [TrackerType; 4] = [
        TrackerType::Subject,
        TrackerType::Enrollment,
        TrackerType::Event,
        TrackerType::Relationship,
    ];
}

impl std::fmt::Display for TrackerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Subject => "subject",
            Self::Enrollment => "enrollment",
            Self::Event => "event",
            Self::Relationship => "relationship",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerPayload {
    pub subjects: Vec<Subject>,
    pub enrollments: Vec<Enrollment>,
    pub events: Vec<Event>,
    pub relationships: Vec<Relationship>,
}

impl TrackerPayload {
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
            && self.enrollments.is_empty()
            && self.events.is_empty()
            && self.relationships.is_empty()
    }

    pub fn count_of(&self, tracker_type: TrackerType) -> usize {
        match tracker_type {
            TrackerType::Subject => self.subjects.len(),
            TrackerType::Enrollment => self.enrollments.len(),
            TrackerType::Event => self.events.len(),
            TrackerType::Relationship => self.relationships.len(),
        }
    }
}

/// A tracked subject: the root of an enrollment chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub subject_type: String,
    pub org_unit: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

/// A subject's registration into a program; parent of events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Enrollment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub subject: String,
    pub program: String,
    pub org_unit: String,
    pub status: EnrollmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Active,
    Completed,
    Visited,
    Schedule,
    Overdue,
    Skipped,
}

/// A single data-capture instance within an enrollment, tied to a program stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub enrollment: String,
    pub program: String,
    pub program_stage: String,
    pub org_unit: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub attribute_option_combo: String,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub data_values: Vec<DataValue>,
}

/// A link between two subject/enrollment/event endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Relationship {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub relationship_type: String,
    pub from: RelationshipItem,
    pub to: RelationshipItem,
}

/// Exactly one of the three fields names the endpoint; the others stay unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationshipItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl RelationshipItem {
    /// The endpoint's type and uid, when exactly one field is set.
    pub fn endpoint(&self) -> Option<(TrackerType, &str)> {
        match (&self.subject, &self.enrollment, &self.event) {
            (Some(uid), None, None) => Some((TrackerType::Subject, uid)),
            (None, Some(uid), None) => Some((TrackerType::Enrollment, uid)),
            (None, None, Some(uid)) => Some((TrackerType::Event, uid)),
            _ => None,
        }
    }
}

/// A subject-level attribute value. A `None` value clears the stored one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attribute {
    pub attribute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataValue {
    pub data_element: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}
