//! Identifier collection: one pass over the payload graph producing the
//! identifier sets the preheat will bulk-load.
//!
//! Collection is purely syntactic: any non-empty identifier string is
//! collected, malformed or unresolvable ones included - semantic validity is
//! validation's job. Running it twice on the same payload yields the same
//! result.

use std::collections::{HashMap, HashSet};

use trellis_models::{
    Enrollment, Event, MetadataKind, Relationship, Subject, TrackerPayload, TrackerType,
};

/// Everything one payload refers to: metadata identifiers per kind, plus the
/// uids of the tracker objects themselves (used to prefetch live state).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedIds {
    pub metadata: HashMap<MetadataKind, HashSet<String>>,
    pub subjects: HashSet<String>,
    pub enrollments: HashSet<String>,
    pub events: HashSet<String>,
    pub relationships: HashSet<String>,
}

impl CollectedIds {
    fn add_metadata(&mut self, kind: MetadataKind, identifier: &str) {
        if !identifier.is_empty() {
            self.metadata.entry(kind).or_default().insert(identifier.to_string());
        }
    }

    fn add_entity(&mut self, tracker_type: TrackerType, uid: &str) {
        if uid.is_empty() {
            return;
        }
        let set = match tracker_type {
            TrackerType::Subject => &mut self.subjects,
            TrackerType::Enrollment => &mut self.enrollments,
            TrackerType::Event => &mut self.events,
            TrackerType::Relationship => &mut self.relationships,
        };
        set.insert(uid.to_string());
    }

    pub fn metadata_of(&self, kind: MetadataKind) -> Option<&HashSet<String>> {
        self.metadata.get(&kind)
    }
}

/// Walk every reference in the payload exactly once.
pub fn collect(payload: &TrackerPayload) -> CollectedIds {
    let mut out = CollectedIds::default();
    for subject in &payload.subjects {
        collect_subject(&mut out, subject);
    }
    for enrollment in &payload.enrollments {
        collect_enrollment(&mut out, enrollment);
    }
    for event in &payload.events {
        collect_event(&mut out, event);
    }
    for relationship in &payload.relationships {
        collect_relationship(&mut out, relationship);
    }
    out
}

fn collect_subject(out: &mut CollectedIds, subject: &Subject) {
    if let Some(uid) = &subject.uid {
        out.add_entity(TrackerType::Subject, uid);
    }
    out.add_metadata(MetadataKind::SubjectType, &subject.subject_type);
    out.add_metadata(MetadataKind::OrgUnit, &subject.org_unit);
    for attribute in &subject.attributes {
        out.add_metadata(MetadataKind::AttributeType, &attribute.attribute);
    }
}

fn collect_enrollment(out: &mut CollectedIds, enrollment: &Enrollment) {
    if let Some(uid) = &enrollment.uid {
        out.add_entity(TrackerType::Enrollment, uid);
    }
    out.add_entity(TrackerType::Subject, &enrollment.subject);
    out.add_metadata(MetadataKind::Program, &enrollment.program);
    out.add_metadata(MetadataKind::OrgUnit, &enrollment.org_unit);
    for attribute in &enrollment.attributes {
        out.add_metadata(MetadataKind::AttributeType, &attribute.attribute);
    }
}

fn collect_event(out: &mut CollectedIds, event: &Event) {
    if let Some(uid) = &event.uid {
        out.add_entity(TrackerType::Event, uid);
    }
    out.add_entity(TrackerType::Enrollment, &event.enrollment);
    out.add_metadata(MetadataKind::Program, &event.program);
    out.add_metadata(MetadataKind::ProgramStage, &event.program_stage);
    out.add_metadata(MetadataKind::OrgUnit, &event.org_unit);
    out.add_metadata(MetadataKind::CategoryOptionCombo, &event.attribute_option_combo);
    for data_value in &event.data_values {
        out.add_metadata(MetadataKind::DataElement, &data_value.data_element);
    }
}

fn collect_relationship(out: &mut CollectedIds, relationship: &Relationship) {
    if let Some(uid) = &relationship.uid {
        out.add_entity(TrackerType::Relationship, uid);
    }
    out.add_metadata(MetadataKind::RelationshipType, &relationship.relationship_type);
    for item in [&relationship.from, &relationship.to] {
        if let Some((tracker_type, uid)) = item.endpoint() {
            out.add_entity(tracker_type, uid);
        }
    }
}
