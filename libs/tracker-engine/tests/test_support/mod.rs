//! Shared fixtures for the engine integration suites.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use trellis_engine::{Catalog, InMemoryStore, Result, TrackerStore};
use trellis_models::metadata::{
    CategoryOptionCombo, DataElement, OrgUnit, Program, ProgramStage, RelationshipType,
    SubjectType,
};
use trellis_models::{
    DataValue, Enrollment, Event, IdSchemeParam, Metadata, MetadataKind, Relationship,
    RelationshipItem, Subject, TrackerPayload,
};

/// A small but complete metadata catalogue: one subject type, one program
/// with one stage, one org unit, one data element, one relationship type,
/// and the system default category option combo.
pub fn catalog() -> Catalog {
    Catalog {
        subject_types: vec![SubjectType { uid: "st1".into(), ..Default::default() }],
        programs: vec![Program {
            uid: "p1".into(),
            subject_type: Some("st1".into()),
            ..Default::default()
        }],
        program_stages: vec![ProgramStage {
            uid: "ps1".into(),
            program: "p1".into(),
            ..Default::default()
        }],
        org_units: vec![OrgUnit { uid: "ou1".into(), ..Default::default() }],
        data_elements: vec![DataElement { uid: "de1".into(), ..Default::default() }],
        relationship_types: vec![RelationshipType { uid: "rt1".into(), ..Default::default() }],
        defaults: vec![Metadata::CategoryOptionCombo(CategoryOptionCombo {
            uid: "coc-default".into(),
            name: Some("default".into()),
            ..Default::default()
        })],
        ..Catalog::default()
    }
}

pub fn subject(uid: &str) -> Subject {
    Subject {
        uid: Some(uid.into()),
        subject_type: "st1".into(),
        org_unit: "ou1".into(),
        attributes: Vec::new(),
    }
}

pub fn enrollment(uid: &str, subject: &str) -> Enrollment {
    Enrollment {
        uid: Some(uid.into()),
        subject: subject.into(),
        program: "p1".into(),
        org_unit: "ou1".into(),
        ..Enrollment::default()
    }
}

pub fn event(uid: &str, enrollment: &str) -> Event {
    Event {
        uid: Some(uid.into()),
        enrollment: enrollment.into(),
        program: "p1".into(),
        program_stage: "ps1".into(),
        org_unit: "ou1".into(),
        data_values: vec![DataValue { data_element: "de1".into(), value: Some("1".into()) }],
        ..Event::default()
    }
}

pub fn relationship(uid: &str, from_subject: &str, to_subject: &str) -> Relationship {
    Relationship {
        uid: Some(uid.into()),
        relationship_type: "rt1".into(),
        from: RelationshipItem { subject: Some(from_subject.into()), ..Default::default() },
        to: RelationshipItem { subject: Some(to_subject.into()), ..Default::default() },
    }
}

pub fn create_payload() -> TrackerPayload {
    TrackerPayload {
        subjects: vec![subject("s1")],
        enrollments: vec![enrollment("en1", "s1")],
        events: vec![event("ev1", "en1")],
        relationships: Vec::new(),
    }
}

/// Store decorator that records every delete in call order, so tests can
/// assert the report's sequencing claims against what actually happened.
pub struct RecordingStore {
    inner: InMemoryStore,
    pub deletions: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub async fn with_catalog(catalog: Catalog) -> Self {
        let inner = InMemoryStore::new();
        inner.seed(catalog).await;
        Self { inner, deletions: Mutex::new(Vec::new()) }
    }

    pub fn deletion_log(&self) -> Vec<String> {
        self.deletions.lock().unwrap().clone()
    }

    fn log(&self, entry: String) {
        self.deletions.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl TrackerStore for RecordingStore {
    async fn load_metadata(
        &self,
        kind: MetadataKind,
        param: &IdSchemeParam,
        identifiers: &HashSet<String>,
    ) -> Result<Vec<Metadata>> {
        self.inner.load_metadata(kind, param, identifiers).await
    }

    async fn load_defaults(&self) -> Result<Vec<Metadata>> {
        self.inner.load_defaults().await
    }

    async fn load_subjects(&self, uids: &HashSet<String>) -> Result<Vec<Subject>> {
        self.inner.load_subjects(uids).await
    }

    async fn load_enrollments(&self, uids: &HashSet<String>) -> Result<Vec<Enrollment>> {
        self.inner.load_enrollments(uids).await
    }

    async fn load_events(&self, uids: &HashSet<String>) -> Result<Vec<Event>> {
        self.inner.load_events(uids).await
    }

    async fn load_relationships(&self, uids: &HashSet<String>) -> Result<Vec<Relationship>> {
        self.inner.load_relationships(uids).await
    }

    async fn enrollments_of_subject(&self, subject_uid: &str) -> Result<Vec<Enrollment>> {
        self.inner.enrollments_of_subject(subject_uid).await
    }

    async fn events_of_enrollment(&self, enrollment_uid: &str) -> Result<Vec<Event>> {
        self.inner.events_of_enrollment(enrollment_uid).await
    }

    async fn find_relationship_keys(&self, candidates: &HashSet<String>) -> Result<Vec<String>> {
        self.inner.find_relationship_keys(candidates).await
    }

    async fn save_subject(&self, subject: &Subject) -> Result<()> {
        self.inner.save_subject(subject).await
    }

    async fn save_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        self.inner.save_enrollment(enrollment).await
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        self.inner.save_event(event).await
    }

    async fn save_relationship(&self, relationship: &Relationship) -> Result<()> {
        self.inner.save_relationship(relationship).await
    }

    async fn delete_subject(&self, uid: &str) -> Result<()> {
        self.log(format!("subject:{}", uid));
        self.inner.delete_subject(uid).await
    }

    async fn delete_enrollment(&self, uid: &str) -> Result<()> {
        self.log(format!("enrollment:{}", uid));
        self.inner.delete_enrollment(uid).await
    }

    async fn delete_event(&self, uid: &str) -> Result<()> {
        self.log(format!("event:{}", uid));
        self.inner.delete_event(uid).await
    }

    async fn delete_relationship(&self, uid: &str) -> Result<()> {
        self.log(format!("relationship:{}", uid));
        self.inner.delete_relationship(uid).await
    }
}
