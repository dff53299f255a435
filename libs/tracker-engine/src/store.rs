//! Persistence and authorization seams, plus the in-memory store used by the
//! CLI and the test suites.
//!
//! The engine only ever talks to storage through [`TrackerStore`], so the
//! pipeline is storage-agnostic; transaction isolation is the store's
//! problem. [`AccessControl`] returns reasons instead of failing, so callers
//! can fold denials into the report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use trellis_models::metadata::{
    AttributeType, CategoryCombo, CategoryOption, CategoryOptionCombo, DataElement, OrgUnit,
    Program, ProgramStage, RelationshipType, SubjectType,
};
use trellis_models::{
    Capability, Enrollment, Event, IdSchemeParam, Metadata, MetadataKind, Principal, Relationship,
    Subject, TrackerType,
};

use crate::preheat::relationship_key;
use crate::Result;

/// Bulk-load and persistence interface for one import run.
///
/// Load methods take the identifier sets produced by the collector and return
/// whatever exists; absence is never an error. Mutating methods are only
/// called by the commit and deletion stages.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// All objects of `kind` whose identifier under `param` is in `identifiers`.
    async fn load_metadata(
        &self,
        kind: MetadataKind,
        param: &IdSchemeParam,
        identifiers: &HashSet<String>,
    ) -> Result<Vec<Metadata>>;

    /// The system's default objects. The kinds present here are exactly the
    /// default-eligible kinds for the run.
    async fn load_defaults(&self) -> Result<Vec<Metadata>>;

    async fn load_subjects(&self, uids: &HashSet<String>) -> Result<Vec<Subject>>;
    async fn load_enrollments(&self, uids: &HashSet<String>) -> Result<Vec<Enrollment>>;
    async fn load_events(&self, uids: &HashSet<String>) -> Result<Vec<Event>>;
    async fn load_relationships(&self, uids: &HashSet<String>) -> Result<Vec<Relationship>>;

    /// Non-deleted enrollments registered under the subject.
    async fn enrollments_of_subject(&self, subject_uid: &str) -> Result<Vec<Enrollment>>;

    /// Non-deleted events belonging to the enrollment.
    async fn events_of_enrollment(&self, enrollment_uid: &str) -> Result<Vec<Event>>;

    /// The subset of `candidates` for which a live relationship exists.
    async fn find_relationship_keys(
        &self,
        candidates: &HashSet<String>,
    ) -> Result<Vec<String>>;

    async fn save_subject(&self, subject: &Subject) -> Result<()>;
    async fn save_enrollment(&self, enrollment: &Enrollment) -> Result<()>;
    async fn save_event(&self, event: &Event) -> Result<()>;
    async fn save_relationship(&self, relationship: &Relationship) -> Result<()>;

    async fn delete_subject(&self, uid: &str) -> Result<()>;
    async fn delete_enrollment(&self, uid: &str) -> Result<()>;
    async fn delete_event(&self, uid: &str) -> Result<()>;
    async fn delete_relationship(&self, uid: &str) -> Result<()>;

    /// Flush buffered writes. Called per object under `FlushMode::Object`,
    /// once per stage otherwise.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Object-level authorization. Empty reason lists mean "allowed"; denials are
/// reported against the specific object, never raised as errors.
pub trait AccessControl: Send + Sync {
    fn can_write(&self, principal: &Principal, tracker_type: TrackerType, uid: &str)
        -> Vec<String>;

    fn can_delete(
        &self,
        principal: &Principal,
        tracker_type: TrackerType,
        uid: &str,
    ) -> Vec<String>;

    fn has_capability(&self, principal: &Principal, capability: Capability) -> bool {
        principal.has_capability(capability)
    }
}

/// Allows everything. The default when no policy is wired in.
pub struct OpenAccess;

impl AccessControl for OpenAccess {
    fn can_write(&self, _: &Principal, _: TrackerType, _: &str) -> Vec<String> {
        Vec::new()
    }

    fn can_delete(&self, _: &Principal, _: TrackerType, _: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Seed data for an [`InMemoryStore`]: the metadata catalogue, the system
/// defaults, and any pre-existing tracker objects.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Catalog {
    pub subject_types: Vec<SubjectType>,
    pub programs: Vec<Program>,
    pub program_stages: Vec<ProgramStage>,
    pub org_units: Vec<OrgUnit>,
    pub data_elements: Vec<DataElement>,
    pub attribute_types: Vec<AttributeType>,
    pub relationship_types: Vec<RelationshipType>,
    pub category_combos: Vec<CategoryCombo>,
    pub category_options: Vec<CategoryOption>,
    pub category_option_combos: Vec<CategoryOptionCombo>,
    pub defaults: Vec<Metadata>,
    pub subjects: Vec<Subject>,
    pub enrollments: Vec<Enrollment>,
    pub events: Vec<Event>,
    pub relationships: Vec<Relationship>,
}

impl Catalog {
    fn into_metadata(self) -> (Vec<Metadata>, Vec<Metadata>, Live) {
        let mut metadata = Vec::new();
        metadata.extend(self.subject_types.into_iter().map(Metadata::SubjectType));
        metadata.extend(self.programs.into_iter().map(Metadata::Program));
        metadata.extend(self.program_stages.into_iter().map(Metadata::ProgramStage));
        metadata.extend(self.org_units.into_iter().map(Metadata::OrgUnit));
        metadata.extend(self.data_elements.into_iter().map(Metadata::DataElement));
        metadata.extend(self.attribute_types.into_iter().map(Metadata::AttributeType));
        metadata.extend(
            self.relationship_types
                .into_iter()
                .map(Metadata::RelationshipType),
        );
        metadata.extend(self.category_combos.into_iter().map(Metadata::CategoryCombo));
        metadata.extend(self.category_options.into_iter().map(Metadata::CategoryOption));
        metadata.extend(
            self.category_option_combos
                .into_iter()
                .map(Metadata::CategoryOptionCombo),
        );

        let live = Live {
            subjects: self.subjects,
            enrollments: self.enrollments,
            events: self.events,
            relationships: self.relationships,
        };
        (metadata, self.defaults, live)
    }
}

struct Live {
    subjects: Vec<Subject>,
    enrollments: Vec<Enrollment>,
    events: Vec<Event>,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Clone)]
struct Stored<T> {
    value: T,
    deleted: bool,
}

impl<T> Stored<T> {
    fn live(value: T) -> Self {
        Self { value, deleted: false }
    }
}

#[derive(Default)]
struct Inner {
    metadata: HashMap<MetadataKind, Vec<Arc<Metadata>>>,
    defaults: Vec<Metadata>,
    subjects: HashMap<String, Stored<Subject>>,
    enrollments: HashMap<String, Stored<Enrollment>>,
    events: HashMap<String, Stored<Event>>,
    relationships: HashMap<String, Stored<Relationship>>,
}

impl Inner {
    fn relationship_type(&self, uid: &str) -> Option<&RelationshipType> {
        self.metadata
            .get(&MetadataKind::RelationshipType)?
            .iter()
            .find_map(|m| match m.as_ref() {
                Metadata::RelationshipType(t) if t.uid == uid => Some(t),
                _ => None,
            })
    }
}

/// HashMap-backed [`TrackerStore`] with soft deletes.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, catalog: Catalog) {
        let (metadata, defaults, live) = catalog.into_metadata();
        let mut inner = self.inner.write().await;
        for object in metadata {
            inner
                .metadata
                .entry(object.kind())
                .or_default()
                .push(Arc::new(object));
        }
        inner.defaults.extend(defaults);
        for subject in live.subjects {
            if let Some(uid) = subject.uid.clone() {
                inner.subjects.insert(uid, Stored::live(subject));
            }
        }
        for enrollment in live.enrollments {
            if let Some(uid) = enrollment.uid.clone() {
                inner.enrollments.insert(uid, Stored::live(enrollment));
            }
        }
        for event in live.events {
            if let Some(uid) = event.uid.clone() {
                inner.events.insert(uid, Stored::live(event));
            }
        }
        for relationship in live.relationships {
            if let Some(uid) = relationship.uid.clone() {
                inner.relationships.insert(uid, Stored::live(relationship));
            }
        }
    }

    /// True when the object exists and is not soft-deleted. Test helper.
    pub async fn is_live(&self, tracker_type: TrackerType, uid: &str) -> bool {
        let inner = self.inner.read().await;
        match tracker_type {
            TrackerType::Subject => inner.subjects.get(uid).is_some_and(|s| !s.deleted),
            TrackerType::Enrollment => inner.enrollments.get(uid).is_some_and(|s| !s.deleted),
            TrackerType::Event => inner.events.get(uid).is_some_and(|s| !s.deleted),
            TrackerType::Relationship => {
                inner.relationships.get(uid).is_some_and(|s| !s.deleted)
            }
        }
    }
}

fn load_live<'a, T: Clone + 'a>(
    map: &'a HashMap<String, Stored<T>>,
    uids: &HashSet<String>,
) -> Vec<T> {
    uids.iter()
        .filter_map(|uid| map.get(uid))
        .filter(|stored| !stored.deleted)
        .map(|stored| stored.value.clone())
        .collect()
}

#[async_trait]
impl TrackerStore for InMemoryStore {
    async fn load_metadata(
        &self,
        kind: MetadataKind,
        param: &IdSchemeParam,
        identifiers: &HashSet<String>,
    ) -> Result<Vec<Metadata>> {
        let inner = self.inner.read().await;
        let Some(objects) = inner.metadata.get(&kind) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .filter(|object| {
                param
                    .identifier_of(object)
                    .is_some_and(|id| identifiers.contains(&id))
            })
            .map(|object| object.as_ref().clone())
            .collect())
    }

    async fn load_defaults(&self) -> Result<Vec<Metadata>> {
        Ok(self.inner.read().await.defaults.clone())
    }

    async fn load_subjects(&self, uids: &HashSet<String>) -> Result<Vec<Subject>> {
        Ok(load_live(&self.inner.read().await.subjects, uids))
    }

    async fn load_enrollments(&self, uids: &HashSet<String>) -> Result<Vec<Enrollment>> {
        Ok(load_live(&self.inner.read().await.enrollments, uids))
    }

    async fn load_events(&self, uids: &HashSet<String>) -> Result<Vec<Event>> {
        Ok(load_live(&self.inner.read().await.events, uids))
    }

    async fn load_relationships(&self, uids: &HashSet<String>) -> Result<Vec<Relationship>> {
        Ok(load_live(&self.inner.read().await.relationships, uids))
    }

    async fn enrollments_of_subject(&self, subject_uid: &str) -> Result<Vec<Enrollment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .enrollments
            .values()
            .filter(|stored| !stored.deleted && stored.value.subject == subject_uid)
            .map(|stored| stored.value.clone())
            .collect())
    }

    async fn events_of_enrollment(&self, enrollment_uid: &str) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .values()
            .filter(|stored| !stored.deleted && stored.value.enrollment == enrollment_uid)
            .map(|stored| stored.value.clone())
            .collect())
    }

    async fn find_relationship_keys(
        &self,
        candidates: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut found = Vec::new();
        for stored in inner.relationships.values().filter(|s| !s.deleted) {
            let relationship = &stored.value;
            let (Some((_, from)), Some((_, to))) =
                (relationship.from.endpoint(), relationship.to.endpoint())
            else {
                continue;
            };
            let key = relationship_key(&relationship.relationship_type, from, to);
            if candidates.contains(&key) {
                found.push(key);
            }
            let bidirectional = inner
                .relationship_type(&relationship.relationship_type)
                .is_some_and(|t| t.bidirectional);
            if bidirectional {
                let inverted = relationship_key(&relationship.relationship_type, to, from);
                if candidates.contains(&inverted) {
                    found.push(inverted);
                }
            }
        }
        Ok(found)
    }

    async fn save_subject(&self, subject: &Subject) -> Result<()> {
        if let Some(uid) = subject.uid.clone() {
            let mut inner = self.inner.write().await;
            inner.subjects.insert(uid, Stored::live(subject.clone()));
        }
        Ok(())
    }

    async fn save_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        if let Some(uid) = enrollment.uid.clone() {
            let mut inner = self.inner.write().await;
            inner.enrollments.insert(uid, Stored::live(enrollment.clone()));
        }
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        if let Some(uid) = event.uid.clone() {
            let mut inner = self.inner.write().await;
            inner.events.insert(uid, Stored::live(event.clone()));
        }
        Ok(())
    }

    async fn save_relationship(&self, relationship: &Relationship) -> Result<()> {
        if let Some(uid) = relationship.uid.clone() {
            let mut inner = self.inner.write().await;
            inner
                .relationships
                .insert(uid, Stored::live(relationship.clone()));
        }
        Ok(())
    }

    async fn delete_subject(&self, uid: &str) -> Result<()> {
        if let Some(stored) = self.inner.write().await.subjects.get_mut(uid) {
            stored.deleted = true;
        }
        Ok(())
    }

    async fn delete_enrollment(&self, uid: &str) -> Result<()> {
        if let Some(stored) = self.inner.write().await.enrollments.get_mut(uid) {
            stored.deleted = true;
        }
        Ok(())
    }

    async fn delete_event(&self, uid: &str) -> Result<()> {
        if let Some(stored) = self.inner.write().await.events.get_mut(uid) {
            stored.deleted = true;
        }
        Ok(())
    }

    async fn delete_relationship(&self, uid: &str) -> Result<()> {
        if let Some(stored) = self.inner.write().await.relationships.get_mut(uid) {
            stored.deleted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org_unit(uid: &str, code: &str) -> OrgUnit {
        OrgUnit {
            uid: uid.into(),
            code: Some(code.into()),
            ..OrgUnit::default()
        }
    }

    #[tokio::test]
    async fn test_load_metadata_honors_scheme() {
        let store = InMemoryStore::new();
        store
            .seed(Catalog {
                org_units: vec![org_unit("ou1", "CLINIC-A"), org_unit("ou2", "CLINIC-B")],
                ..Catalog::default()
            })
            .await;

        let by_code = store
            .load_metadata(
                MetadataKind::OrgUnit,
                &IdSchemeParam::code(),
                &HashSet::from(["CLINIC-B".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(by_code.len(), 1);
        assert_eq!(by_code[0].uid(), "ou2");

        let by_uid = store
            .load_metadata(
                MetadataKind::OrgUnit,
                &IdSchemeParam::uid(),
                &HashSet::from(["CLINIC-B".to_string()]),
            )
            .await
            .unwrap();
        assert!(by_uid.is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_children() {
        let store = InMemoryStore::new();
        store
            .seed(Catalog {
                enrollments: vec![Enrollment {
                    uid: Some("en1".into()),
                    subject: "s1".into(),
                    ..Enrollment::default()
                }],
                ..Catalog::default()
            })
            .await;

        assert_eq!(store.enrollments_of_subject("s1").await.unwrap().len(), 1);
        store.delete_enrollment("en1").await.unwrap();
        assert!(store.enrollments_of_subject("s1").await.unwrap().is_empty());
        assert!(!store.is_live(TrackerType::Enrollment, "en1").await);
    }
}
