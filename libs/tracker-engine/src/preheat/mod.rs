//! The reference cache ("preheat"): every metadata and domain object an
//! import run refers to, bulk-loaded once and read-only thereafter.
//!
//! Metadata lives in a two-level map keyed by (concrete scheme param ×
//! kind) → identifier → object. Default objects are tracked in a side table
//! and never enter the main map, so duplicate detection can't mistake a
//! system default for a user-supplied reference. Which kinds are
//! default-eligible is decided by whatever the store enumerates as defaults,
//! not hard-coded here.

pub mod collector;
mod service;

pub use collector::CollectedIds;
pub use service::PreheatService;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use trellis_models::{
    Enrollment, Event, IdSchemeParam, IdSchemeParams, Metadata, MetadataKind, Relationship,
    Subject, TrackerType,
};

/// Canonical duplicate-detection key for a relationship.
pub fn relationship_key(relationship_type: &str, from: &str, to: &str) -> String {
    format!("{}_{}_{}", relationship_type, from, to)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MapKey {
    param: IdSchemeParam,
    kind: MetadataKind,
}

#[derive(Debug, Default)]
pub struct Preheat {
    id_schemes: IdSchemeParams,
    map: HashMap<MapKey, HashMap<String, Arc<Metadata>>>,
    defaults: HashMap<MetadataKind, Arc<Metadata>>,

    subjects: HashMap<String, Subject>,
    enrollments: HashMap<String, Enrollment>,
    events: HashMap<String, Event>,
    relationships: HashMap<String, Relationship>,
    events_by_enrollment: HashMap<String, Vec<String>>,
    existing_relationship_keys: HashSet<String>,
}

impl Preheat {
    pub fn new(id_schemes: IdSchemeParams) -> Self {
        Self { id_schemes, ..Self::default() }
    }

    pub fn id_schemes(&self) -> &IdSchemeParams {
        &self.id_schemes
    }

    /// Insert under the object's identifier for `param`. First write wins;
    /// default objects and objects without an identifier are skipped.
    /// An `Auto` param stores under the concrete scheme that resolved.
    pub fn put(&mut self, param: &IdSchemeParam, object: Metadata) {
        self.insert(param, Arc::new(object), false);
    }

    pub fn put_all<I: IntoIterator<Item = Metadata>>(&mut self, param: &IdSchemeParam, objects: I) {
        for object in objects {
            self.put(param, object);
        }
    }

    /// Like [`Preheat::put`] but unconditionally overwrites an existing entry.
    pub fn replace(&mut self, param: &IdSchemeParam, object: Metadata) {
        self.insert(param, Arc::new(object), true);
    }

    fn insert(&mut self, param: &IdSchemeParam, object: Arc<Metadata>, overwrite: bool) {
        if self.is_default(&object) {
            return;
        }
        let Some((concrete, identifier)) = param.normalized().into_iter().find_map(|concrete| {
            let identifier = concrete.identifier_of(&object)?;
            Some((concrete, identifier))
        }) else {
            return;
        };
        let key = MapKey { param: concrete, kind: object.kind() };
        let entries = self.map.entry(key).or_default();
        if overwrite {
            entries.insert(identifier, object);
        } else {
            entries.entry(identifier).or_insert(object);
        }
    }

    /// Lookup by raw identifier. `Auto` tries uid, then code.
    pub fn get(
        &self,
        param: &IdSchemeParam,
        kind: MetadataKind,
        identifier: &str,
    ) -> Option<Arc<Metadata>> {
        param.normalized().into_iter().find_map(|concrete| {
            self.map
                .get(&MapKey { param: concrete, kind })
                .and_then(|entries| entries.get(identifier))
                .cloned()
        })
    }

    /// Lookup using the object's own identifier under `param`.
    pub fn get_object(&self, param: &IdSchemeParam, object: &Metadata) -> Option<Arc<Metadata>> {
        param.normalized().into_iter().find_map(|concrete| {
            let identifier = concrete.identifier_of(object)?;
            self.map
                .get(&MapKey { param: concrete, kind: object.kind() })
                .and_then(|entries| entries.get(&identifier))
                .cloned()
        })
    }

    /// Lookup under the scheme configured for `kind` in this run.
    pub fn resolve(&self, kind: MetadataKind, identifier: &str) -> Option<Arc<Metadata>> {
        let param = self.id_schemes.param_for(kind).clone();
        self.get(&param, kind, identifier)
    }

    pub fn remove(
        &mut self,
        param: &IdSchemeParam,
        kind: MetadataKind,
        identifier: &str,
    ) -> Option<Arc<Metadata>> {
        param.normalized().into_iter().find_map(|concrete| {
            self.map
                .get_mut(&MapKey { param: concrete, kind })
                .and_then(|entries| entries.remove(identifier))
        })
    }

    pub fn remove_all<'a, I: IntoIterator<Item = &'a str>>(
        &mut self,
        param: &IdSchemeParam,
        kind: MetadataKind,
        identifiers: I,
    ) {
        for identifier in identifiers {
            self.remove(param, kind, identifier);
        }
    }

    /// Register a system default. Its kind becomes default-eligible: any
    /// object of that kind with the same uid is excluded from the main map.
    pub fn put_default(&mut self, object: Metadata) {
        self.defaults.insert(object.kind(), Arc::new(object));
    }

    pub fn get_default(&self, kind: MetadataKind) -> Option<Arc<Metadata>> {
        self.defaults.get(&kind).cloned()
    }

    pub fn is_default(&self, object: &Metadata) -> bool {
        self.defaults
            .get(&object.kind())
            .is_some_and(|default| default.uid() == object.uid())
    }

    // ------------------------------------------------------------------
    // Live tracker objects (existence checks, merging, sibling lookups)
    // ------------------------------------------------------------------

    pub fn put_subjects(&mut self, subjects: Vec<Subject>) {
        for subject in subjects {
            if let Some(uid) = subject.uid.clone() {
                self.subjects.insert(uid, subject);
            }
        }
    }

    pub fn put_enrollments(&mut self, enrollments: Vec<Enrollment>) {
        for enrollment in enrollments {
            if let Some(uid) = enrollment.uid.clone() {
                self.enrollments.insert(uid, enrollment);
            }
        }
    }

    pub fn put_events(&mut self, events: Vec<Event>) {
        for event in events {
            let Some(uid) = event.uid.clone() else { continue };
            let siblings = self
                .events_by_enrollment
                .entry(event.enrollment.clone())
                .or_default();
            if !siblings.contains(&uid) {
                siblings.push(uid.clone());
            }
            self.events.insert(uid, event);
        }
    }

    pub fn put_relationships(&mut self, relationships: Vec<Relationship>) {
        for relationship in relationships {
            if let Some(uid) = relationship.uid.clone() {
                self.relationships.insert(uid, relationship);
            }
        }
    }

    pub fn subject(&self, uid: &str) -> Option<&Subject> {
        self.subjects.get(uid)
    }

    pub fn enrollment(&self, uid: &str) -> Option<&Enrollment> {
        self.enrollments.get(uid)
    }

    pub fn event(&self, uid: &str) -> Option<&Event> {
        self.events.get(uid)
    }

    pub fn relationship(&self, uid: &str) -> Option<&Relationship> {
        self.relationships.get(uid)
    }

    /// Persisted events of the enrollment, in insertion order.
    pub fn events_of_enrollment(&self, enrollment_uid: &str) -> Vec<&Event> {
        self.events_by_enrollment
            .get(enrollment_uid)
            .map(|uids| uids.iter().filter_map(|uid| self.events.get(uid)).collect())
            .unwrap_or_default()
    }

    /// Whether an entity of the given type and uid already exists in the store.
    pub fn exists(&self, tracker_type: TrackerType, uid: &str) -> bool {
        match tracker_type {
            TrackerType::Subject => self.subjects.contains_key(uid),
            TrackerType::Enrollment => self.enrollments.contains_key(uid),
            TrackerType::Event => self.events.contains_key(uid),
            TrackerType::Relationship => self.relationships.contains_key(uid),
        }
    }

    // ------------------------------------------------------------------
    // Relationship duplicate detection
    // ------------------------------------------------------------------

    pub fn add_existing_relationship_keys<I: IntoIterator<Item = String>>(&mut self, keys: I) {
        self.existing_relationship_keys.extend(keys);
    }

    /// True when the payload relationship matches a live one, honoring the
    /// inverted key for bidirectional types.
    pub fn is_duplicate_relationship(&self, relationship: &Relationship) -> bool {
        let Some(resolved) =
            self.resolve(MetadataKind::RelationshipType, &relationship.relationship_type)
        else {
            return false;
        };
        let Metadata::RelationshipType(relationship_type) = resolved.as_ref() else {
            return false;
        };
        let (Some((_, from)), Some((_, to))) =
            (relationship.from.endpoint(), relationship.to.endpoint())
        else {
            return false;
        };

        let key = relationship_key(&relationship_type.uid, from, to);
        if self.existing_relationship_keys.contains(&key) {
            return true;
        }
        relationship_type.bidirectional
            && self
                .existing_relationship_keys
                .contains(&relationship_key(&relationship_type.uid, to, from))
    }
}
