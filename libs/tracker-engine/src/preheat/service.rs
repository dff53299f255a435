//! Drives the preheat: collect identifiers, bulk-load everything once, hand
//! back a cache that stays read-only for the rest of the run.

use std::collections::HashSet;
use std::sync::Arc;

use trellis_models::{ImportParams, Metadata, MetadataKind, TrackerPayload};

use super::{collector, relationship_key, Preheat};
use crate::store::TrackerStore;
use crate::Result;

pub struct PreheatService {
    store: Arc<dyn TrackerStore>,
}

impl PreheatService {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        Self { store }
    }

    pub async fn preheat(
        &self,
        params: &ImportParams,
        payload: &TrackerPayload,
    ) -> Result<Preheat> {
        let collected = collector::collect(payload);
        let mut preheat = Preheat::new(params.id_schemes.clone());

        // Defaults first: they must be registered before any bulk put so the
        // exclusion rule sees them.
        for default in self.store.load_defaults().await? {
            preheat.put_default(default);
        }

        for (kind, identifiers) in &collected.metadata {
            let param = params.id_schemes.param_for(*kind).clone();
            let objects = self.store.load_metadata(*kind, &param, identifiers).await?;
            tracing::debug!(
                kind = %kind,
                requested = identifiers.len(),
                resolved = objects.len(),
                "preheat: metadata loaded"
            );
            preheat.put_all(&param, objects);
        }

        preheat.put_subjects(self.store.load_subjects(&collected.subjects).await?);
        preheat.put_enrollments(self.store.load_enrollments(&collected.enrollments).await?);
        preheat.put_events(self.store.load_events(&collected.events).await?);
        preheat.put_relationships(
            self.store.load_relationships(&collected.relationships).await?,
        );

        // Persisted siblings of every enrollment the payload touches, needed
        // for rule evaluation over the full event set.
        for enrollment_uid in &collected.enrollments {
            let siblings = self.store.events_of_enrollment(enrollment_uid).await?;
            preheat.put_events(siblings);
        }

        let candidates = self.relationship_key_candidates(payload, &preheat);
        if !candidates.is_empty() {
            let existing = self.store.find_relationship_keys(&candidates).await?;
            preheat.add_existing_relationship_keys(existing);
        }

        Ok(preheat)
    }

    /// Duplicate-detection keys for every well-formed payload relationship,
    /// including the inverted key for bidirectional types.
    fn relationship_key_candidates(
        &self,
        payload: &TrackerPayload,
        preheat: &Preheat,
    ) -> HashSet<String> {
        let mut candidates = HashSet::new();
        for relationship in &payload.relationships {
            let Some(resolved) =
                preheat.resolve(MetadataKind::RelationshipType, &relationship.relationship_type)
            else {
                continue;
            };
            let Metadata::RelationshipType(relationship_type) = resolved.as_ref() else {
                continue;
            };
            let (Some((_, from)), Some((_, to))) =
                (relationship.from.endpoint(), relationship.to.endpoint())
            else {
                continue;
            };
            candidates.insert(relationship_key(&relationship_type.uid, from, to));
            if relationship_type.bidirectional {
                candidates.insert(relationship_key(&relationship_type.uid, to, from));
            }
        }
        candidates
    }
}
