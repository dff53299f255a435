//! The commit stage: persist the bundle in parent-before-child order, build
//! the per-type outcome tree, and hand accumulated side effects to the
//! dispatcher once the writes are done.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use trellis_models::{FlushMode, ObjectReport, PersistenceReport, TrackerType};

use crate::bundle::ImportBundle;
use crate::rules::RuleEffect;
use crate::store::TrackerStore;
use crate::Result;

/// Side effects accumulated for one committed object, e.g. scheduling
/// instructions produced by rule evaluation.
#[derive(Debug, Clone)]
pub struct SideEffectBundle {
    pub tracker_type: TrackerType,
    pub uid: String,
    pub effects: Vec<RuleEffect>,
}

/// Consumer of post-commit side effects. Dispatch is fire-and-forget: it runs
/// after the writes and can never fail the run.
#[async_trait]
pub trait SideEffectDispatcher: Send + Sync {
    async fn dispatch(&self, bundle: SideEffectBundle);
}

/// Logs each side-effect bundle. The default when no dispatcher is wired in.
pub struct LoggingDispatcher;

#[async_trait]
impl SideEffectDispatcher for LoggingDispatcher {
    async fn dispatch(&self, bundle: SideEffectBundle) {
        tracing::info!(
            tracker_type = %bundle.tracker_type,
            uid = %bundle.uid,
            effects = bundle.effects.len(),
            "side effects dispatched"
        );
    }
}

pub struct CommitService {
    store: Arc<dyn TrackerStore>,
    dispatcher: Arc<dyn SideEffectDispatcher>,
}

impl CommitService {
    pub fn new(store: Arc<dyn TrackerStore>, dispatcher: Arc<dyn SideEffectDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Persist every object left in the bundle. Parent types go first so
    /// children never reference an object the store has not seen yet.
    pub async fn commit(&self, bundle: &ImportBundle) -> Result<PersistenceReport> {
        let per_object_flush = bundle.params.flush_mode == FlushMode::Object;
        let mut report = PersistenceReport::default();

        for (index, subject) in bundle.subjects.iter().enumerate() {
            let Some(uid) = subject.uid.as_deref() else { continue };
            self.store.save_subject(subject).await?;
            self.record(&mut report, bundle, TrackerType::Subject, uid, index);
            if per_object_flush {
                self.store.flush().await?;
            }
        }
        for (index, enrollment) in bundle.enrollments.iter().enumerate() {
            let Some(uid) = enrollment.uid.as_deref() else { continue };
            self.store.save_enrollment(enrollment).await?;
            self.record(&mut report, bundle, TrackerType::Enrollment, uid, index);
            if per_object_flush {
                self.store.flush().await?;
            }
        }
        for (index, event) in bundle.events.iter().enumerate() {
            let Some(uid) = event.uid.as_deref() else { continue };
            self.store.save_event(event).await?;
            self.record(&mut report, bundle, TrackerType::Event, uid, index);
            if per_object_flush {
                self.store.flush().await?;
            }
        }
        for (index, relationship) in bundle.relationships.iter().enumerate() {
            let Some(uid) = relationship.uid.as_deref() else { continue };
            self.store.save_relationship(relationship).await?;
            self.record(&mut report, bundle, TrackerType::Relationship, uid, index);
            if per_object_flush {
                self.store.flush().await?;
            }
        }
        self.store.flush().await?;

        self.dispatch_side_effects(bundle).await;
        Ok(report)
    }

    fn record(
        &self,
        report: &mut PersistenceReport,
        bundle: &ImportBundle,
        tracker_type: TrackerType,
        uid: &str,
        index: usize,
    ) {
        let type_report = report.type_report(tracker_type);
        if bundle.preheat.exists(tracker_type, uid) {
            type_report.stats.updated += 1;
        } else {
            type_report.stats.created += 1;
        }
        type_report.add_object_report(ObjectReport::new(
            tracker_type,
            Some(uid.to_string()),
            index,
        ));
    }

    /// Group the staged scheduling instructions per object and hand them over.
    async fn dispatch_side_effects(&self, bundle: &ImportBundle) {
        let mut grouped: HashMap<(TrackerType, String), Vec<RuleEffect>> = HashMap::new();
        for (tracker_type, uid, effect) in bundle.schedule_effects() {
            grouped.entry((tracker_type, uid)).or_default().push(effect);
        }
        for ((tracker_type, uid), effects) in grouped {
            self.dispatcher
                .dispatch(SideEffectBundle { tracker_type, uid, effects })
                .await;
        }
    }
}
