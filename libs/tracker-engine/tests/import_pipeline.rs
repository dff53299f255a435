//! End-to-end pipeline behavior: atomicity, dry-run, rule-effect merging,
//! and the failure report path.

mod test_support;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use test_support::{catalog, create_payload, event, subject};
use trellis_engine::preheat::Preheat;
use trellis_engine::{
    Error, ImportService, InMemoryStore, Result, RuleEffect, RuleEngine, SideEffectBundle,
    SideEffectDispatcher, TrackerStore,
};
use trellis_models::{
    AtomicMode, Enrollment, ErrorCode, Event, IdSchemeParam, ImportMode, ImportParams,
    ImportStatus, ImportStrategy, Metadata, MetadataKind, Relationship, ReportMode, Subject,
    TrackerPayload, TrackerType,
};

async fn seeded_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.seed(catalog()).await;
    Arc::new(store)
}

fn create_params() -> ImportParams {
    ImportParams {
        strategy: ImportStrategy::Create,
        ..ImportParams::default()
    }
}

#[tokio::test]
async fn test_end_to_end_create() {
    let store = seeded_store().await;
    let service = ImportService::with_defaults(store.clone());

    let report = service.import(create_params(), create_payload()).await.unwrap();

    assert_eq!(report.status, ImportStatus::Ok);
    assert_eq!(report.stats.created, 3);
    assert_eq!(report.stats.ignored, 0);
    for tracker_type in [TrackerType::Subject, TrackerType::Enrollment, TrackerType::Event] {
        let type_report = &report.persistence_report.type_reports[&tracker_type];
        assert_eq!(type_report.stats.created, 1, "{} not created", tracker_type);
        assert_eq!(type_report.stats.ignored, 0);
    }
    assert_eq!(report.payload_counts[&TrackerType::Subject], 1);

    assert!(store.is_live(TrackerType::Subject, "s1").await);
    assert!(store.is_live(TrackerType::Enrollment, "en1").await);
    assert!(store.is_live(TrackerType::Event, "ev1").await);
}

#[tokio::test]
async fn test_atomic_all_rejects_everything_on_one_error() {
    let store = seeded_store().await;
    let service = ImportService::with_defaults(store.clone());

    let mut payload = create_payload();
    payload.subjects.push(Subject {
        uid: Some("s2".into()),
        subject_type: "st1".into(),
        org_unit: "nowhere".into(),
        ..Subject::default()
    });

    let report = service.import(create_params(), payload).await.unwrap();

    assert_eq!(report.status, ImportStatus::ValidationError);
    assert_eq!(report.stats.created, 0);
    assert_eq!(report.stats.updated, 0);
    assert_eq!(report.stats.deleted, 0);
    // every submitted object is reported as ignored
    assert_eq!(report.stats.ignored, 4);
    assert!(report
        .validation_report
        .errors
        .iter()
        .any(|e| e.code == ErrorCode::OrgUnitNotFound && e.uid.as_deref() == Some("s2")));

    // nothing was persisted
    assert!(!store.is_live(TrackerType::Subject, "s1").await);
    assert!(!store.is_live(TrackerType::Subject, "s2").await);
}

#[tokio::test]
async fn test_per_object_mode_commits_the_valid_rest() {
    let store = seeded_store().await;
    let service = ImportService::with_defaults(store.clone());

    let params = ImportParams {
        atomic_mode: AtomicMode::Object,
        ..create_params()
    };
    let mut payload = create_payload();
    payload.subjects.push(Subject {
        uid: Some("s2".into()),
        subject_type: "st1".into(),
        org_unit: "nowhere".into(),
        ..Subject::default()
    });

    let report = service.import(params, payload).await.unwrap();

    assert_eq!(report.status, ImportStatus::ValidationError);
    let subjects = &report.persistence_report.type_reports[&TrackerType::Subject];
    assert_eq!(subjects.stats.created, 1);
    assert_eq!(subjects.stats.ignored, 1);
    assert_eq!(report.stats.created, 3);

    assert!(store.is_live(TrackerType::Subject, "s1").await);
    assert!(!store.is_live(TrackerType::Subject, "s2").await);
}

#[tokio::test]
async fn test_dry_run_validates_without_persisting() {
    let store = seeded_store().await;
    let service = ImportService::with_defaults(store.clone());

    let params = ImportParams {
        import_mode: ImportMode::Validate,
        report_mode: ReportMode::Full,
        ..create_params()
    };
    let report = service.import(params, create_payload()).await.unwrap();

    assert_eq!(report.status, ImportStatus::Ok);
    assert_eq!(report.stats.total(), 0);
    assert!(report.timings.is_some());
    assert!(!store.is_live(TrackerType::Subject, "s1").await);
}

/// Engine double: records the sibling set it was shown for one event and
/// produces one assignment plus one warning for it.
struct CapturingEngine {
    target: String,
    seen_siblings: Mutex<Vec<String>>,
}

#[async_trait]
impl RuleEngine for CapturingEngine {
    async fn evaluate_enrollment(
        &self,
        _: &Enrollment,
        _: &[Event],
        _: &Preheat,
    ) -> Result<Vec<RuleEffect>> {
        Ok(Vec::new())
    }

    async fn evaluate_event(
        &self,
        event: &Event,
        _: Option<&Enrollment>,
        siblings: &[Event],
        _: &Preheat,
    ) -> Result<Vec<RuleEffect>> {
        if event.uid.as_deref() != Some(self.target.as_str()) {
            return Ok(Vec::new());
        }
        let mut seen = self.seen_siblings.lock().unwrap();
        *seen = siblings.iter().filter_map(|e| e.uid.clone()).collect();
        Ok(vec![
            RuleEffect::AssignDataValue { data_element: "de1".into(), value: Some("42".into()) },
            RuleEffect::Warning { message: "value was assigned by a rule".into() },
            RuleEffect::ScheduleEvent {
                program_stage: "ps1".into(),
                due_at: chrono::Utc::now(),
            },
        ])
    }
}

/// Collects the side-effect bundles the commit stage hands over.
#[derive(Default)]
struct RecordingDispatcher {
    bundles: Mutex<Vec<(TrackerType, String, usize)>>,
}

#[async_trait]
impl SideEffectDispatcher for RecordingDispatcher {
    async fn dispatch(&self, bundle: SideEffectBundle) {
        self.bundles
            .lock()
            .unwrap()
            .push((bundle.tracker_type, bundle.uid, bundle.effects.len()));
    }
}

#[tokio::test]
async fn test_rule_evaluation_sees_each_sibling_once() {
    let store = InMemoryStore::new();
    let mut seed = catalog();
    // "f" is already persisted under en1 …
    seed.subjects = vec![subject("s1")];
    seed.enrollments = vec![test_support::enrollment("en1", "s1")];
    seed.events = vec![event("f", "en1")];
    store.seed(seed).await;
    let store = Arc::new(store);

    let engine = Arc::new(CapturingEngine {
        target: "e".into(),
        seen_siblings: Mutex::new(Vec::new()),
    });
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let service = ImportService::with_defaults(store.clone())
        .with_rule_engine(engine.clone())
        .with_dispatcher(dispatcher.clone());

    // … and resent unchanged in the same payload, next to the new event "e".
    let payload = TrackerPayload {
        events: vec![event("e", "en1"), event("f", "en1")],
        ..TrackerPayload::default()
    };
    let params = ImportParams {
        report_mode: ReportMode::Warnings,
        ..ImportParams::default()
    };
    let report = service.import(params, payload).await.unwrap();

    assert_eq!(*engine.seen_siblings.lock().unwrap(), vec!["f".to_string()]);

    // the assignment was merged into the bundle before commit
    let committed = store
        .load_events(&HashSet::from(["e".to_string()]))
        .await
        .unwrap();
    assert_eq!(committed[0].data_values[0].value.as_deref(), Some("42"));

    // and the rule warning surfaced in the report
    assert_eq!(report.status, ImportStatus::Warning);
    assert!(report
        .validation_report
        .warnings
        .iter()
        .any(|w| w.code == ErrorCode::RuleWarning && w.uid.as_deref() == Some("e")));

    // the scheduling instruction was dispatched after the commit
    assert_eq!(
        *dispatcher.bundles.lock().unwrap(),
        vec![(TrackerType::Event, "e".to_string(), 1)]
    );
}

/// Store whose bulk loads blow up, to exercise the failure report path.
struct BrokenStore;

#[async_trait]
impl TrackerStore for BrokenStore {
    async fn load_metadata(
        &self,
        _: MetadataKind,
        _: &IdSchemeParam,
        _: &HashSet<String>,
    ) -> Result<Vec<Metadata>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn load_defaults(&self) -> Result<Vec<Metadata>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn load_subjects(&self, _: &HashSet<String>) -> Result<Vec<Subject>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn load_enrollments(&self, _: &HashSet<String>) -> Result<Vec<Enrollment>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn load_events(&self, _: &HashSet<String>) -> Result<Vec<Event>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn load_relationships(&self, _: &HashSet<String>) -> Result<Vec<Relationship>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn enrollments_of_subject(&self, _: &str) -> Result<Vec<Enrollment>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn events_of_enrollment(&self, _: &str) -> Result<Vec<Event>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn find_relationship_keys(&self, _: &HashSet<String>) -> Result<Vec<String>> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn save_subject(&self, _: &Subject) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn save_enrollment(&self, _: &Enrollment) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn save_event(&self, _: &Event) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn save_relationship(&self, _: &Relationship) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn delete_subject(&self, _: &str) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn delete_enrollment(&self, _: &str) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn delete_event(&self, _: &str) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }

    async fn delete_relationship(&self, _: &str) -> Result<()> {
        Err(Error::Store("metadata store unavailable".into()))
    }
}

#[tokio::test]
async fn test_stage_failure_becomes_an_error_report() {
    let service = ImportService::with_defaults(Arc::new(BrokenStore));
    let report = service
        .import(ImportParams::default(), create_payload())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Error);
    assert!(report.message.as_deref().unwrap().contains("metadata store unavailable"));
    // payload sizes survive the failure path
    assert_eq!(report.payload_counts[&TrackerType::Subject], 1);
}

#[tokio::test]
async fn test_malformed_configuration_is_rejected_up_front() {
    let store = seeded_store().await;
    let service = ImportService::with_defaults(store);

    let mut params = ImportParams::default();
    params.id_schemes.data_element = Some(IdSchemeParam {
        scheme: trellis_models::IdScheme::Attribute,
        attribute_uid: None,
    });

    let result = service.import(params, create_payload()).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_skip_rule_engine_leaves_payload_untouched() {
    let store = seeded_store().await;
    let engine = Arc::new(CapturingEngine {
        target: "ev1".into(),
        seen_siblings: Mutex::new(Vec::new()),
    });
    let service = ImportService::with_defaults(store.clone())
        .with_rule_engine(engine.clone() as Arc<dyn RuleEngine>);

    let params = ImportParams {
        skip_rule_engine: true,
        ..create_params()
    };
    let report = service.import(params, create_payload()).await.unwrap();

    assert_eq!(report.status, ImportStatus::Ok);
    assert!(engine.seen_siblings.lock().unwrap().is_empty());
    let committed = store
        .load_events(&HashSet::from(["ev1".to_string()]))
        .await
        .unwrap();
    assert_eq!(committed[0].data_values[0].value.as_deref(), Some("1"));
}
