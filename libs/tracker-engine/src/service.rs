//! The import orchestrator: one state machine per run.
//!
//! ```text
//! Created → Resolved → Preprocessed → Validated
//!         → { Committed | Deleted | RejectedAtomic } → Reported
//! ```
//!
//! Every collaborator is an explicit dependency, so independent runs never
//! share mutable state. Stage errors are caught here - and only here - and
//! turned into an error report carrying whatever had been computed; the
//! caller always gets a report back, except for configuration errors
//! rejected up front.

use std::sync::Arc;
use std::time::Instant;

use trellis_models::{
    AtomicMode, ImportMode, ImportParams, ImportReport, ObjectReport, Timings, TrackerPayload,
    TrackerType, ValidationReport,
};

use crate::commit::{CommitService, LoggingDispatcher, SideEffectDispatcher};
use crate::deletion::DeletionService;
use crate::notify::{ProgressSink, TracingSink};
use crate::preheat::PreheatService;
use crate::rules::{NoopRuleEngine, RuleEngine, RuleService};
use crate::store::{AccessControl, OpenAccess, TrackerStore};
use crate::validation::{DefaultValidator, Validator};
use crate::{ImportBundle, Result};

pub const STAGE_PREHEAT: &str = "preheat";
pub const STAGE_RULES: &str = "programrule";
pub const STAGE_VALIDATION: &str = "validation";
pub const STAGE_COMMIT: &str = "commit";
pub const STAGE_TOTAL: &str = "total";

pub struct ImportService {
    store: Arc<dyn TrackerStore>,
    rule_engine: Arc<dyn RuleEngine>,
    validator: Arc<dyn Validator>,
    access: Arc<dyn AccessControl>,
    notifier: Arc<dyn ProgressSink>,
    dispatcher: Arc<dyn SideEffectDispatcher>,
}

impl ImportService {
    pub fn new(
        store: Arc<dyn TrackerStore>,
        rule_engine: Arc<dyn RuleEngine>,
        validator: Arc<dyn Validator>,
        access: Arc<dyn AccessControl>,
        notifier: Arc<dyn ProgressSink>,
        dispatcher: Arc<dyn SideEffectDispatcher>,
    ) -> Self {
        Self { store, rule_engine, validator, access, notifier, dispatcher }
    }

    /// A service with no rule engine, the default validator, open access,
    /// tracing notifications and a logging dispatcher.
    pub fn with_defaults(store: Arc<dyn TrackerStore>) -> Self {
        Self::new(
            store,
            Arc::new(NoopRuleEngine),
            Arc::new(DefaultValidator),
            Arc::new(OpenAccess),
            Arc::new(TracingSink),
            Arc::new(LoggingDispatcher),
        )
    }

    pub fn with_rule_engine(mut self, rule_engine: Arc<dyn RuleEngine>) -> Self {
        self.rule_engine = rule_engine;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ProgressSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn SideEffectDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Run one import to completion. The returned report reflects success,
    /// atomic rejection, or whole-run failure; `Err` is reserved for
    /// malformed configuration.
    pub async fn import(
        &self,
        params: ImportParams,
        payload: TrackerPayload,
    ) -> Result<ImportReport> {
        params.validate()?;
        let job = params.job_id;
        if let Some(job) = job {
            self.notifier.started(job);
        }

        let total = Instant::now();
        let mut timings = Timings::default();
        let payload_counts: std::collections::BTreeMap<TrackerType, usize> = TrackerType::ORDERED
            .iter()
            .map(|t| (*t, payload.count_of(*t)))
            .collect();
        let mut validation_snapshot = ValidationReport::default();

        let outcome = self
            .run(&params, payload, &mut timings, &mut validation_snapshot)
            .await;

        let mut report = match outcome {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "import run failed");
                if let Some(job) = job {
                    self.notifier.failed(job, &err.to_string());
                }
                ImportReport {
                    validation_report: validation_snapshot,
                    message: Some(err.to_string()),
                    ..ImportReport::default()
                }
            }
        };

        timings.record(STAGE_TOTAL, total.elapsed());
        report.payload_counts = payload_counts;
        report.timings = Some(timings);
        report.resolve_status();
        let report = report.filtered(params.report_mode);
        if let Some(job) = job {
            self.notifier.completed(job, &report);
        }
        Ok(report)
    }

    async fn run(
        &self,
        params: &ImportParams,
        payload: TrackerPayload,
        timings: &mut Timings,
        validation_snapshot: &mut ValidationReport,
    ) -> Result<ImportReport> {
        // Created → Resolved: bulk-load everything the payload refers to.
        let started = Instant::now();
        let preheat = PreheatService::new(self.store.clone())
            .preheat(params, &payload)
            .await?;
        let mut bundle = ImportBundle::new(params.clone(), payload, preheat);
        timings.record(STAGE_PREHEAT, started.elapsed());
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "references resolved");

        // Resolved → Preprocessed: generated uids, then rule effects.
        bundle.assign_missing_uids();
        if !params.skip_rule_engine {
            let started = Instant::now();
            let rules = RuleService::new(self.rule_engine.clone());
            let enrollment_effects = rules.evaluate_enrollments(&bundle).await?;
            let event_effects = rules.evaluate_events(&bundle).await?;
            bundle.apply_rule_effects(enrollment_effects, event_effects);
            timings.record(STAGE_RULES, started.elapsed());
        }

        // Preprocessed → Validated.
        let started = Instant::now();
        let validation = self.validator.validate(&bundle);
        *validation_snapshot = validation.clone();
        timings.record(STAGE_VALIDATION, started.elapsed());
        if let Some(job) = params.job_id {
            self.notifier.stage(job, STAGE_VALIDATION, started.elapsed());
        }

        let mut report = ImportReport::default();

        // Validated → RejectedAtomic: nothing is persisted, everything is
        // reported as ignored.
        if validation.has_errors() && params.atomic_mode == AtomicMode::All {
            for tracker_type in TrackerType::ORDERED {
                report.persistence_report.type_report(tracker_type).stats.ignored =
                    bundle.count_of(tracker_type) as u64;
            }
            report.validation_report = validation;
            return Ok(report);
        }

        // Per-object mode: drop the failing objects, remember them for the
        // ignored accounting.
        let mut pre_ignored = Vec::new();
        if validation.has_errors() {
            pre_ignored = bundle.strip_invalid(&validation);
        }

        // Dry-run stops here with the full report shape and zero counts.
        if params.import_mode == ImportMode::Validate {
            report.validation_report = validation;
            return Ok(report);
        }

        // Validated → Committed | Deleted.
        let started = Instant::now();
        let mut persistence = if params.strategy.is_delete() {
            DeletionService::new(self.store.clone(), self.access.clone())
                .delete(&bundle)
                .await?
        } else {
            CommitService::new(self.store.clone(), self.dispatcher.clone())
                .commit(&bundle)
                .await?
        };
        for (tracker_type, uid, index) in pre_ignored {
            let type_report = persistence.type_report(tracker_type);
            type_report.stats.ignored += 1;
            type_report.add_object_report(ObjectReport::new(tracker_type, Some(uid), index));
        }
        timings.record(STAGE_COMMIT, started.elapsed());
        if let Some(job) = params.job_id {
            self.notifier.stage(job, STAGE_COMMIT, started.elapsed());
        }

        report.persistence_report = persistence;
        report.validation_report = validation;
        Ok(report)
    }
}
