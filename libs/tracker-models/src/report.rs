//! The structured outcome of an import run.
//!
//! Reports are built incrementally by every stage: payload counts up front,
//! validation findings per object, persistence/deletion counts per type, and
//! stage timings at the end. A failed object is recorded, never dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::params::ReportMode;
use crate::payload::TrackerType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    #[default]
    Ok,
    Warning,
    ValidationError,
    Error,
}

/// Machine-readable codes carried by every error/warning entry. The numeric
/// wire codes are stable; the variant names are for the code reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NoWriteAccess,
    NoDeleteAccess,
    NoCascadeDeleteAuthority,
    SubjectNotFound,
    EnrollmentNotFound,
    EventNotFound,
    RelationshipNotFound,
    SubjectAlreadyExists,
    EnrollmentAlreadyExists,
    EventAlreadyExists,
    RelationshipAlreadyExists,
    SubjectTypeNotFound,
    ProgramNotFound,
    ProgramStageNotFound,
    OrgUnitNotFound,
    DataElementNotFound,
    AttributeTypeNotFound,
    RelationshipTypeNotFound,
    CategoryOptionComboNotFound,
    MissingRequiredField,
    PatternMismatch,
    InvalidRelationshipEndpoint,
    DuplicateRelationship,
    RuleError,
    RuleWarning,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWriteAccess => "E1000",
            Self::NoDeleteAccess => "E1100",
            Self::NoCascadeDeleteAuthority => "E1103",
            Self::SubjectNotFound => "E1063",
            Self::EnrollmentNotFound => "E1081",
            Self::EventNotFound => "E1032",
            Self::RelationshipNotFound => "E4005",
            Self::SubjectAlreadyExists => "E1002",
            Self::EnrollmentAlreadyExists => "E1080",
            Self::EventAlreadyExists => "E1030",
            Self::RelationshipAlreadyExists => "E4015",
            Self::SubjectTypeNotFound => "E1005",
            Self::ProgramNotFound => "E1069",
            Self::ProgramStageNotFound => "E1013",
            Self::OrgUnitNotFound => "E1049",
            Self::DataElementNotFound => "E1087",
            Self::AttributeTypeNotFound => "E1006",
            Self::RelationshipTypeNotFound => "E4009",
            Self::CategoryOptionComboNotFound => "E1115",
            Self::MissingRequiredField => "E1121",
            Self::PatternMismatch => "E1084",
            Self::InvalidRelationshipEndpoint => "E4007",
            Self::DuplicateRelationship => "E4018",
            Self::RuleError => "E1300",
            Self::RuleWarning => "E1301",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One field-level finding, tied to the object it was raised for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationItem {
    pub tracker_type: TrackerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationItem {
    pub fn new(
        tracker_type: TrackerType,
        uid: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self { tracker_type, uid, code, message: message.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationItem>,
    pub warnings: Vec<ValidationItem>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add_error(&mut self, item: ValidationItem) {
        self.errors.push(item);
    }

    pub fn add_warning(&mut self, item: ValidationItem) {
        self.warnings.push(item);
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Uids of objects of the given type with at least one error.
    pub fn invalid_uids(&self, tracker_type: TrackerType) -> Vec<String> {
        let mut uids: Vec<String> = self
            .errors
            .iter()
            .filter(|e| e.tracker_type == tracker_type)
            .filter_map(|e| e.uid.clone())
            .collect();
        uids.dedup();
        uids
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCount {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub ignored: u64,
}

impl ImportCount {
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.deleted + self.ignored
    }

    pub fn merge(&mut self, other: &ImportCount) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.ignored += other.ignored;
    }
}

/// Outcome for a single payload object: its position, resolved uid, and
/// whatever findings were recorded against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReport {
    pub tracker_type: TrackerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub index: usize,
    #[serde(default)]
    pub errors: Vec<ValidationItem>,
}

impl ObjectReport {
    pub fn new(tracker_type: TrackerType, uid: Option<String>, index: usize) -> Self {
        Self { tracker_type, uid, index, errors: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReport {
    pub tracker_type: TrackerType,
    pub stats: ImportCount,
    #[serde(default)]
    pub object_reports: Vec<ObjectReport>,
}

impl TypeReport {
    pub fn new(tracker_type: TrackerType) -> Self {
        Self { tracker_type, stats: ImportCount::default(), object_reports: Vec::new() }
    }

    pub fn add_object_report(&mut self, report: ObjectReport) {
        self.object_reports.push(report);
    }
}

/// Per-type outcome tree for the commit or delete stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceReport {
    pub type_reports: BTreeMap<TrackerType, TypeReport>,
}

impl PersistenceReport {
    pub fn type_report(&mut self, tracker_type: TrackerType) -> &mut TypeReport {
        self.type_reports
            .entry(tracker_type)
            .or_insert_with(|| TypeReport::new(tracker_type))
    }

    pub fn stats(&self) -> ImportCount {
        let mut total = ImportCount::default();
        for report in self.type_reports.values() {
            total.merge(&report.stats);
        }
        total
    }

    pub fn merge(&mut self, other: PersistenceReport) {
        for (tracker_type, report) in other.type_reports {
            let target = self.type_report(tracker_type);
            target.stats.merge(&report.stats);
            target.object_reports.extend(report.object_reports);
        }
    }
}

/// Wall-clock spent per pipeline stage, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub stages: BTreeMap<String, u64>,
}

impl Timings {
    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        self.stages.insert(stage.to_string(), elapsed.as_millis() as u64);
    }

    pub fn get(&self, stage: &str) -> Option<Duration> {
        self.stages.get(stage).map(|ms| Duration::from_millis(*ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportReport {
    pub status: ImportStatus,
    /// Objects submitted per type, computed up front and kept on every path.
    pub payload_counts: BTreeMap<TrackerType, usize>,
    pub stats: ImportCount,
    pub persistence_report: PersistenceReport,
    pub validation_report: ValidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportReport {
    /// Derives the overall status from what the stages recorded. A top-level
    /// message always means the run itself failed.
    pub fn resolve_status(&mut self) {
        self.status = if self.message.is_some() {
            ImportStatus::Error
        } else if self.validation_report.has_errors() {
            ImportStatus::ValidationError
        } else if self.validation_report.has_warnings() {
            ImportStatus::Warning
        } else {
            ImportStatus::Ok
        };
        self.stats = self.persistence_report.stats();
    }

    /// Applies the requested report verbosity. `Full` keeps everything,
    /// `Warnings` drops timings, `Errors` also drops warnings.
    pub fn filtered(mut self, mode: ReportMode) -> Self {
        match mode {
            ReportMode::Full => {}
            ReportMode::Warnings => {
                self.timings = None;
            }
            ReportMode::Errors => {
                self.timings = None;
                self.validation_report.warnings.clear();
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_item(uid: &str) -> ValidationItem {
        ValidationItem::new(
            TrackerType::Subject,
            Some(uid.to_string()),
            ErrorCode::SubjectNotFound,
            "subject not found",
        )
    }

    #[test]
    fn test_status_resolution() {
        let mut report = ImportReport::default();
        report.resolve_status();
        assert_eq!(report.status, ImportStatus::Ok);

        report.validation_report.add_warning(ValidationItem::new(
            TrackerType::Event,
            None,
            ErrorCode::RuleWarning,
            "rule warning",
        ));
        report.resolve_status();
        assert_eq!(report.status, ImportStatus::Warning);

        report.validation_report.add_error(error_item("s1"));
        report.resolve_status();
        assert_eq!(report.status, ImportStatus::ValidationError);

        report.message = Some("store unavailable".into());
        report.resolve_status();
        assert_eq!(report.status, ImportStatus::Error);
    }

    #[test]
    fn test_report_mode_filtering() {
        let mut report = ImportReport::default();
        report.timings = Some(Timings::default());
        report.validation_report.add_warning(ValidationItem::new(
            TrackerType::Event,
            None,
            ErrorCode::RuleWarning,
            "w",
        ));

        let errors_only = report.clone().filtered(ReportMode::Errors);
        assert!(errors_only.timings.is_none());
        assert!(errors_only.validation_report.warnings.is_empty());

        let warnings = report.clone().filtered(ReportMode::Warnings);
        assert!(warnings.timings.is_none());
        assert_eq!(warnings.validation_report.warnings.len(), 1);

        let full = report.filtered(ReportMode::Full);
        assert!(full.timings.is_some());
    }

    #[test]
    fn test_timings_round_to_millis() {
        let mut timings = Timings::default();
        timings.record("validation", Duration::from_micros(2500));
        assert_eq!(timings.get("validation"), Some(Duration::from_millis(2)));
        assert_eq!(timings.get("commit"), None);
    }

    #[test]
    fn test_persistence_stats_aggregate() {
        let mut persistence = PersistenceReport::default();
        persistence.type_report(TrackerType::Subject).stats.created = 2;
        persistence.type_report(TrackerType::Event).stats.ignored = 1;

        let stats = persistence.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_invalid_uids_by_type() {
        let mut validation = ValidationReport::default();
        validation.add_error(error_item("s1"));
        validation.add_error(error_item("s1"));
        validation.add_error(ValidationItem::new(
            TrackerType::Event,
            Some("ev1".into()),
            ErrorCode::EventNotFound,
            "event not found",
        ));

        assert_eq!(validation.invalid_uids(TrackerType::Subject), vec!["s1".to_string()]);
        assert_eq!(validation.invalid_uids(TrackerType::Event), vec!["ev1".to_string()]);
    }
}
