//! Business validation over the bundle and the preheat.
//!
//! The engine treats the validator as a collaborator behind a trait; the
//! default implementation covers strategy/existence checks, reference
//! resolution (cache absence becomes a field-level error on the referencing
//! object), relationship shape and duplicate checks, and promotion of
//! rule-generated findings.

use regex::Regex;

use trellis_models::{
    Attribute, ErrorCode, ImportStrategy, Metadata, MetadataKind, TrackerType, ValidationItem,
    ValidationMode, ValidationReport,
};

use crate::bundle::ImportBundle;

pub trait Validator: Send + Sync {
    fn validate(&self, bundle: &ImportBundle) -> ValidationReport;
}

pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, bundle: &ImportBundle) -> ValidationReport {
        if bundle.params.validation_mode == ValidationMode::Skip {
            return ValidationReport::default();
        }
        Run::new(bundle).execute()
    }
}

struct Run<'a> {
    bundle: &'a ImportBundle,
    report: ValidationReport,
    fail_fast: bool,
}

impl<'a> Run<'a> {
    fn new(bundle: &'a ImportBundle) -> Self {
        Self {
            bundle,
            report: ValidationReport::default(),
            fail_fast: bundle.params.validation_mode == ValidationMode::FailFast,
        }
    }

    fn execute(mut self) -> ValidationReport {
        let strategy = self.bundle.params.strategy;

        for subject in &self.bundle.subjects {
            if self.stopped() {
                return self.report;
            }
            let uid = subject.uid.clone();
            self.check_strategy(
                strategy,
                TrackerType::Subject,
                &uid,
                ErrorCode::SubjectAlreadyExists,
                ErrorCode::SubjectNotFound,
            );
            if strategy.is_delete() {
                continue;
            }
            self.require_metadata(
                MetadataKind::SubjectType,
                &subject.subject_type,
                ErrorCode::SubjectTypeNotFound,
                TrackerType::Subject,
                &uid,
            );
            self.require_metadata(
                MetadataKind::OrgUnit,
                &subject.org_unit,
                ErrorCode::OrgUnitNotFound,
                TrackerType::Subject,
                &uid,
            );
            for attribute in &subject.attributes {
                self.require_metadata(
                    MetadataKind::AttributeType,
                    &attribute.attribute,
                    ErrorCode::AttributeTypeNotFound,
                    TrackerType::Subject,
                    &uid,
                );
                self.check_attribute_pattern(attribute, TrackerType::Subject, &uid);
            }
        }

        for enrollment in &self.bundle.enrollments {
            if self.stopped() {
                return self.report;
            }
            let uid = enrollment.uid.clone();
            self.check_strategy(
                strategy,
                TrackerType::Enrollment,
                &uid,
                ErrorCode::EnrollmentAlreadyExists,
                ErrorCode::EnrollmentNotFound,
            );
            if strategy.is_delete() {
                continue;
            }
            self.require_metadata(
                MetadataKind::Program,
                &enrollment.program,
                ErrorCode::ProgramNotFound,
                TrackerType::Enrollment,
                &uid,
            );
            self.require_metadata(
                MetadataKind::OrgUnit,
                &enrollment.org_unit,
                ErrorCode::OrgUnitNotFound,
                TrackerType::Enrollment,
                &uid,
            );
            self.require_parent(
                TrackerType::Subject,
                &enrollment.subject,
                ErrorCode::SubjectNotFound,
                TrackerType::Enrollment,
                &uid,
            );
            for attribute in &enrollment.attributes {
                self.require_metadata(
                    MetadataKind::AttributeType,
                    &attribute.attribute,
                    ErrorCode::AttributeTypeNotFound,
                    TrackerType::Enrollment,
                    &uid,
                );
                self.check_attribute_pattern(attribute, TrackerType::Enrollment, &uid);
            }
        }

        for event in &self.bundle.events {
            if self.stopped() {
                return self.report;
            }
            let uid = event.uid.clone();
            self.check_strategy(
                strategy,
                TrackerType::Event,
                &uid,
                ErrorCode::EventAlreadyExists,
                ErrorCode::EventNotFound,
            );
            if strategy.is_delete() {
                continue;
            }
            self.require_metadata(
                MetadataKind::Program,
                &event.program,
                ErrorCode::ProgramNotFound,
                TrackerType::Event,
                &uid,
            );
            self.require_metadata(
                MetadataKind::ProgramStage,
                &event.program_stage,
                ErrorCode::ProgramStageNotFound,
                TrackerType::Event,
                &uid,
            );
            self.require_metadata(
                MetadataKind::OrgUnit,
                &event.org_unit,
                ErrorCode::OrgUnitNotFound,
                TrackerType::Event,
                &uid,
            );
            self.require_parent(
                TrackerType::Enrollment,
                &event.enrollment,
                ErrorCode::EnrollmentNotFound,
                TrackerType::Event,
                &uid,
            );
            // Optional: resolved only when the payload names one.
            if !event.attribute_option_combo.is_empty()
                && self
                    .bundle
                    .preheat
                    .resolve(MetadataKind::CategoryOptionCombo, &event.attribute_option_combo)
                    .is_none()
            {
                self.error(
                    TrackerType::Event,
                    &uid,
                    ErrorCode::CategoryOptionComboNotFound,
                    format!(
                        "category option combo `{}` could not be resolved",
                        event.attribute_option_combo
                    ),
                );
            }
            for data_value in &event.data_values {
                self.require_metadata(
                    MetadataKind::DataElement,
                    &data_value.data_element,
                    ErrorCode::DataElementNotFound,
                    TrackerType::Event,
                    &uid,
                );
            }
        }

        for relationship in &self.bundle.relationships {
            if self.stopped() {
                return self.report;
            }
            let uid = relationship.uid.clone();
            self.check_strategy(
                strategy,
                TrackerType::Relationship,
                &uid,
                ErrorCode::RelationshipAlreadyExists,
                ErrorCode::RelationshipNotFound,
            );
            if strategy.is_delete() {
                continue;
            }
            self.require_metadata(
                MetadataKind::RelationshipType,
                &relationship.relationship_type,
                ErrorCode::RelationshipTypeNotFound,
                TrackerType::Relationship,
                &uid,
            );
            for (side, item) in [("from", &relationship.from), ("to", &relationship.to)] {
                match item.endpoint() {
                    None => self.error(
                        TrackerType::Relationship,
                        &uid,
                        ErrorCode::InvalidRelationshipEndpoint,
                        format!("`{}` must reference exactly one of subject, enrollment, event", side),
                    ),
                    Some((endpoint_type, endpoint_uid)) => {
                        let missing = match endpoint_type {
                            TrackerType::Subject => ErrorCode::SubjectNotFound,
                            TrackerType::Enrollment => ErrorCode::EnrollmentNotFound,
                            TrackerType::Event => ErrorCode::EventNotFound,
                            TrackerType::Relationship => ErrorCode::RelationshipNotFound,
                        };
                        self.require_parent(
                            endpoint_type,
                            endpoint_uid,
                            missing,
                            TrackerType::Relationship,
                            &uid,
                        );
                    }
                }
            }
            if self.bundle.preheat.is_duplicate_relationship(relationship) {
                self.error(
                    TrackerType::Relationship,
                    &uid,
                    ErrorCode::DuplicateRelationship,
                    "an equivalent relationship already exists".to_string(),
                );
            }
        }

        if !self.stopped() {
            self.report.merge(self.bundle.rule_findings());
        }
        self.report
    }

    fn stopped(&self) -> bool {
        self.fail_fast && self.report.has_errors()
    }

    fn error(
        &mut self,
        tracker_type: TrackerType,
        uid: &Option<String>,
        code: ErrorCode,
        message: String,
    ) {
        self.report
            .add_error(ValidationItem::new(tracker_type, uid.clone(), code, message));
    }

    /// Create must not find an existing object; update and delete must.
    fn check_strategy(
        &mut self,
        strategy: ImportStrategy,
        tracker_type: TrackerType,
        uid: &Option<String>,
        exists_code: ErrorCode,
        missing_code: ErrorCode,
    ) {
        let Some(id) = uid.as_deref() else { return };
        let exists = self.bundle.preheat.exists(tracker_type, id);
        match strategy {
            ImportStrategy::Create if exists => self.error(
                tracker_type,
                uid,
                exists_code,
                format!("{} `{}` already exists", tracker_type, id),
            ),
            ImportStrategy::Update | ImportStrategy::Delete if !exists => self.error(
                tracker_type,
                uid,
                missing_code,
                format!("{} `{}` does not exist", tracker_type, id),
            ),
            _ => {}
        }
    }

    /// A required metadata reference: empty is a missing field, unresolved is
    /// a not-found, both against the referencing object.
    fn require_metadata(
        &mut self,
        kind: MetadataKind,
        identifier: &str,
        missing_code: ErrorCode,
        tracker_type: TrackerType,
        uid: &Option<String>,
    ) {
        if identifier.is_empty() {
            self.error(
                tracker_type,
                uid,
                ErrorCode::MissingRequiredField,
                format!("{} reference is required", kind),
            );
        } else if self.bundle.preheat.resolve(kind, identifier).is_none() {
            // Report the reference the way the payload wrote it: qualified by
            // the scheme the run resolved it under.
            let reference = self
                .bundle
                .preheat
                .id_schemes()
                .param_for(kind)
                .to_identifier(identifier);
            self.error(
                tracker_type,
                uid,
                missing_code,
                format!("{} `{}` could not be resolved", kind, reference),
            );
        }
    }

    /// Supplied attribute values must match their definition's pattern,
    /// unless the run opted out. Unparseable patterns are a metadata problem
    /// and are skipped.
    fn check_attribute_pattern(
        &mut self,
        attribute: &Attribute,
        tracker_type: TrackerType,
        uid: &Option<String>,
    ) {
        if self.bundle.params.skip_pattern_validation {
            return;
        }
        let Some(value) = &attribute.value else { return };
        let Some(resolved) = self
            .bundle
            .preheat
            .resolve(MetadataKind::AttributeType, &attribute.attribute)
        else {
            return;
        };
        let Metadata::AttributeType(definition) = resolved.as_ref() else { return };
        let Some(pattern) = &definition.pattern else { return };
        let Ok(regex) = Regex::new(pattern) else { return };
        if !regex.is_match(value) {
            self.error(
                tracker_type,
                uid,
                ErrorCode::PatternMismatch,
                format!(
                    "value `{}` does not match the pattern of attribute `{}`",
                    value, attribute.attribute
                ),
            );
        }
    }

    /// A parent/endpoint entity must exist either in this payload or in the
    /// store (via the preheat).
    fn require_parent(
        &mut self,
        parent_type: TrackerType,
        parent_uid: &str,
        missing_code: ErrorCode,
        tracker_type: TrackerType,
        uid: &Option<String>,
    ) {
        if parent_uid.is_empty() {
            self.error(
                tracker_type,
                uid,
                ErrorCode::MissingRequiredField,
                format!("{} reference is required", parent_type),
            );
            return;
        }
        let in_payload = match parent_type {
            TrackerType::Subject => self
                .bundle
                .subjects
                .iter()
                .any(|s| s.uid.as_deref() == Some(parent_uid)),
            TrackerType::Enrollment => self.bundle.enrollment(parent_uid).is_some(),
            TrackerType::Event => self
                .bundle
                .events
                .iter()
                .any(|e| e.uid.as_deref() == Some(parent_uid)),
            TrackerType::Relationship => self
                .bundle
                .relationships
                .iter()
                .any(|r| r.uid.as_deref() == Some(parent_uid)),
        };
        if !in_payload && !self.bundle.preheat.exists(parent_type, parent_uid) {
            self.error(
                tracker_type,
                uid,
                missing_code,
                format!("{} `{}` is neither in the payload nor persisted", parent_type, parent_uid),
            );
        }
    }
}
