//! Cascading deletion: children before parents, authorization re-checked at
//! every level, every outcome recorded.
//!
//! Deletion is not transactional across levels. A denied parent leaves the
//! attempted child deletions in place; each level's outcome stands on its
//! own in the report.

use std::collections::HashSet;
use std::sync::Arc;

use trellis_models::{
    Capability, ErrorCode, ObjectReport, PersistenceReport, Principal, TrackerType,
    ValidationItem,
};

use crate::bundle::ImportBundle;
use crate::store::{AccessControl, TrackerStore};
use crate::Result;

pub struct DeletionService {
    store: Arc<dyn TrackerStore>,
    access: Arc<dyn AccessControl>,
}

impl DeletionService {
    pub fn new(store: Arc<dyn TrackerStore>, access: Arc<dyn AccessControl>) -> Self {
        Self { store, access }
    }

    /// Delete everything the bundle lists, one entry point per type.
    pub async fn delete(&self, bundle: &ImportBundle) -> Result<PersistenceReport> {
        let mut report = PersistenceReport::default();
        self.delete_subjects(bundle, &mut report).await?;
        self.delete_enrollments(bundle, &mut report).await?;
        self.delete_events(bundle, &mut report).await?;
        self.delete_relationships(bundle, &mut report).await?;
        Ok(report)
    }

    pub async fn delete_subjects(
        &self,
        bundle: &ImportBundle,
        report: &mut PersistenceReport,
    ) -> Result<()> {
        let principal = bundle.params.principal.as_ref();
        for (index, subject) in bundle.subjects.iter().enumerate() {
            let Some(uid) = subject.uid.as_deref() else { continue };
            if !self.is_live(TrackerType::Subject, uid).await? {
                ignored(
                    report,
                    TrackerType::Subject,
                    uid,
                    index,
                    vec![not_found(TrackerType::Subject, uid, ErrorCode::SubjectNotFound)],
                );
                continue;
            }

            let enrollments = self.store.enrollments_of_subject(uid).await?;
            let mut reasons = self.delete_reasons(principal, TrackerType::Subject, uid);
            if let Some(principal) = principal {
                // Live children demand the cascade capability on top of plain
                // delete authorization; lacking it is its own error.
                if !enrollments.is_empty()
                    && !self.access.has_capability(principal, Capability::CascadeDeleteSubject)
                {
                    reasons.push(missing_cascade(
                        TrackerType::Subject,
                        uid,
                        Capability::CascadeDeleteSubject,
                    ));
                }
            }
            if !reasons.is_empty() {
                ignored(report, TrackerType::Subject, uid, index, reasons);
                continue;
            }

            for enrollment in &enrollments {
                if let Some(enrollment_uid) = enrollment.uid.as_deref() {
                    self.cascade_enrollment(bundle, enrollment_uid, None, report).await?;
                }
            }
            self.store.delete_subject(uid).await?;
            deleted(report, TrackerType::Subject, uid, index);
        }
        Ok(())
    }

    pub async fn delete_enrollments(
        &self,
        bundle: &ImportBundle,
        report: &mut PersistenceReport,
    ) -> Result<()> {
        for (index, enrollment) in bundle.enrollments.iter().enumerate() {
            let Some(uid) = enrollment.uid.as_deref() else { continue };
            if !self.is_live(TrackerType::Enrollment, uid).await? {
                ignored(
                    report,
                    TrackerType::Enrollment,
                    uid,
                    index,
                    vec![not_found(TrackerType::Enrollment, uid, ErrorCode::EnrollmentNotFound)],
                );
                continue;
            }
            self.cascade_enrollment(bundle, uid, Some(index), report).await?;
        }
        Ok(())
    }

    pub async fn delete_events(
        &self,
        bundle: &ImportBundle,
        report: &mut PersistenceReport,
    ) -> Result<()> {
        let principal = bundle.params.principal.as_ref();
        for (index, event) in bundle.events.iter().enumerate() {
            let Some(uid) = event.uid.as_deref() else { continue };
            if !self.is_live(TrackerType::Event, uid).await? {
                ignored(
                    report,
                    TrackerType::Event,
                    uid,
                    index,
                    vec![not_found(TrackerType::Event, uid, ErrorCode::EventNotFound)],
                );
                continue;
            }
            self.delete_event(principal, uid, Some(index), report).await?;
        }
        Ok(())
    }

    /// Relationships have no children: no cascade, and write authorization on
    /// the relationship itself is enough.
    pub async fn delete_relationships(
        &self,
        bundle: &ImportBundle,
        report: &mut PersistenceReport,
    ) -> Result<()> {
        let principal = bundle.params.principal.as_ref();
        for (index, relationship) in bundle.relationships.iter().enumerate() {
            let Some(uid) = relationship.uid.as_deref() else { continue };
            if !self.is_live(TrackerType::Relationship, uid).await? {
                ignored(
                    report,
                    TrackerType::Relationship,
                    uid,
                    index,
                    vec![not_found(
                        TrackerType::Relationship,
                        uid,
                        ErrorCode::RelationshipNotFound,
                    )],
                );
                continue;
            }
            let reasons: Vec<ValidationItem> = principal
                .map(|p| {
                    self.access
                        .can_write(p, TrackerType::Relationship, uid)
                        .into_iter()
                        .map(|reason| {
                            ValidationItem::new(
                                TrackerType::Relationship,
                                Some(uid.to_string()),
                                ErrorCode::NoWriteAccess,
                                reason,
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            if !reasons.is_empty() {
                ignored(report, TrackerType::Relationship, uid, index, reasons);
                continue;
            }
            self.store.delete_relationship(uid).await?;
            deleted(report, TrackerType::Relationship, uid, index);
        }
        Ok(())
    }

    /// Delete one live enrollment: its live events first, then itself.
    /// `payload_index` is set when the enrollment was listed in the payload;
    /// cascaded deletions take their position from the report.
    async fn cascade_enrollment(
        &self,
        bundle: &ImportBundle,
        uid: &str,
        payload_index: Option<usize>,
        report: &mut PersistenceReport,
    ) -> Result<()> {
        let principal = bundle.params.principal.as_ref();
        let events = self.store.events_of_enrollment(uid).await?;

        let mut reasons = self.delete_reasons(principal, TrackerType::Enrollment, uid);
        if let Some(principal) = principal {
            if !events.is_empty()
                && !self.access.has_capability(principal, Capability::CascadeDeleteEnrollment)
            {
                reasons.push(missing_cascade(
                    TrackerType::Enrollment,
                    uid,
                    Capability::CascadeDeleteEnrollment,
                ));
            }
        }
        if !reasons.is_empty() {
            let index = payload_index
                .unwrap_or_else(|| next_position(report, TrackerType::Enrollment));
            ignored(report, TrackerType::Enrollment, uid, index, reasons);
            return Ok(());
        }

        for event in &events {
            if let Some(event_uid) = event.uid.as_deref() {
                self.delete_event(principal, event_uid, None, report).await?;
            }
        }
        self.store.delete_enrollment(uid).await?;
        let index =
            payload_index.unwrap_or_else(|| next_position(report, TrackerType::Enrollment));
        deleted(report, TrackerType::Enrollment, uid, index);
        Ok(())
    }

    async fn delete_event(
        &self,
        principal: Option<&Principal>,
        uid: &str,
        payload_index: Option<usize>,
        report: &mut PersistenceReport,
    ) -> Result<()> {
        let reasons = self.delete_reasons(principal, TrackerType::Event, uid);
        let index = payload_index.unwrap_or_else(|| next_position(report, TrackerType::Event));
        if !reasons.is_empty() {
            ignored(report, TrackerType::Event, uid, index, reasons);
            return Ok(());
        }
        self.store.delete_event(uid).await?;
        deleted(report, TrackerType::Event, uid, index);
        Ok(())
    }

    fn delete_reasons(
        &self,
        principal: Option<&Principal>,
        tracker_type: TrackerType,
        uid: &str,
    ) -> Vec<ValidationItem> {
        let Some(principal) = principal else { return Vec::new() };
        self.access
            .can_delete(principal, tracker_type, uid)
            .into_iter()
            .map(|reason| {
                ValidationItem::new(
                    tracker_type,
                    Some(uid.to_string()),
                    ErrorCode::NoDeleteAccess,
                    reason,
                )
            })
            .collect()
    }

    async fn is_live(&self, tracker_type: TrackerType, uid: &str) -> Result<bool> {
        let uids = HashSet::from([uid.to_string()]);
        let found = match tracker_type {
            TrackerType::Subject => !self.store.load_subjects(&uids).await?.is_empty(),
            TrackerType::Enrollment => !self.store.load_enrollments(&uids).await?.is_empty(),
            TrackerType::Event => !self.store.load_events(&uids).await?.is_empty(),
            TrackerType::Relationship => !self.store.load_relationships(&uids).await?.is_empty(),
        };
        Ok(found)
    }
}

fn next_position(report: &mut PersistenceReport, tracker_type: TrackerType) -> usize {
    report.type_report(tracker_type).object_reports.len()
}

fn not_found(tracker_type: TrackerType, uid: &str, code: ErrorCode) -> ValidationItem {
    ValidationItem::new(
        tracker_type,
        Some(uid.to_string()),
        code,
        format!("{} `{}` does not exist", tracker_type, uid),
    )
}

fn missing_cascade(tracker_type: TrackerType, uid: &str, capability: Capability) -> ValidationItem {
    ValidationItem::new(
        tracker_type,
        Some(uid.to_string()),
        ErrorCode::NoCascadeDeleteAuthority,
        format!(
            "{} `{}` has non-deleted children; deleting it requires the {} authority",
            tracker_type,
            uid,
            capability.authority()
        ),
    )
}

fn deleted(report: &mut PersistenceReport, tracker_type: TrackerType, uid: &str, index: usize) {
    let type_report = report.type_report(tracker_type);
    type_report.stats.deleted += 1;
    type_report.add_object_report(ObjectReport::new(tracker_type, Some(uid.to_string()), index));
}

fn ignored(
    report: &mut PersistenceReport,
    tracker_type: TrackerType,
    uid: &str,
    index: usize,
    reasons: Vec<ValidationItem>,
) {
    tracing::debug!(tracker_type = %tracker_type, uid = %uid, "deletion skipped");
    let type_report = report.type_report(tracker_type);
    type_report.stats.ignored += 1;
    let mut object_report = ObjectReport::new(tracker_type, Some(uid.to_string()), index);
    object_report.errors = reasons;
    type_report.add_object_report(object_report);
}
