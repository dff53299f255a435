//! The in-flight working set for one import run.
//!
//! The bundle owns the (mutable) payload lists, the run parameters, the
//! sealed preheat, and the staged rule effects. Preprocessing mutates it
//! (generated uids, rule-assigned values); commit reads it; it is discarded
//! once the report exists.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use trellis_models::{
    Enrollment, ErrorCode, ImportParams, TrackerPayload, TrackerType, ValidationItem,
    ValidationReport,
};

use crate::preheat::Preheat;
use crate::rules::RuleEffect;

pub struct ImportBundle {
    pub params: ImportParams,
    pub subjects: Vec<trellis_models::Subject>,
    pub enrollments: Vec<Enrollment>,
    pub events: Vec<trellis_models::Event>,
    pub relationships: Vec<trellis_models::Relationship>,
    pub preheat: Preheat,
    pub enrollment_effects: HashMap<String, Vec<RuleEffect>>,
    pub event_effects: HashMap<String, Vec<RuleEffect>>,
}

impl ImportBundle {
    pub fn new(params: ImportParams, payload: TrackerPayload, preheat: Preheat) -> Self {
        Self {
            params,
            subjects: payload.subjects,
            enrollments: payload.enrollments,
            events: payload.events,
            relationships: payload.relationships,
            preheat,
            enrollment_effects: HashMap::new(),
            event_effects: HashMap::new(),
        }
    }

    pub fn count_of(&self, tracker_type: TrackerType) -> usize {
        match tracker_type {
            TrackerType::Subject => self.subjects.len(),
            TrackerType::Enrollment => self.enrollments.len(),
            TrackerType::Event => self.events.len(),
            TrackerType::Relationship => self.relationships.len(),
        }
    }

    pub fn payload_counts(&self) -> BTreeMap<TrackerType, usize> {
        TrackerType::ORDERED
            .iter()
            .map(|t| (*t, self.count_of(*t)))
            .collect()
    }

    /// The payload's own version of an enrollment, if present.
    pub fn enrollment(&self, uid: &str) -> Option<&Enrollment> {
        self.enrollments.iter().find(|e| e.uid.as_deref() == Some(uid))
    }

    /// Give every payload object without a client-supplied uid a generated
    /// one, so effects, validation findings and report entries all key
    /// consistently.
    pub fn assign_missing_uids(&mut self) {
        for uid in self
            .subjects
            .iter_mut()
            .map(|s| &mut s.uid)
            .chain(self.enrollments.iter_mut().map(|e| &mut e.uid))
            .chain(self.events.iter_mut().map(|e| &mut e.uid))
            .chain(self.relationships.iter_mut().map(|r| &mut r.uid))
        {
            if uid.is_none() {
                *uid = Some(Uuid::new_v4().simple().to_string());
            }
        }
    }

    /// Merge rule effects: value assignments are applied to the payload in
    /// place, everything else stays staged for validation and commit.
    pub fn apply_rule_effects(
        &mut self,
        enrollment_effects: HashMap<String, Vec<RuleEffect>>,
        event_effects: HashMap<String, Vec<RuleEffect>>,
    ) {
        for (uid, effects) in &enrollment_effects {
            let Some(enrollment) = self
                .enrollments
                .iter_mut()
                .find(|e| e.uid.as_deref() == Some(uid))
            else {
                continue;
            };
            for effect in effects {
                if let RuleEffect::AssignAttribute { attribute, value } = effect {
                    upsert_attribute(&mut enrollment.attributes, attribute, value.clone());
                }
            }
        }

        for (uid, effects) in &event_effects {
            let Some(event) = self.events.iter_mut().find(|e| e.uid.as_deref() == Some(uid))
            else {
                continue;
            };
            for effect in effects {
                if let RuleEffect::AssignDataValue { data_element, value } = effect {
                    upsert_data_value(&mut event.data_values, data_element, value.clone());
                }
            }
        }

        self.enrollment_effects = enrollment_effects;
        self.event_effects = event_effects;
    }

    /// Rule-generated errors and warnings, as validation findings.
    pub fn rule_findings(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let staged = self
            .enrollment_effects
            .iter()
            .map(|(uid, effects)| (TrackerType::Enrollment, uid, effects))
            .chain(
                self.event_effects
                    .iter()
                    .map(|(uid, effects)| (TrackerType::Event, uid, effects)),
            );
        for (tracker_type, uid, effects) in staged {
            for effect in effects {
                match effect {
                    RuleEffect::Error { message } => report.add_error(ValidationItem::new(
                        tracker_type,
                        Some(uid.clone()),
                        ErrorCode::RuleError,
                        message.clone(),
                    )),
                    RuleEffect::Warning { message } => report.add_warning(ValidationItem::new(
                        tracker_type,
                        Some(uid.clone()),
                        ErrorCode::RuleWarning,
                        message.clone(),
                    )),
                    _ => {}
                }
            }
        }
        report
    }

    /// Scheduling instructions staged for post-commit dispatch.
    pub fn schedule_effects(&self) -> Vec<(TrackerType, String, RuleEffect)> {
        let staged = self
            .enrollment_effects
            .iter()
            .map(|(uid, effects)| (TrackerType::Enrollment, uid, effects))
            .chain(
                self.event_effects
                    .iter()
                    .map(|(uid, effects)| (TrackerType::Event, uid, effects)),
            );
        staged
            .flat_map(|(tracker_type, uid, effects)| {
                effects
                    .iter()
                    .filter(|e| matches!(e, RuleEffect::ScheduleEvent { .. }))
                    .map(move |e| (tracker_type, uid.clone(), e.clone()))
            })
            .collect()
    }

    /// Remove objects that failed validation (per-object atomic mode) and
    /// return what was removed, with original payload positions, for the
    /// ignored accounting.
    pub fn strip_invalid(
        &mut self,
        validation: &ValidationReport,
    ) -> Vec<(TrackerType, String, usize)> {
        let mut removed = Vec::new();
        for tracker_type in TrackerType::ORDERED {
            let invalid = validation.invalid_uids(tracker_type);
            if invalid.is_empty() {
                continue;
            }
            let is_invalid =
                |uid: &Option<String>| uid.as_ref().is_some_and(|u| invalid.contains(u));
            match tracker_type {
                TrackerType::Subject => {
                    strip(&mut self.subjects, |s| is_invalid(&s.uid), |s| &s.uid, tracker_type, &mut removed)
                }
                TrackerType::Enrollment => {
                    strip(&mut self.enrollments, |e| is_invalid(&e.uid), |e| &e.uid, tracker_type, &mut removed)
                }
                TrackerType::Event => {
                    strip(&mut self.events, |e| is_invalid(&e.uid), |e| &e.uid, tracker_type, &mut removed)
                }
                TrackerType::Relationship => {
                    strip(&mut self.relationships, |r| is_invalid(&r.uid), |r| &r.uid, tracker_type, &mut removed)
                }
            }
        }
        removed
    }
}

fn strip<T>(
    objects: &mut Vec<T>,
    is_invalid: impl Fn(&T) -> bool,
    uid_of: impl Fn(&T) -> &Option<String>,
    tracker_type: TrackerType,
    removed: &mut Vec<(TrackerType, String, usize)>,
) {
    let mut index = 0;
    objects.retain(|object| {
        let keep = !is_invalid(object);
        if !keep {
            if let Some(uid) = uid_of(object) {
                removed.push((tracker_type, uid.clone(), index));
            }
        }
        index += 1;
        keep
    });
}

fn upsert_attribute(
    attributes: &mut Vec<trellis_models::Attribute>,
    attribute: &str,
    value: Option<String>,
) {
    match attributes.iter_mut().find(|a| a.attribute == attribute) {
        Some(existing) => existing.value = value,
        None => attributes.push(trellis_models::Attribute {
            attribute: attribute.to_string(),
            value,
        }),
    }
}

fn upsert_data_value(
    data_values: &mut Vec<trellis_models::DataValue>,
    data_element: &str,
    value: Option<String>,
) {
    match data_values.iter_mut().find(|dv| dv.data_element == data_element) {
        Some(existing) => existing.value = value,
        None => data_values.push(trellis_models::DataValue {
            data_element: data_element.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_models::{DataValue, Event};

    fn bundle_with_event(uid: &str) -> ImportBundle {
        ImportBundle::new(
            ImportParams::default(),
            TrackerPayload {
                events: vec![Event {
                    uid: Some(uid.into()),
                    enrollment: "en1".into(),
                    data_values: vec![DataValue {
                        data_element: "de1".into(),
                        value: Some("1".into()),
                    }],
                    ..Event::default()
                }],
                ..TrackerPayload::default()
            },
            Preheat::default(),
        )
    }

    #[test]
    fn test_assign_missing_uids_is_stable_for_supplied_ones() {
        let mut bundle = bundle_with_event("ev1");
        bundle.subjects.push(trellis_models::Subject::default());
        bundle.assign_missing_uids();

        assert_eq!(bundle.events[0].uid.as_deref(), Some("ev1"));
        assert!(bundle.subjects[0].uid.is_some());
    }

    #[test]
    fn test_assignment_effects_mutate_payload_in_place() {
        let mut bundle = bundle_with_event("ev1");
        bundle.apply_rule_effects(
            HashMap::new(),
            HashMap::from([(
                "ev1".to_string(),
                vec![
                    RuleEffect::AssignDataValue {
                        data_element: "de1".into(),
                        value: Some("99".into()),
                    },
                    RuleEffect::AssignDataValue {
                        data_element: "de2".into(),
                        value: Some("7".into()),
                    },
                    RuleEffect::Warning { message: "low value".into() },
                ],
            )]),
        );

        let values = &bundle.events[0].data_values;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value.as_deref(), Some("99"));
        assert_eq!(values[1].data_element, "de2");

        let findings = bundle.rule_findings();
        assert!(findings.errors.is_empty());
        assert_eq!(findings.warnings.len(), 1);
        assert_eq!(findings.warnings[0].uid.as_deref(), Some("ev1"));
    }

    #[test]
    fn test_strip_invalid_keeps_original_indexes() {
        let mut bundle = ImportBundle::new(
            ImportParams::default(),
            TrackerPayload {
                events: vec![
                    Event { uid: Some("ev1".into()), ..Event::default() },
                    Event { uid: Some("ev2".into()), ..Event::default() },
                    Event { uid: Some("ev3".into()), ..Event::default() },
                ],
                ..TrackerPayload::default()
            },
            Preheat::default(),
        );

        let mut validation = ValidationReport::default();
        validation.add_error(ValidationItem::new(
            TrackerType::Event,
            Some("ev2".into()),
            ErrorCode::EventNotFound,
            "event not found",
        ));

        let removed = bundle.strip_invalid(&validation);
        assert_eq!(removed, vec![(TrackerType::Event, "ev2".to_string(), 1)]);
        assert_eq!(bundle.events.len(), 2);
    }
}
