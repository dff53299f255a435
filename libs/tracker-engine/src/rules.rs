//! Business-rule evaluation: an opaque engine invoked once per enrollment and
//! event, producing effects that later stages merge into the bundle.
//!
//! This stage is a pure mapping step. It never mutates the cache or the
//! payload; the orchestrator applies its output afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use trellis_models::{Enrollment, Event};

use crate::bundle::ImportBundle;
use crate::preheat::Preheat;
use crate::Result;

/// One instruction produced by rule evaluation, keyed (by the caller) to the
/// enrollment or event it applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEffect {
    /// Set an enrollment attribute value before validation.
    AssignAttribute { attribute: String, value: Option<String> },
    /// Set an event data value before validation.
    AssignDataValue { data_element: String, value: Option<String> },
    /// A rule-generated validation error.
    Error { message: String },
    /// A rule-generated warning.
    Warning { message: String },
    /// Schedule a future visit for a stage; dispatched post-commit.
    ScheduleEvent { program_stage: String, due_at: DateTime<Utc> },
}

/// The opaque evaluator. Implementations get the resolved object, its sibling
/// events, and read access to the preheat.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn evaluate_enrollment(
        &self,
        enrollment: &Enrollment,
        events: &[Event],
        preheat: &Preheat,
    ) -> Result<Vec<RuleEffect>>;

    async fn evaluate_event(
        &self,
        event: &Event,
        enrollment: Option<&Enrollment>,
        siblings: &[Event],
        preheat: &Preheat,
    ) -> Result<Vec<RuleEffect>>;
}

/// Produces no effects. The default when no rule engine is wired in.
pub struct NoopRuleEngine;

#[async_trait]
impl RuleEngine for NoopRuleEngine {
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
        _: &Event,
        _: Option<&Enrollment>,
        _: &[Event],
        _: &Preheat,
    ) -> Result<Vec<RuleEffect>> {
        Ok(Vec::new())
    }
}

/// Assembles the evaluation context for each enrollment/event and collects
/// the engine's effects keyed by entity uid.
pub struct RuleService {
    engine: Arc<dyn RuleEngine>,
}

impl RuleService {
    pub fn new(engine: Arc<dyn RuleEngine>) -> Self {
        Self { engine }
    }

    pub async fn evaluate_enrollments(
        &self,
        bundle: &ImportBundle,
    ) -> Result<HashMap<String, Vec<RuleEffect>>> {
        let mut effects = HashMap::new();
        for enrollment in &bundle.enrollments {
            let Some(uid) = &enrollment.uid else { continue };
            let events = sibling_events(bundle, uid, None);
            let produced = self
                .engine
                .evaluate_enrollment(enrollment, &events, &bundle.preheat)
                .await?;
            if !produced.is_empty() {
                effects.insert(uid.clone(), produced);
            }
        }
        Ok(effects)
    }

    pub async fn evaluate_events(
        &self,
        bundle: &ImportBundle,
    ) -> Result<HashMap<String, Vec<RuleEffect>>> {
        let mut effects = HashMap::new();
        for event in &bundle.events {
            let Some(uid) = &event.uid else { continue };
            // In-payload enrollment takes precedence over the persisted one.
            let enrollment = bundle
                .enrollment(&event.enrollment)
                .or_else(|| bundle.preheat.enrollment(&event.enrollment));
            let siblings = sibling_events(bundle, &event.enrollment, Some(uid));
            let produced = self
                .engine
                .evaluate_event(event, enrollment, &siblings, &bundle.preheat)
                .await?;
            if !produced.is_empty() {
                effects.insert(uid.clone(), produced);
            }
        }
        Ok(effects)
    }
}

/// Union of the enrollment's persisted events and its payload events,
/// deduplicated by uid with the payload representation winning. `exclude`
/// drops the event under evaluation from its own sibling set.
fn sibling_events(bundle: &ImportBundle, enrollment_uid: &str, exclude: Option<&str>) -> Vec<Event> {
    let mut events: Vec<Event> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for event in bundle.preheat.events_of_enrollment(enrollment_uid) {
        let Some(uid) = &event.uid else { continue };
        position.insert(uid.clone(), events.len());
        events.push(event.clone());
    }

    for event in bundle.events.iter().filter(|e| e.enrollment == enrollment_uid) {
        let Some(uid) = &event.uid else { continue };
        match position.get(uid) {
            Some(&index) => events[index] = event.clone(),
            None => {
                position.insert(uid.clone(), events.len());
                events.push(event.clone());
            }
        }
    }

    if let Some(exclude) = exclude {
        events.retain(|e| e.uid.as_deref() != Some(exclude));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_models::{EventStatus, ImportParams, TrackerPayload};

    fn event(uid: &str, enrollment: &str, status: EventStatus) -> Event {
        Event {
            uid: Some(uid.into()),
            enrollment: enrollment.into(),
            status,
            ..Event::default()
        }
    }

    fn bundle_with(persisted: Vec<Event>, payload_events: Vec<Event>) -> ImportBundle {
        let mut preheat = Preheat::default();
        preheat.put_events(persisted);
        ImportBundle::new(
            ImportParams::default(),
            TrackerPayload { events: payload_events, ..TrackerPayload::default() },
            preheat,
        )
    }

    #[test]
    fn test_sibling_union_deduplicates_by_uid() {
        // "f" is persisted AND resent in the payload; "g" is payload-only.
        let bundle = bundle_with(
            vec![event("f", "en1", EventStatus::Active)],
            vec![
                event("e", "en1", EventStatus::Active),
                event("f", "en1", EventStatus::Completed),
                event("g", "en1", EventStatus::Active),
            ],
        );

        let siblings = sibling_events(&bundle, "en1", Some("e"));
        let uids: Vec<&str> = siblings.iter().filter_map(|e| e.uid.as_deref()).collect();
        assert_eq!(uids, vec!["f", "g"]);

        // the payload representation of "f" wins over the persisted one
        assert_eq!(siblings[0].status, EventStatus::Completed);
    }

    #[test]
    fn test_sibling_union_excludes_other_enrollments() {
        let bundle = bundle_with(
            vec![event("x", "en2", EventStatus::Active)],
            vec![event("e", "en1", EventStatus::Active)],
        );
        assert!(sibling_events(&bundle, "en1", Some("e")).is_empty());
    }
}
