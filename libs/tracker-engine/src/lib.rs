//! Bulk import pipeline for tracker payloads.
//!
//! One import run flows through a fixed sequence of stages:
//!
//! ```text
//! payload → collect identifiers → preheat (bulk load) → rule evaluation
//!         → validation → commit | cascading delete → report
//! ```
//!
//! The [`ImportService`] drives the sequence and owns the seams to the
//! outside world, all passed in explicitly:
//!
//! - [`TrackerStore`] - metadata/domain persistence (bulk load, save, delete)
//! - [`RuleEngine`] - opaque business-rule evaluator producing [`RuleEffect`]s
//! - [`Validator`] - business validation over the bundle and the preheat
//! - [`AccessControl`] - authorization checks returning reasons, not errors
//! - [`ProgressSink`] - fire-and-forget job progress notifications
//! - [`SideEffectDispatcher`] - consumer of post-commit side-effect bundles
//!
//! Stages never fail the run for expected conditions: unresolved references
//! and per-object problems end up in the report. An `Err` escaping a stage is
//! a whole-run failure, converted by the service into an error report. The
//! only error a caller ever gets back directly is a malformed configuration,
//! rejected before the run starts.

pub mod bundle;
pub mod commit;
pub mod deletion;
pub mod notify;
pub mod preheat;
pub mod rules;
pub mod service;
pub mod store;
pub mod validation;

use thiserror::Error;

pub use bundle::ImportBundle;
pub use commit::{CommitService, LoggingDispatcher, SideEffectBundle, SideEffectDispatcher};
pub use deletion::DeletionService;
pub use notify::{NullSink, ProgressSink, TracingSink};
pub use preheat::{collector, CollectedIds, Preheat, PreheatService};
pub use rules::{NoopRuleEngine, RuleEffect, RuleEngine, RuleService};
pub use service::ImportService;
pub use store::{AccessControl, Catalog, InMemoryStore, OpenAccess, TrackerStore};
pub use validation::{DefaultValidator, Validator};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] trellis_models::ConfigError),
    #[error("store error: {0}")]
    Store(String),
    #[error("rule engine error: {0}")]
    RuleEngine(String),
}

pub type Result<T> = std::result::Result<T, Error>;
