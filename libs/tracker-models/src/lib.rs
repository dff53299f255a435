//! Domain, configuration and report types for the trellis import engine.
//!
//! The import pipeline in `trellis-engine` works on three families of types:
//!
//! - **payload** - the inbound document: subjects, enrollments, events and
//!   relationships, in their camelCase wire form;
//! - **metadata** - the referenced catalogue objects (programs, stages,
//!   org units, ...) resolved during preheating, plus the identifier-scheme
//!   machinery that maps between objects and external identifier strings;
//! - **report** - the structured outcome every run produces, whether it
//!   committed, was rejected atomically, or failed outright.
//!
//! Everything here is plain data: no I/O, no engine logic.

pub mod idscheme;
pub mod metadata;
pub mod params;
pub mod payload;
pub mod report;

pub use idscheme::{ConfigError, IdScheme, IdSchemeParam, IdSchemeParams, MetadataIdentifier};
pub use metadata::{Metadata, MetadataKind};
pub use params::{
    AtomicMode, Capability, FlushMode, ImportMode, ImportParams, ImportStrategy, Principal,
    ReportMode, ValidationMode,
};
pub use payload::{
    Attribute, DataValue, Enrollment, EnrollmentStatus, Event, EventStatus, Relationship,
    RelationshipItem, Subject, TrackerPayload, TrackerType,
};
pub use report::{
    ErrorCode, ImportCount, ImportReport, ImportStatus, ObjectReport, PersistenceReport, Timings,
    TypeReport, ValidationItem, ValidationReport,
};
