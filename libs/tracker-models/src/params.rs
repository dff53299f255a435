//! Run configuration for one import: strategy, atomicity, validation and
//! reporting behavior, identifier schemes, and the requesting principal.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::idscheme::{ConfigError, IdSchemeParams};

/// Whether the run persists changes or stops after validation (dry-run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    #[default]
    Commit,
    Validate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStrategy {
    Create,
    Update,
    #[default]
    CreateAndUpdate,
    Delete,
}

impl ImportStrategy {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// All-or-nothing vs. per-object failure semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomicMode {
    #[default]
    All,
    Object,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlushMode {
    Object,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationMode {
    #[default]
    Full,
    FailFast,
    Skip,
}

/// How much of the per-object outcome detail the final report keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportMode {
    Full,
    #[default]
    Errors,
    Warnings,
}

/// Capabilities checked on top of plain object-level authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    CascadeDeleteSubject,
    CascadeDeleteEnrollment,
}

impl Capability {
    /// The authority string a principal must hold for this capability.
    pub fn authority(&self) -> &'static str {
        match self {
            Self::CascadeDeleteSubject => "CASCADE_DELETE_SUBJECT",
            Self::CascadeDeleteEnrollment => "CASCADE_DELETE_ENROLLMENT",
        }
    }
}

/// The requesting user. `ALL` grants every authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Principal {
    pub username: String,
    pub authorities: BTreeSet<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), authorities: BTreeSet::new() }
    }

    pub fn with_authorities<I, S>(username: impl Into<String>, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            username: username.into(),
            authorities: authorities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_super(&self) -> bool {
        self.authorities.contains("ALL")
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.is_super() || self.authorities.contains(authority)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.has_authority(capability.authority())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportParams {
    pub import_mode: ImportMode,
    pub strategy: ImportStrategy,
    pub atomic_mode: AtomicMode,
    pub flush_mode: FlushMode,
    pub validation_mode: ValidationMode,
    pub report_mode: ReportMode,
    pub id_schemes: IdSchemeParams,
    pub skip_rule_engine: bool,
    pub skip_pattern_validation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}

impl ImportParams {
    /// Rejects malformed configuration before a run starts. This is the only
    /// failure a caller sees as an error instead of an error report.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.id_schemes.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idscheme::{IdScheme, IdSchemeParam};

    #[test]
    fn test_defaults_match_wire_defaults() {
        let params: ImportParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.import_mode, ImportMode::Commit);
        assert_eq!(params.strategy, ImportStrategy::CreateAndUpdate);
        assert_eq!(params.atomic_mode, AtomicMode::All);
        assert_eq!(params.validation_mode, ValidationMode::Full);
        assert_eq!(params.report_mode, ReportMode::Errors);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_surfaces_scheme_misconfiguration() {
        let mut params = ImportParams::default();
        params.id_schemes.org_unit = Some(IdSchemeParam {
            scheme: IdScheme::Attribute,
            attribute_uid: None,
        });
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_principal_capabilities() {
        let plain = Principal::new("maria");
        assert!(!plain.has_capability(Capability::CascadeDeleteSubject));

        let cascade = Principal::with_authorities("ines", ["CASCADE_DELETE_SUBJECT"]);
        assert!(cascade.has_capability(Capability::CascadeDeleteSubject));
        assert!(!cascade.has_capability(Capability::CascadeDeleteEnrollment));

        let root = Principal::with_authorities("admin", ["ALL"]);
        assert!(root.has_capability(Capability::CascadeDeleteEnrollment));
    }
}
