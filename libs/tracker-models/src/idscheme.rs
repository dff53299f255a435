//! Identifier schemes: the rules mapping metadata objects to the external
//! identifier strings a payload refers to them by.
//!
//! A single run may mix schemes per metadata kind (e.g. programs by code,
//! data elements by a custom attribute value). `Auto` is a request-time
//! convenience that resolves by uid first, falling back to code; it is
//! normalized to a concrete scheme before any cache key is built.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::{Metadata, MetadataKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("identifier scheme ATTRIBUTE requires a non-empty attribute uid")]
    MissingAttributeUid,
    #[error("identifier scheme {0:?} does not take an attribute uid")]
    UnexpectedAttributeUid(IdScheme),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdScheme {
    #[default]
    Uid,
    Code,
    Name,
    Attribute,
    Auto,
}

/// An identifier scheme plus the attribute uid it needs when the scheme is
/// attribute-based. Constructing an attribute param without a uid is a
/// configuration error, surfaced before any payload processing starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdSchemeParam {
    pub scheme: IdScheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_uid: Option<String>,
}

impl Default for IdSchemeParam {
    fn default() -> Self {
        Self::uid()
    }
}

impl IdSchemeParam {
    pub fn uid() -> Self {
        Self { scheme: IdScheme::Uid, attribute_uid: None }
    }

    pub fn code() -> Self {
        Self { scheme: IdScheme::Code, attribute_uid: None }
    }

    pub fn name() -> Self {
        Self { scheme: IdScheme::Name, attribute_uid: None }
    }

    pub fn auto() -> Self {
        Self { scheme: IdScheme::Auto, attribute_uid: None }
    }

    pub fn attribute(attribute_uid: impl Into<String>) -> Result<Self, ConfigError> {
        let attribute_uid = attribute_uid.into();
        if attribute_uid.trim().is_empty() {
            return Err(ConfigError::MissingAttributeUid);
        }
        Ok(Self { scheme: IdScheme::Attribute, attribute_uid: Some(attribute_uid) })
    }

    /// Re-checks the scheme/attribute pairing. Deserialized params bypass the
    /// constructors, so this runs again as part of [`crate::ImportParams::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.scheme, &self.attribute_uid) {
            (IdScheme::Attribute, None) => Err(ConfigError::MissingAttributeUid),
            (IdScheme::Attribute, Some(uid)) if uid.trim().is_empty() => {
                Err(ConfigError::MissingAttributeUid)
            }
            (IdScheme::Attribute, Some(_)) => Ok(()),
            (scheme, Some(_)) => Err(ConfigError::UnexpectedAttributeUid(scheme)),
            (_, None) => Ok(()),
        }
    }

    /// The object's identifier under this param, or `None` when the object
    /// carries no usable value for the scheme (empty strings do not count).
    pub fn identifier_of(&self, object: &Metadata) -> Option<String> {
        let non_empty = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_owned);
        match self.scheme {
            IdScheme::Uid => non_empty(Some(object.uid())),
            IdScheme::Code => non_empty(object.code()),
            IdScheme::Name => non_empty(object.name()),
            IdScheme::Attribute => {
                let attribute = self.attribute_uid.as_deref()?;
                non_empty(object.attribute_value(attribute))
            }
            IdScheme::Auto => {
                non_empty(Some(object.uid())).or_else(|| non_empty(object.code()))
            }
        }
    }

    /// Concrete params to try, in order, when this param keys a cache lookup.
    /// `Auto` expands to uid-then-code; everything else is already concrete.
    pub fn normalized(&self) -> Vec<IdSchemeParam> {
        match self.scheme {
            IdScheme::Auto => vec![Self::uid(), Self::code()],
            _ => vec![self.clone()],
        }
    }

    /// Wraps a raw payload identifier into the form used for cache lookups
    /// and report serialization.
    pub fn to_identifier(&self, value: impl Into<String>) -> MetadataIdentifier {
        MetadataIdentifier {
            scheme: self.scheme,
            attribute_uid: self.attribute_uid.clone(),
            value: value.into(),
        }
    }
}

/// A fully-qualified external identifier: the scheme it was written under,
/// the attribute uid when the scheme is attribute-based, and the raw value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataIdentifier {
    pub scheme: IdScheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_uid: Option<String>,
    pub value: String,
}

impl std::fmt::Display for IdScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uid => "UID",
            Self::Code => "CODE",
            Self::Name => "NAME",
            Self::Attribute => "ATTRIBUTE",
            Self::Auto => "AUTO",
        };
        write!(f, "{}", s)
    }
}

impl std::fmt::Display for MetadataIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.scheme, &self.attribute_uid) {
            (IdScheme::Attribute, Some(attr)) => {
                write!(f, "ATTRIBUTE:{}={}", attr, self.value)
            }
            (scheme, _) => write!(f, "{}:{}", scheme, self.value),
        }
    }
}

/// Per-kind identifier scheme configuration for one import run.
///
/// Kinds without an explicit override fall back to `default_scheme`
/// (attribute definitions and category options always use the fallback).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdSchemeParams {
    pub default_scheme: IdSchemeParam,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_stage: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_element: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_combo: Option<IdSchemeParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_option_combo: Option<IdSchemeParam>,
}

impl IdSchemeParams {
    pub fn param_for(&self, kind: MetadataKind) -> &IdSchemeParam {
        let specific = match kind {
            MetadataKind::SubjectType => self.subject_type.as_ref(),
            MetadataKind::Program => self.program.as_ref(),
            MetadataKind::ProgramStage => self.program_stage.as_ref(),
            MetadataKind::OrgUnit => self.org_unit.as_ref(),
            MetadataKind::DataElement => self.data_element.as_ref(),
            MetadataKind::RelationshipType => self.relationship_type.as_ref(),
            MetadataKind::CategoryCombo => self.category_combo.as_ref(),
            MetadataKind::CategoryOptionCombo => self.category_option_combo.as_ref(),
            MetadataKind::AttributeType | MetadataKind::CategoryOption => None,
        };
        specific.unwrap_or(&self.default_scheme)
    }

    /// The identifier of `object` under the param configured for its kind.
    pub fn identifier_of(&self, object: &Metadata) -> Option<String> {
        self.param_for(object.kind()).identifier_of(object)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_scheme.validate()?;
        for param in [
            &self.subject_type,
            &self.program,
            &self.program_stage,
            &self.org_unit,
            &self.data_element,
            &self.relationship_type,
            &self.category_combo,
            &self.category_option_combo,
        ]
        .into_iter()
        .flatten()
        {
            param.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Program;

    fn program(uid: &str, code: &str) -> Metadata {
        Metadata::Program(Program {
            uid: uid.to_string(),
            code: if code.is_empty() { None } else { Some(code.to_string()) },
            ..Program::default()
        })
    }

    #[test]
    fn test_attribute_param_requires_uid() {
        assert_eq!(
            IdSchemeParam::attribute("").unwrap_err(),
            ConfigError::MissingAttributeUid
        );
        assert!(IdSchemeParam::attribute("tVdRKHDy6uN").is_ok());
    }

    #[test]
    fn test_auto_prefers_uid_then_code() {
        let auto = IdSchemeParam::auto();
        assert_eq!(auto.identifier_of(&program("p1", "PRG-1")), Some("p1".into()));
        assert_eq!(auto.identifier_of(&program("", "PRG-1")), Some("PRG-1".into()));
        assert_eq!(auto.identifier_of(&program("", "")), None);
    }

    #[test]
    fn test_auto_normalizes_to_concrete_schemes() {
        let schemes: Vec<IdScheme> = IdSchemeParam::auto()
            .normalized()
            .into_iter()
            .map(|p| p.scheme)
            .collect();
        assert_eq!(schemes, vec![IdScheme::Uid, IdScheme::Code]);
    }

    #[test]
    fn test_empty_identifier_is_absent() {
        assert_eq!(IdSchemeParam::code().identifier_of(&program("p1", "")), None);
    }

    #[test]
    fn test_identifier_display_is_scheme_qualified() {
        assert_eq!(IdSchemeParam::code().to_identifier("PRG-1").to_string(), "CODE:PRG-1");
        assert_eq!(
            IdSchemeParam::attribute("tVdRKHDy6uN")
                .unwrap()
                .to_identifier("L-42")
                .to_string(),
            "ATTRIBUTE:tVdRKHDy6uN=L-42"
        );
    }

    #[test]
    fn test_param_for_falls_back_to_default() {
        let params = IdSchemeParams {
            program: Some(IdSchemeParam::code()),
            ..IdSchemeParams::default()
        };
        assert_eq!(params.param_for(MetadataKind::Program).scheme, IdScheme::Code);
        assert_eq!(params.param_for(MetadataKind::OrgUnit).scheme, IdScheme::Uid);
    }

    #[test]
    fn test_validate_rejects_deserialized_attribute_without_uid() {
        let params = IdSchemeParams {
            data_element: Some(IdSchemeParam {
                scheme: IdScheme::Attribute,
                attribute_uid: None,
            }),
            ..IdSchemeParams::default()
        };
        assert_eq!(params.validate().unwrap_err(), ConfigError::MissingAttributeUid);
    }
}
