//! Catalogue metadata referenced by import payloads.
//!
//! Every kind carries the three identifier fields an [`crate::IdScheme`] can
//! resolve against (uid, code, name) plus the custom attribute values needed
//! for attribute-based schemes. [`Metadata`] is the closed union the preheat
//! cache stores; [`MetadataKind`] is its tag.

use serde::{Deserialize, Serialize};

/// A custom attribute value attached to a metadata object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeValue {
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectType {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Program {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    /// Subject type uid this program registers, when it tracks subjects.
    pub subject_type: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramStage {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub program: String,
    pub repeatable: bool,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrgUnit {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataElement {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

/// The definition of a subject-level attribute (not to be confused with the
/// custom [`AttributeValue`]s metadata objects themselves carry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeType {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub unique: bool,
    /// Regular expression supplied values must match, when set.
    pub pattern: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationshipType {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub bidirectional: bool,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryCombo {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryOption {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryOptionCombo {
    pub uid: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub category_combo: Option<String>,
    pub attribute_values: Vec<AttributeValue>,
}

/// Tag for every metadata kind the import pipeline can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetadataKind {
    SubjectType,
    Program,
    ProgramStage,
    OrgUnit,
    DataElement,
    AttributeType,
    RelationshipType,
    CategoryCombo,
    CategoryOption,
    CategoryOptionCombo,
}

impl std::fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SubjectType => "subjectType",
            Self::Program => "program",
            Self::ProgramStage => "programStage",
            Self::OrgUnit => "orgUnit",
            Self::DataElement => "dataElement",
            Self::AttributeType => "attributeType",
            Self::RelationshipType => "relationshipType",
            Self::CategoryCombo => "categoryCombo",
            Self::CategoryOption => "categoryOption",
            Self::CategoryOptionCombo => "categoryOptionCombo",
        };
        write!(f, "{}", s)
    }
}

/// Closed union over the metadata kinds, so the cache and the collector can
/// dispatch on a tag instead of downcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metadata {
    SubjectType(SubjectType),
    Program(Program),
    ProgramStage(ProgramStage),
    OrgUnit(OrgUnit),
    DataElement(DataElement),
    AttributeType(AttributeType),
    RelationshipType(RelationshipType),
    CategoryCombo(CategoryCombo),
    CategoryOption(CategoryOption),
    CategoryOptionCombo(CategoryOptionCombo),
}

impl Metadata {
    pub fn kind(&self) -> MetadataKind {
        match self {
            Self::SubjectType(_) => MetadataKind::SubjectType,
            Self::Program(_) => MetadataKind::Program,
            Self::ProgramStage(_) => MetadataKind::ProgramStage,
            Self::OrgUnit(_) => MetadataKind::OrgUnit,
            Self::DataElement(_) => MetadataKind::DataElement,
            Self::AttributeType(_) => MetadataKind::AttributeType,
            Self::RelationshipType(_) => MetadataKind::RelationshipType,
            Self::CategoryCombo(_) => MetadataKind::CategoryCombo,
            Self::CategoryOption(_) => MetadataKind::CategoryOption,
            Self::CategoryOptionCombo(_) => MetadataKind::CategoryOptionCombo,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Self::SubjectType(m) => &m.uid,
            Self::Program(m) => &m.uid,
            Self::ProgramStage(m) => &m.uid,
            Self::OrgUnit(m) => &m.uid,
            Self::DataElement(m) => &m.uid,
            Self::AttributeType(m) => &m.uid,
            Self::RelationshipType(m) => &m.uid,
            Self::CategoryCombo(m) => &m.uid,
            Self::CategoryOption(m) => &m.uid,
            Self::CategoryOptionCombo(m) => &m.uid,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::SubjectType(m) => m.code.as_deref(),
            Self::Program(m) => m.code.as_deref(),
            Self::ProgramStage(m) => m.code.as_deref(),
            Self::OrgUnit(m) => m.code.as_deref(),
            Self::DataElement(m) => m.code.as_deref(),
            Self::AttributeType(m) => m.code.as_deref(),
            Self::RelationshipType(m) => m.code.as_deref(),
            Self::CategoryCombo(m) => m.code.as_deref(),
            Self::CategoryOption(m) => m.code.as_deref(),
            Self::CategoryOptionCombo(m) => m.code.as_deref(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::SubjectType(m) => m.name.as_deref(),
            Self::Program(m) => m.name.as_deref(),
            Self::ProgramStage(m) => m.name.as_deref(),
            Self::OrgUnit(m) => m.name.as_deref(),
            Self::DataElement(m) => m.name.as_deref(),
            Self::AttributeType(m) => m.name.as_deref(),
            Self::RelationshipType(m) => m.name.as_deref(),
            Self::CategoryCombo(m) => m.name.as_deref(),
            Self::CategoryOption(m) => m.name.as_deref(),
            Self::CategoryOptionCombo(m) => m.name.as_deref(),
        }
    }

    /// Value of the custom attribute with the given uid, if present.
    pub fn attribute_value(&self, attribute_uid: &str) -> Option<&str> {
        let values = match self {
            Self::SubjectType(m) => &m.attribute_values,
            Self::Program(m) => &m.attribute_values,
            Self::ProgramStage(m) => &m.attribute_values,
            Self::OrgUnit(m) => &m.attribute_values,
            Self::DataElement(m) => &m.attribute_values,
            Self::AttributeType(m) => &m.attribute_values,
            Self::RelationshipType(m) => &m.attribute_values,
            Self::CategoryCombo(m) => &m.attribute_values,
            Self::CategoryOption(m) => &m.attribute_values,
            Self::CategoryOptionCombo(m) => &m.attribute_values,
        };
        values
            .iter()
            .find(|v| v.attribute == attribute_uid)
            .map(|v| v.value.as_str())
    }
}
