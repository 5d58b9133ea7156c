use crate::value::Path;
use serde::{Deserialize, Serialize};

/// Whether a section fans out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    /// One instance, keeps the parent's instance key
    Struct,
    /// One instance per element, appends the element ordinal to the key
    Array,
}

/// A named node of the section hierarchy, as stored in metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDef {
    pub name: String,

    /// Path relative to the parent section's value (or the document root)
    pub path: Path,

    pub kind: SectionKind,

    /// 0 for root-attached sections
    pub level: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,

    /// Informational only; carried through to `inspect`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join_keys: Vec<String>,
}

/// What a column path is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathContext {
    /// The owning section instance's value
    Section,
    /// The document root
    Document,
}

/// Declared output type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[default]
    String,
    Double,
    Boolean,
    Timestamp,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::String => "string",
            TargetType::Double => "double",
            TargetType::Boolean => "boolean",
            TargetType::Timestamp => "timestamp",
        }
    }
}

/// A leaf column extracted from its owning section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub owning_section_name: String,
    pub column_name: String,
    pub path: Path,
    pub ordinal: u32,

    /// Required: root-level vs section-relative is never inferred from the path
    pub path_context: PathContext,

    #[serde(default)]
    pub target_type: TargetType,

    /// Name of a transform registered with the row assembler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}
