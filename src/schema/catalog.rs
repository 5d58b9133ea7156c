//! Metadata store: section/column rows and document-type rules.
//!
//! The engine only reads metadata. [`MetadataCatalog`] is the file-backed
//! store used by the CLI and tests; production deployments implement
//! [`MetadataStore`] over whatever table holds the rows.

use crate::error::SourceError;
use crate::pipeline::identify::IdentificationRule;
use crate::schema::types::{ColumnDef, SectionDef};
use crate::value::Path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path as FsPath;

/// Identifies one flattening mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingKey {
    pub source_entity: String,
    pub target_entity: String,
    pub document_type: String,
}

impl MappingKey {
    pub fn new(
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        MappingKey {
            source_entity: source_entity.into(),
            target_entity: target_entity.into(),
            document_type: document_type.into(),
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} ({})",
            self.source_entity, self.target_entity, self.document_type
        )
    }
}

/// The raw metadata rows for one mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(flatten)]
    pub key: MappingKey,

    /// Array at the document root holding the top-level components. When
    /// set, level-0 sections are looked up inside its elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_container: Option<Path>,

    pub sections: Vec<SectionDef>,

    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

/// Read-only access to flattening metadata
pub trait MetadataStore: Send + Sync {
    /// Returns `Ok(None)` when no mapping is registered for `key`.
    fn mapping(&self, key: &MappingKey) -> Result<Option<Mapping>, SourceError>;

    /// Rules used to tag incoming documents with a document type.
    fn identification_rules(&self) -> Result<Vec<IdentificationRule>, SourceError>;
}

/// All metadata held in memory, usually loaded from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataCatalog {
    #[serde(default)]
    pub mappings: Vec<Mapping>,

    #[serde(default)]
    pub identification_rules: Vec<IdentificationRule>,
}

impl MetadataCatalog {
    pub fn from_json_str(raw: &str) -> Result<Self, SourceError> {
        serde_json::from_str(raw).map_err(|e| SourceError::Malformed {
            line: e.line(),
            message: e.to_string(),
        })
    }

    pub fn from_file<P: AsRef<FsPath>>(path: P) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn with_rule(mut self, rule: IdentificationRule) -> Self {
        self.identification_rules.push(rule);
        self
    }
}

impl MetadataStore for MetadataCatalog {
    fn mapping(&self, key: &MappingKey) -> Result<Option<Mapping>, SourceError> {
        Ok(self.mappings.iter().find(|m| &m.key == key).cloned())
    }

    fn identification_rules(&self) -> Result<Vec<IdentificationRule>, SourceError> {
        Ok(self.identification_rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "mappings": [{
            "source_entity": "ccda_raw",
            "target_entity": "results",
            "document_type": "ccd",
            "component_container": "Components",
            "sections": [
                {"name": "Results", "path": "Results", "kind": "struct", "level": 0}
            ],
            "columns": []
        }],
        "identification_rules": [
            {
                "document_type": "ccd",
                "path": "templateId.root",
                "equals": "2.16.840.1.113883.10.20.22.1.2"
            }
        ]
    }"#;

    #[test]
    fn test_catalog_lookup() {
        let catalog = MetadataCatalog::from_json_str(CATALOG).unwrap();
        let key = MappingKey::new("ccda_raw", "results", "ccd");

        let mapping = catalog.mapping(&key).unwrap().unwrap();
        assert_eq!(mapping.sections.len(), 1);
        assert_eq!(
            mapping.component_container.map(|p| p.to_string()),
            Some("Components".to_string())
        );

        let other = MappingKey::new("ccda_raw", "vitals", "ccd");
        assert!(catalog.mapping(&other).unwrap().is_none());
        assert_eq!(catalog.identification_rules().unwrap().len(), 1);

        let extended = catalog.with_rule(IdentificationRule {
            document_type: "discharge".into(),
            path: "templateId.root".parse().unwrap(),
            equals: Some("2.16.840.1.113883.10.20.22.1.8".into()),
        });
        let rules = extended.identification_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].document_type, "discharge");
    }

    #[test]
    fn test_malformed_catalog_reports_line() {
        let err = MetadataCatalog::from_json_str("{\n  \"mappings\": [\n  oops").unwrap_err();
        assert!(matches!(err, SourceError::Malformed { line: 3, .. }), "got {err:?}");
    }

    #[test]
    fn test_invalid_path_in_catalog_is_rejected() {
        let raw = CATALOG.replace("\"path\": \"Results\"", "\"path\": \"Results..x\"");
        assert!(MetadataCatalog::from_json_str(&raw).is_err());
    }

    #[test]
    fn test_key_display() {
        let key = MappingKey::new("ccda_raw", "results", "ccd");
        assert_eq!(key.to_string(), "ccda_raw->results (ccd)");
    }
}
