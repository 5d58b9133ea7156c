use crate::melt::ArrayPolicy;
use crate::schema::MappingKey;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a run flattens and where it writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub source_entity: String,
    pub target_entity: String,
    pub document_type: String,
    pub target_component: String,

    /// Table rows are written to; defaults to `target_entity`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,

    #[serde(default)]
    pub array_policy: ArrayPolicy,
}

impl RunConfig {
    pub fn new(
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
        document_type: impl Into<String>,
        target_component: impl Into<String>,
    ) -> Self {
        RunConfig {
            source_entity: source_entity.into(),
            target_entity: target_entity.into(),
            document_type: document_type.into(),
            target_component: target_component.into(),
            target_table: None,
            array_policy: ArrayPolicy::default(),
        }
    }

    pub fn with_target_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }

    pub fn with_array_policy(mut self, policy: ArrayPolicy) -> Self {
        self.array_policy = policy;
        self
    }

    pub fn mapping_key(&self) -> MappingKey {
        MappingKey::new(
            self.source_entity.clone(),
            self.target_entity.clone(),
            self.document_type.clone(),
        )
    }

    pub fn target_table(&self) -> &str {
        self.target_table.as_deref().unwrap_or(&self.target_entity)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading run config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing run config {}", path.display()))
    }
}
