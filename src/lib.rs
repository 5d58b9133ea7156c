//! # Docflat - metadata-driven document flattening
//!
//! Turns deeply nested clinical documents (CCDA rendered as JSON) into
//! wide, fixed-schema rows. Which sections exist, how they nest, and which
//! columns each one yields all come from metadata rows, not code.
//!
//! ## Modules
//!
//! - **value**: the document value model and total dot-path resolution
//! - **schema**: section/column metadata and the validated schema tree
//! - **melt**: flattening, column extraction and row sinks
//! - **pipeline**: incremental runs with per-table watermarks
//!
//! ## Quick Start
//!
//! ```rust
//! use docflat::schema::{Mapping, MappingKey, SchemaTree};
//! use docflat::value::Value;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mapping: Mapping = serde_json::from_value(json!({
//!     "source_entity": "ccda_raw",
//!     "target_entity": "results",
//!     "document_type": "ccd",
//!     "component_container": "Components",
//!     "sections": [
//!         {"name": "Results", "path": "Results", "kind": "struct", "level": 0},
//!         {"name": "Observations", "path": "Observations", "kind": "array",
//!          "level": 1, "parent_name": "Results"}
//!     ],
//!     "columns": [
//!         {"owning_section_name": "Observations", "column_name": "code",
//!          "path": "Code", "ordinal": 1, "path_context": "section"}
//!     ]
//! }))?;
//! let schema = SchemaTree::build(mapping)?;
//!
//! let document = Value::from(json!({
//!     "Components": [
//!         {"Results": {"Observations": [{"Code": "718-7"}, {"Code": "6690-2"}]}},
//!         {"Vitals": {}}
//!     ]
//! }));
//!
//! let out = docflat::flatten_document("doc-1", &document, &schema, "Results")?;
//! assert_eq!(out.rows.len(), 2);
//! assert_eq!(out.rows[1].instance_key.as_slice(), &[0, 1]);
//! # let _ = MappingKey::new("ccda_raw", "results", "ccd");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod melt;
pub mod pipeline;
pub mod schema;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{CoercionError, RunError, SchemaError, SinkError, SourceError, WatermarkError};
pub use melt::{Assembled, Cell, Diagnostics, FlatRow, Flattener, InstanceKey, RowAssembler};
pub use pipeline::{Pipeline, RunConfig, RunReport};
pub use schema::{MappingKey, SchemaTree};
pub use value::{Path, Value};

/// Flatten one document into rows for `target_component`, with no value
/// transforms.
pub fn flatten_document(
    document_id: &str,
    document: &Value,
    schema: &SchemaTree,
    target_component: &str,
) -> Result<Assembled, SchemaError> {
    let flat = melt::flatten(document_id, document, schema, target_component)?;
    let transforms = melt::TransformRegistry::new();
    let mut out = melt::assemble(document, &flat.instances, schema, &transforms)?;
    let mut diagnostics = flat.diagnostics;
    diagnostics.merge(out.diagnostics);
    out.diagnostics = diagnostics;
    Ok(out)
}
