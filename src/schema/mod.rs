//! Section/column metadata and the validated schema tree
//!
//! Metadata rows describe, per mapping, a forest of Struct/Array sections
//! and the leaf columns extracted from them. [`SchemaTree`] is the
//! in-memory, validated form the flattening engine interprets.

pub mod catalog;
pub mod registry;
pub mod types;

pub use catalog::{Mapping, MappingKey, MetadataCatalog, MetadataStore};
pub use registry::{SchemaTree, SectionId};
pub use types::{ColumnDef, PathContext, SectionDef, SectionKind, TargetType};
