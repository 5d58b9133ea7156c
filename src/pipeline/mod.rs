//! Incremental runs: the collaborators around the pure flattening core.

pub mod config;
pub mod identify;
pub mod run;
pub mod source;
pub mod watermark;

pub use config::RunConfig;
pub use identify::{
    DocumentIdentifier, DocumentType, FixedIdentifier, IdentificationRule, RuleIdentifier,
};
pub use run::{run, Pipeline, RunReport};
pub use source::{DocumentSource, MemorySource, NdjsonSource, ReadFilter, SourceDocument};
pub use watermark::{
    MemoryWatermarkStore, SqliteWatermarkStore, WatermarkCoordinator, WatermarkKey, WatermarkStore,
};
