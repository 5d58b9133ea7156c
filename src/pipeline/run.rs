//! One incremental flattening run.
//!
//! read cursor -> read -> identify -> flatten + assemble (parallel) ->
//! write -> advance cursor. Every fallible collaborator call happens
//! before the cursor moves, so a failed run leaves the watermark where it
//! was and a retry sees the same documents.

use crate::error::RunError;
use crate::melt::{
    Diagnostics, FlatRow, FlattenOptions, Flattener, RowAssembler, Sink, TransformRegistry,
};
use crate::pipeline::config::RunConfig;
use crate::pipeline::identify::DocumentIdentifier;
use crate::pipeline::source::{DocumentSource, SourceDocument};
use crate::pipeline::watermark::{WatermarkCoordinator, WatermarkStore};
use crate::schema::{MetadataStore, SchemaTree};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub document_type: String,
    pub target_table: String,
    pub documents_read: usize,
    pub documents_processed: usize,
    pub documents_unidentified: usize,
    /// Identified as another document type
    pub documents_skipped: usize,
    /// Leaf section instances across all processed documents
    pub instances: usize,
    pub rows_written: usize,
    pub previous_cursor: Option<DateTime<Utc>>,
    pub new_cursor: Option<DateTime<Utc>>,
    pub diagnostics: Diagnostics,
}

struct DocumentOutput {
    instances: usize,
    rows: Vec<FlatRow>,
    diagnostics: Diagnostics,
}

/// The collaborators a run reads from. The sink is passed per run.
pub struct Pipeline<'a> {
    metadata: &'a dyn MetadataStore,
    source: &'a dyn DocumentSource,
    identifier: &'a dyn DocumentIdentifier,
    watermarks: &'a dyn WatermarkStore,
    transforms: TransformRegistry,
    max_depth: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        metadata: &'a dyn MetadataStore,
        source: &'a dyn DocumentSource,
        identifier: &'a dyn DocumentIdentifier,
        watermarks: &'a dyn WatermarkStore,
    ) -> Self {
        Pipeline {
            metadata,
            source,
            identifier,
            watermarks,
            transforms: TransformRegistry::new(),
            max_depth: FlattenOptions::default().max_depth,
        }
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn run(&self, config: &RunConfig, sink: &mut dyn Sink) -> Result<RunReport, RunError> {
        let start = Instant::now();
        let table = config.target_table();

        // Metadata problems abort before anything is read
        let schema = SchemaTree::load(self.metadata, &config.mapping_key())?;
        let options = FlattenOptions {
            array_policy: config.array_policy,
            max_depth: self.max_depth,
        };
        let flattener = Flattener::new(&schema, &config.target_component, options)?;
        let assembler = RowAssembler::new(&schema, &self.transforms)?;

        let coordinator = WatermarkCoordinator::new(self.watermarks);
        let filter = coordinator.filter(&config.document_type, table)?;
        let previous_cursor = filter.after;
        let documents = self.source.read(&filter)?;
        info!(
            mapping = %schema.key(),
            table,
            cursor = ?previous_cursor,
            documents = documents.len(),
            "read source documents"
        );

        let mut report = RunReport {
            document_type: config.document_type.clone(),
            target_table: table.to_string(),
            documents_read: documents.len(),
            previous_cursor,
            new_cursor: previous_cursor,
            ..RunReport::default()
        };

        let selected = self.select(&documents, &config.document_type, &mut report);

        let outputs: Vec<DocumentOutput> = selected
            .par_iter()
            .map(|doc| {
                let flat = flattener.flatten(&doc.id, &doc.document);
                let assembled = assembler.assemble(&doc.document, &flat.instances);
                debug!(
                    document_id = %doc.id,
                    instances = flat.instances.len(),
                    rows = assembled.rows.len(),
                    "flattened document"
                );

                let mut diagnostics = flat.diagnostics;
                diagnostics.merge(assembled.diagnostics);
                DocumentOutput {
                    instances: flat.instances.len(),
                    rows: assembled.rows,
                    diagnostics,
                }
            })
            .collect();

        let mut rows = Vec::new();
        for output in outputs {
            report.instances += output.instances;
            report.diagnostics.merge(output.diagnostics);
            rows.extend(output.rows);
        }

        if !rows.is_empty() {
            sink.write(table, &rows)?;
        }
        report.rows_written = rows.len();

        if let Some(cursor) = documents.iter().map(|d| d.inserted_at).max() {
            report.new_cursor = Some(coordinator.advance(&config.document_type, table, cursor)?);
        }

        info!(
            table,
            processed = report.documents_processed,
            unidentified = report.documents_unidentified,
            skipped = report.documents_skipped,
            rows = report.rows_written,
            anomalies = report.diagnostics.anomaly_count(),
            coercion_failures = report.diagnostics.coercion_failure_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(report)
    }

    /// Keep documents identified as `document_type`, counting the rest.
    fn select<'d>(
        &self,
        documents: &'d [SourceDocument],
        document_type: &str,
        report: &mut RunReport,
    ) -> Vec<&'d SourceDocument> {
        let mut selected = Vec::with_capacity(documents.len());
        for doc in documents {
            match self.identifier.identify(&doc.document) {
                None => {
                    debug!(document_id = %doc.id, "unidentified document");
                    report.documents_unidentified += 1;
                }
                Some(found) if found.as_str() != document_type => {
                    report.documents_skipped += 1;
                }
                Some(_) => selected.push(doc),
            }
        }
        report.documents_processed = selected.len();
        selected
    }
}

/// Run `config` once against the given collaborators.
pub fn run(
    config: &RunConfig,
    metadata: &dyn MetadataStore,
    source: &dyn DocumentSource,
    identifier: &dyn DocumentIdentifier,
    watermarks: &dyn WatermarkStore,
    sink: &mut dyn Sink,
) -> Result<RunReport, RunError> {
    Pipeline::new(metadata, source, identifier, watermarks).run(config, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::MemorySink;
    use crate::pipeline::identify::FixedIdentifier;
    use crate::pipeline::source::MemorySource;
    use crate::pipeline::watermark::MemoryWatermarkStore;
    use crate::pipeline::DocumentType;
    use crate::schema::registry::tests::{column, mapping, section};
    use crate::schema::{MetadataCatalog, SectionKind::*};
    use crate::value::Value;
    use chrono::TimeZone;
    use serde_json::json;

    fn catalog() -> MetadataCatalog {
        MetadataCatalog::default().with_mapping(mapping(
            vec![
                section("Results", "results", Struct, 0, None),
                section("Observations", "obs", Array, 1, Some("Results")),
            ],
            vec![column("Observations", "code", "code", 1)],
        ))
    }

    fn doc(id: &str, hour: u32, codes: &[&str]) -> SourceDocument {
        let obs: Vec<_> = codes.iter().map(|c| json!({"code": c})).collect();
        SourceDocument {
            id: id.to_string(),
            inserted_at: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            document: Value::from(json!({"results": {"obs": obs}})),
        }
    }

    fn config() -> RunConfig {
        RunConfig::new("ccda_raw", "results", "ccd", "Results")
    }

    #[test]
    fn test_rows_follow_source_order() {
        let catalog = catalog();
        let source = MemorySource::new(
            (0..20)
                .map(|i| doc(&format!("d{i:02}"), i, &["a", "b"]))
                .collect(),
        );
        let identifier = FixedIdentifier(DocumentType::new("ccd"));
        let watermarks = MemoryWatermarkStore::new();
        let mut sink = MemorySink::new();

        let report =
            run(&config(), &catalog, &source, &identifier, &watermarks, &mut sink).unwrap();
        assert_eq!(report.rows_written, 40);
        assert_eq!(report.instances, 40);

        let ids: Vec<&str> = sink
            .rows("results")
            .iter()
            .step_by(2)
            .map(|r| r.document_id.as_str())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("d{i:02}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_schema_error_reads_nothing() {
        let catalog = MetadataCatalog::default();
        let source = MemorySource::new(vec![doc("d1", 1, &["a"])]);
        let identifier = FixedIdentifier(DocumentType::new("ccd"));
        let watermarks = MemoryWatermarkStore::new();
        let mut sink = MemorySink::new();

        let err =
            run(&config(), &catalog, &source, &identifier, &watermarks, &mut sink).unwrap_err();
        assert!(matches!(err, RunError::Schema(_)), "got {err:?}");
        assert_eq!(sink.writes, 0);
    }

    #[test]
    fn test_empty_read_keeps_cursor() {
        let catalog = catalog();
        let source = MemorySource::default();
        let identifier = FixedIdentifier(DocumentType::new("ccd"));
        let watermarks = MemoryWatermarkStore::new();
        let mut sink = MemorySink::new();

        let report =
            run(&config(), &catalog, &source, &identifier, &watermarks, &mut sink).unwrap();
        assert_eq!(report.documents_read, 0);
        assert_eq!(report.new_cursor, None);
        assert_eq!(sink.writes, 0);
    }
}
