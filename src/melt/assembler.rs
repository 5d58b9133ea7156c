//! Column extraction for leaf section instances.
//!
//! Each leaf instance becomes one wide [`FlatRow`] whose columns are exactly
//! the owning section's `ColumnDef`s, in ordinal order.

use crate::error::SchemaError;
use crate::melt::coerce::coerce;
use crate::melt::types::{AnomalyKind, Cell, Diagnostics, FlatRow, SectionInstance};
use crate::schema::{PathContext, SchemaTree};
use crate::value::{resolve_traced, Resolution, Value, NULL};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A pure post-extraction value rewrite, e.g. a classification rule
#[derive(Clone)]
pub struct Transform(Arc<dyn Fn(Cell) -> Cell + Send + Sync>);

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Cell) -> Cell + Send + Sync + 'static,
    {
        Transform(Arc::new(f))
    }

    /// Map string values through `table`. Strings not in the table become
    /// `default` when one is given and are kept otherwise; other cells pass
    /// through.
    pub fn lookup(table: BTreeMap<String, String>, default: Option<String>) -> Self {
        Transform::new(move |cell| match cell {
            Cell::String(s) => match table.get(&s) {
                Some(mapped) => Cell::String(mapped.clone()),
                None => match &default {
                    Some(d) => Cell::String(d.clone()),
                    None => Cell::String(s),
                },
            },
            other => other,
        })
    }

    pub fn apply(&self, cell: Cell) -> Cell {
        (self.0)(cell)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

/// Named transforms that column metadata may refer to
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Transform>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, transform: Transform) -> Self {
        self.transforms.insert(name.into(), transform);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Transform> {
        self.transforms.get(name)
    }
}

/// Rows for one document plus what went wrong producing them
#[derive(Debug, Clone, Default)]
pub struct Assembled {
    pub rows: Vec<FlatRow>,
    pub diagnostics: Diagnostics,
}

pub struct RowAssembler<'s> {
    schema: &'s SchemaTree,
    /// Per section, per column (aligned with `schema.columns`)
    transforms: Vec<Vec<Option<Transform>>>,
}

impl fmt::Debug for RowAssembler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowAssembler")
            .field("mapping", self.schema.key())
            .field("transforms", &self.transforms)
            .finish()
    }
}

impl<'s> RowAssembler<'s> {
    /// Bind transforms to columns. Fails if a column names an unregistered
    /// transform.
    pub fn new(schema: &'s SchemaTree, registry: &TransformRegistry) -> Result<Self, SchemaError> {
        let mut transforms = Vec::with_capacity(schema.sections().len());
        for id in 0..schema.sections().len() {
            let mut bound = Vec::new();
            for col in schema.columns(id) {
                let transform = match &col.transform {
                    None => None,
                    Some(name) => Some(registry.get(name).cloned().ok_or_else(|| {
                        SchemaError::UnknownTransform {
                            column: col.column_name.clone(),
                            transform: name.clone(),
                        }
                    })?),
                };
                bound.push(transform);
            }
            transforms.push(bound);
        }

        Ok(RowAssembler { schema, transforms })
    }

    /// Extract one row per leaf instance. Sections without columns produce
    /// no row.
    pub fn assemble(&self, document: &Value, instances: &[SectionInstance<'_>]) -> Assembled {
        let mut out = Assembled::default();

        for instance in instances {
            let columns = self.schema.columns(instance.section);
            if columns.is_empty() {
                continue;
            }

            let mut cells = Vec::with_capacity(columns.len());
            for (col, transform) in columns.iter().zip(&self.transforms[instance.section]) {
                let context = match col.path_context {
                    PathContext::Section => instance.value,
                    PathContext::Document => document,
                };

                let raw = match resolve_traced(context, &col.path) {
                    Resolution::Found(v) => v,
                    Resolution::Missing => &NULL,
                    Resolution::CrossedArray { .. } => {
                        out.diagnostics
                            .record_anomaly(instance.section_name, AnomalyKind::CrossedArray);
                        &NULL
                    }
                };

                let cell = match coerce(raw, col.target_type) {
                    Ok(cell) => cell,
                    Err(err) => {
                        debug!(
                            document_id = instance.document_id,
                            column = %col.column_name,
                            error = %err,
                            "coercion failed"
                        );
                        out.diagnostics.record_coercion_failure(&col.column_name);
                        Cell::Null
                    }
                };

                let cell = match transform {
                    Some(t) => t.apply(cell),
                    None => cell,
                };
                cells.push((col.column_name.clone(), cell));
            }

            out.rows.push(FlatRow {
                document_id: instance.document_id.to_string(),
                section: instance.section_name.to_string(),
                instance_key: instance.instance_key.clone(),
                columns: cells,
            });
        }

        out
    }
}

/// One-shot assembly with the given transforms.
pub fn assemble(
    document: &Value,
    instances: &[SectionInstance<'_>],
    schema: &SchemaTree,
    transforms: &TransformRegistry,
) -> Result<Assembled, SchemaError> {
    Ok(RowAssembler::new(schema, transforms)?.assemble(document, instances))
}
