//! Schema-driven expansion of a document into leaf section instances.
//!
//! One generic walk handles every shape combination: a Struct section
//! emits one instance under the parent's key, an Array section emits one
//! instance per element and appends the element ordinal. Output order is
//! declaration order across siblings and array order across elements.

use crate::error::SchemaError;
use crate::melt::types::{AnomalyKind, Diagnostics, InstanceKey, SectionInstance};
use crate::schema::{SchemaTree, SectionId, SectionKind};
use crate::value::{resolve_traced, Resolution, Value};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// What to do when an Array section finds a single object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayPolicy {
    /// Treat it as a one-element array
    #[default]
    Normalize,
    /// Record an anomaly and produce nothing for the branch
    Anomaly,
}

#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub array_policy: ArrayPolicy,

    /// Sections at this level or deeper are not expanded
    pub max_depth: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        FlattenOptions {
            array_policy: ArrayPolicy::Normalize,
            max_depth: 64,
        }
    }
}

/// Result of flattening one document
#[derive(Debug, Clone, Default)]
pub struct Flattened<'a> {
    /// Leaf instances, in traversal order
    pub instances: Vec<SectionInstance<'a>>,
    /// Every instance emitted, leaves included
    pub emitted: usize,
    pub diagnostics: Diagnostics,
}

enum Frame<'a> {
    /// Resolve a section's path against its parent's value
    Resolve {
        section: SectionId,
        context: &'a Value,
        key: InstanceKey,
        parent: Option<usize>,
    },
    /// Record an emitted instance and schedule its children
    Visit {
        section: SectionId,
        value: &'a Value,
        key: InstanceKey,
    },
}

/// Flattens documents against one component of a schema
pub struct Flattener<'s> {
    schema: &'s SchemaTree,
    root: SectionId,
    options: FlattenOptions,
}

impl<'s> Flattener<'s> {
    /// Bind a schema to the requested top-level component.
    pub fn new(
        schema: &'s SchemaTree,
        component: &str,
        options: FlattenOptions,
    ) -> Result<Self, SchemaError> {
        let root = schema.root(component)?;
        Ok(Flattener {
            schema,
            root,
            options,
        })
    }

    /// Expand `document` into its leaf section instances. Never fails:
    /// structural surprises are counted in the returned diagnostics.
    pub fn flatten<'a>(&self, document_id: &'a str, document: &'a Value) -> Flattened<'a>
    where
        's: 'a,
    {
        let schema: &'s SchemaTree = self.schema;
        let mut out = Flattened::default();
        let mut stack = self.seed(document, &mut out.diagnostics);

        // Pre-order list of emitted instances with a has-emitting-child flag
        let mut nodes: Vec<(SectionInstance<'a>, bool)> = Vec::new();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Resolve {
                    section,
                    context,
                    key,
                    parent,
                } => {
                    let emitted = self.expand(section, context, &key, &mut out.diagnostics);
                    if emitted.is_empty() {
                        continue;
                    }
                    if let Some(parent) = parent {
                        nodes[parent].1 = true;
                    }
                    for (key, value) in emitted.into_iter().rev() {
                        stack.push(Frame::Visit {
                            section,
                            value,
                            key,
                        });
                    }
                }
                Frame::Visit {
                    section,
                    value,
                    key,
                } => {
                    let idx = nodes.len();
                    for &child in schema.children(section).iter().rev() {
                        stack.push(Frame::Resolve {
                            section: child,
                            context: value,
                            key: key.clone(),
                            parent: Some(idx),
                        });
                    }
                    let section_name: &'a str = schema.section(section).name.as_str();
                    nodes.push((
                        SectionInstance {
                            document_id,
                            section,
                            section_name,
                            instance_key: key,
                            value,
                        },
                        false,
                    ));
                }
            }
        }

        out.emitted = nodes.len();
        out.instances = nodes
            .into_iter()
            .filter(|(_, has_child)| !has_child)
            .map(|(instance, _)| instance)
            .collect();

        trace!(
            document_id,
            emitted = out.emitted,
            leaves = out.instances.len(),
            "document flattened"
        );
        out
    }

    /// Initial frames for the requested component.
    fn seed<'a>(&self, document: &'a Value, diagnostics: &mut Diagnostics) -> Vec<Frame<'a>> {
        let Some(container) = self.schema.component_container() else {
            return vec![Frame::Resolve {
                section: self.root,
                context: document,
                key: InstanceKey::root(),
                parent: None,
            }];
        };

        let root_name = &self.schema.section(self.root).name;
        let components: Vec<(usize, &'a Value)> = match resolve_traced(document, container) {
            Resolution::Found(found) => match found {
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| !item.is_null())
                    .collect(),
                // a lone component stored without its array
                Value::Struct(_) => vec![(0, found)],
                Value::Scalar(_) | Value::Null => {
                    diagnostics.record_anomaly(root_name, AnomalyKind::UnexpectedScalar);
                    Vec::new()
                }
            },
            Resolution::CrossedArray { .. } => {
                diagnostics.record_anomaly(root_name, AnomalyKind::CrossedArray);
                Vec::new()
            }
            Resolution::Missing => Vec::new(),
        };

        components
            .into_iter()
            .rev()
            .map(|(ordinal, component)| Frame::Resolve {
                section: self.root,
                context: component,
                key: InstanceKey::root().child(ordinal),
                parent: None,
            })
            .collect()
    }

    /// Resolve one section against its context and return the instances it
    /// emits as `(key, value)` pairs.
    fn expand<'a>(
        &self,
        section: SectionId,
        context: &'a Value,
        key: &InstanceKey,
        diagnostics: &mut Diagnostics,
    ) -> Vec<(InstanceKey, &'a Value)> {
        let def = self.schema.section(section);

        if def.level as usize >= self.options.max_depth {
            diagnostics.record_anomaly(&def.name, AnomalyKind::DepthExceeded);
            return Vec::new();
        }

        let value = match resolve_traced(context, &def.path) {
            Resolution::Found(value) => value,
            Resolution::Missing => return Vec::new(),
            Resolution::CrossedArray { .. } => {
                diagnostics.record_anomaly(&def.name, AnomalyKind::CrossedArray);
                return Vec::new();
            }
        };

        match (def.kind, value) {
            (SectionKind::Struct, Value::Struct(_) | Value::Scalar(_)) => {
                vec![(key.clone(), value)]
            }
            (SectionKind::Struct, Value::Array(_)) => {
                diagnostics.record_anomaly(&def.name, AnomalyKind::StructGotArray);
                Vec::new()
            }
            (SectionKind::Array, Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter(|(_, item)| !item.is_null())
                .map(|(ordinal, item)| (key.child(ordinal), item))
                .collect(),
            // a lone value stored without its array
            (SectionKind::Array, Value::Struct(_) | Value::Scalar(_)) => {
                match self.options.array_policy {
                    ArrayPolicy::Normalize => {
                        diagnostics.record_normalized_array(&def.name);
                        vec![(key.child(0), value)]
                    }
                    ArrayPolicy::Anomaly => {
                        let kind = match value {
                            Value::Scalar(_) => AnomalyKind::UnexpectedScalar,
                            _ => AnomalyKind::ArrayGotStruct,
                        };
                        diagnostics.record_anomaly(&def.name, kind);
                        Vec::new()
                    }
                }
            }
            (_, Value::Null) => Vec::new(),
        }
    }
}

/// One-shot flattening of a document against `target_component`.
pub fn flatten<'a>(
    document_id: &'a str,
    document: &'a Value,
    schema: &'a SchemaTree,
    target_component: &str,
) -> Result<Flattened<'a>, SchemaError> {
    let flattener = Flattener::new(schema, target_component, FlattenOptions::default())?;
    Ok(flattener.flatten(document_id, document))
}
