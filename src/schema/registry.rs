//! Typed, validated form of a mapping's section/column metadata.
//!
//! A [`SchemaTree`] is built once per run and is read-only afterwards, so
//! it can be shared across worker threads by reference.

use crate::error::{RunError, SchemaError};
use crate::schema::catalog::{Mapping, MappingKey, MetadataStore};
use crate::schema::types::{ColumnDef, SectionDef};
use crate::value::Path;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Index of a section inside its [`SchemaTree`]
pub type SectionId = usize;

#[derive(Debug, Clone)]
pub struct SchemaTree {
    key: MappingKey,
    component_container: Option<Path>,
    sections: Vec<SectionDef>,
    roots: Vec<SectionId>,
    children: Vec<Vec<SectionId>>,
    columns: Vec<Vec<ColumnDef>>,
    by_name: HashMap<String, Vec<SectionId>>,
}

impl SchemaTree {
    /// Fetch the mapping for `key` from the metadata store and validate it.
    pub fn load(store: &dyn MetadataStore, key: &MappingKey) -> Result<Self, RunError> {
        let mapping = store
            .mapping(key)?
            .ok_or_else(|| SchemaError::MappingNotFound(key.clone()))?;
        Ok(Self::build(mapping)?)
    }

    /// Validate raw metadata rows and build the parent/children and
    /// section/columns indexes.
    pub fn build(mapping: Mapping) -> Result<Self, SchemaError> {
        let Mapping {
            key,
            component_container,
            sections,
            columns: column_rows,
        } = mapping;

        if sections.is_empty() {
            return Err(SchemaError::EmptyMapping(key));
        }

        let mut by_name: HashMap<String, Vec<SectionId>> = HashMap::new();
        for (id, def) in sections.iter().enumerate() {
            by_name.entry(def.name.clone()).or_default().push(id);
        }

        // Shape of each row on its own, then sibling uniqueness
        let mut seen: HashSet<(Option<&str>, u32, &str)> = HashSet::new();
        for def in &sections {
            match (def.level, &def.parent_name) {
                (0, Some(parent)) => {
                    return Err(SchemaError::RootWithParent {
                        section: def.name.clone(),
                        parent: parent.clone(),
                    });
                }
                (level, None) if level > 0 => {
                    return Err(SchemaError::MissingParent {
                        section: def.name.clone(),
                        level,
                    });
                }
                _ => {}
            }

            if !seen.insert((def.parent_name.as_deref(), def.level, def.name.as_str())) {
                return Err(SchemaError::DuplicateSection {
                    section: def.name.clone(),
                    level: def.level,
                });
            }
        }

        let mut roots = Vec::new();
        let mut children: Vec<Vec<SectionId>> = vec![Vec::new(); sections.len()];
        for (id, def) in sections.iter().enumerate() {
            let Some(parent) = &def.parent_name else {
                roots.push(id);
                continue;
            };
            let parent_id = Self::resolve_parent(&sections, &by_name, def, parent)?;
            children[parent_id].push(id);
        }

        let mut columns: Vec<Vec<ColumnDef>> = vec![Vec::new(); sections.len()];
        let mut column_names = HashSet::new();
        for col in column_rows {
            if !column_names.insert(col.column_name.clone()) {
                return Err(SchemaError::DuplicateColumn(col.column_name));
            }
            let owner = match by_name.get(&col.owning_section_name).map(Vec::as_slice) {
                Some([id]) => *id,
                Some(_) => {
                    return Err(SchemaError::AmbiguousSection {
                        column: col.column_name,
                        section: col.owning_section_name,
                    });
                }
                None => {
                    return Err(SchemaError::UnknownSection {
                        column: col.column_name,
                        section: col.owning_section_name,
                    });
                }
            };
            columns[owner].push(col);
        }
        for cols in &mut columns {
            // stable: equal ordinals keep declaration order
            cols.sort_by_key(|c| c.ordinal);
        }

        let tree = SchemaTree {
            key,
            component_container,
            sections,
            roots,
            children,
            columns,
            by_name,
        };
        for id in tree.columnless_sections() {
            warn!(
                mapping = %tree.key,
                section = %tree.sections[id].name,
                "section has no descendant columns"
            );
        }
        debug!(
            mapping = %tree.key,
            sections = tree.sections.len(),
            roots = tree.roots.len(),
            "schema loaded"
        );
        Ok(tree)
    }

    fn resolve_parent(
        sections: &[SectionDef],
        by_name: &HashMap<String, Vec<SectionId>>,
        def: &SectionDef,
        parent: &str,
    ) -> Result<SectionId, SchemaError> {
        let expected = def.level - 1;
        let Some(candidates) = by_name.get(parent) else {
            return Err(SchemaError::UnknownParent {
                section: def.name.clone(),
                parent: parent.to_owned(),
            });
        };

        let at_level: Vec<SectionId> = candidates
            .iter()
            .copied()
            .filter(|&id| sections[id].level == expected)
            .collect();

        match at_level.as_slice() {
            [id] => Ok(*id),
            [] => Err(SchemaError::LevelMismatch {
                section: def.name.clone(),
                level: def.level,
                parent: parent.to_owned(),
                expected,
            }),
            _ => Err(SchemaError::AmbiguousParent {
                section: def.name.clone(),
                parent: parent.to_owned(),
                level: expected,
            }),
        }
    }

    /// Sections whose whole subtree declares no column, in declaration
    /// order. They are allowed but produce no rows.
    pub fn columnless_sections(&self) -> Vec<SectionId> {
        let mut order: Vec<SectionId> = (0..self.sections.len()).collect();
        order.sort_by_key(|&id| std::cmp::Reverse(self.sections[id].level));

        let mut has_columns = vec![false; self.sections.len()];
        for id in order {
            has_columns[id] = !self.columns[id].is_empty()
                || self.children[id].iter().any(|&child| has_columns[child]);
        }

        (0..self.sections.len()).filter(|&id| !has_columns[id]).collect()
    }

    pub fn key(&self) -> &MappingKey {
        &self.key
    }

    pub fn component_container(&self) -> Option<&Path> {
        self.component_container.as_ref()
    }

    pub fn section(&self, id: SectionId) -> &SectionDef {
        &self.sections[id]
    }

    pub fn sections(&self) -> &[SectionDef] {
        &self.sections
    }

    pub fn roots(&self) -> &[SectionId] {
        &self.roots
    }

    pub fn children(&self, id: SectionId) -> &[SectionId] {
        &self.children[id]
    }

    pub fn columns(&self, id: SectionId) -> &[ColumnDef] {
        &self.columns[id]
    }

    /// Look up the level-0 section requested as the run's component.
    pub fn root(&self, component: &str) -> Result<SectionId, SchemaError> {
        self.by_name
            .get(component)
            .and_then(|ids| ids.iter().copied().find(|&id| self.sections[id].level == 0))
            .ok_or_else(|| SchemaError::UnknownComponent(component.to_owned()))
    }

    /// Children of the named section, in declaration order.
    pub fn children_by_parent(&self, parent: &str) -> Vec<&SectionDef> {
        self.ids_named(parent)
            .flat_map(|id| self.children[id].iter().map(|&c| &self.sections[c]))
            .collect()
    }

    /// Columns owned by the named section, in ordinal order.
    pub fn columns_by_section(&self, section: &str) -> &[ColumnDef] {
        self.ids_named(section)
            .next()
            .map(|id| self.columns[id].as_slice())
            .unwrap_or(&[])
    }

    /// Every column of the mapping, grouped by section in declaration order.
    pub fn all_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().flatten()
    }

    fn ids_named<'a>(&'a self, name: &str) -> impl Iterator<Item = SectionId> + 'a {
        self.by_name.get(name).into_iter().flatten().copied()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::catalog::MetadataCatalog;
    use crate::schema::types::{PathContext, SectionKind, TargetType};

    pub(crate) fn section(
        name: &str,
        path: &str,
        kind: SectionKind,
        level: u32,
        parent: Option<&str>,
    ) -> SectionDef {
        SectionDef {
            name: name.to_string(),
            path: Path::parse(path).unwrap(),
            kind,
            level,
            parent_name: parent.map(str::to_string),
            join_keys: vec![],
        }
    }

    pub(crate) fn column(section: &str, name: &str, path: &str, ordinal: u32) -> ColumnDef {
        ColumnDef {
            owning_section_name: section.to_string(),
            column_name: name.to_string(),
            path: Path::parse(path).unwrap(),
            ordinal,
            path_context: PathContext::Section,
            target_type: TargetType::String,
            transform: None,
        }
    }

    pub(crate) fn mapping(sections: Vec<SectionDef>, columns: Vec<ColumnDef>) -> Mapping {
        Mapping {
            key: MappingKey::new("ccda_raw", "results", "ccd"),
            component_container: None,
            sections,
            columns,
        }
    }

    fn results_mapping() -> Mapping {
        mapping(
            vec![
                section("Results", "Results", SectionKind::Struct, 0, None),
                section("Observations", "entry", SectionKind::Array, 1, Some("Results")),
                section("Ranges", "referenceRange", SectionKind::Array, 2, Some("Observations")),
                section("Vitals", "Vitals", SectionKind::Struct, 0, None),
            ],
            vec![
                column("Observations", "value", "value", 2),
                column("Observations", "code", "code", 1),
                column("Ranges", "low", "low", 1),
            ],
        )
    }

    #[test]
    fn test_build_indexes() {
        let tree = SchemaTree::build(results_mapping()).unwrap();

        assert_eq!(tree.roots().len(), 2);
        let results = tree.root("Results").unwrap();
        assert_eq!(tree.section(results).name, "Results");

        let children: Vec<&str> = tree
            .children_by_parent("Results")
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(children, vec!["Observations"]);

        let cols: Vec<&str> = tree
            .columns_by_section("Observations")
            .iter()
            .map(|c| c.column_name.as_str())
            .collect();
        assert_eq!(cols, vec!["code", "value"]);
        assert!(tree.columns_by_section("Results").is_empty());
        assert_eq!(tree.all_columns().count(), 3);
    }

    #[test]
    fn test_unknown_component() {
        let tree = SchemaTree::build(results_mapping()).unwrap();
        assert_eq!(
            tree.root("Observations"),
            Err(SchemaError::UnknownComponent("Observations".into()))
        );
    }

    #[test]
    fn test_unknown_parent() {
        let m = mapping(
            vec![
                section("Results", "Results", SectionKind::Struct, 0, None),
                section("Observations", "entry", SectionKind::Array, 1, Some("Result")),
            ],
            vec![],
        );
        assert!(matches!(
            SchemaTree::build(m),
            Err(SchemaError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_parent_must_be_one_level_up() {
        let m = mapping(
            vec![
                section("Results", "Results", SectionKind::Struct, 0, None),
                section("Observations", "entry", SectionKind::Array, 1, Some("Results")),
                section("Ranges", "referenceRange", SectionKind::Array, 2, Some("Results")),
            ],
            vec![],
        );
        assert!(matches!(
            SchemaTree::build(m),
            Err(SchemaError::LevelMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn test_root_and_parent_shape() {
        let rooted = mapping(
            vec![section("Results", "Results", SectionKind::Struct, 0, Some("X"))],
            vec![],
        );
        assert!(matches!(
            SchemaTree::build(rooted),
            Err(SchemaError::RootWithParent { .. })
        ));

        let orphan = mapping(
            vec![section("Observations", "entry", SectionKind::Array, 1, None)],
            vec![],
        );
        assert!(matches!(
            SchemaTree::build(orphan),
            Err(SchemaError::MissingParent { level: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let m = mapping(
            vec![
                section("Results", "Results", SectionKind::Struct, 0, None),
                section("Observations", "entry", SectionKind::Array, 1, Some("Results")),
                section("Observations", "other", SectionKind::Array, 1, Some("Results")),
            ],
            vec![],
        );
        assert!(matches!(
            SchemaTree::build(m),
            Err(SchemaError::DuplicateSection { level: 1, .. })
        ));
    }

    #[test]
    fn test_same_name_under_different_parents() {
        let m = mapping(
            vec![
                section("Results", "Results", SectionKind::Struct, 0, None),
                section("Vitals", "Vitals", SectionKind::Struct, 0, None),
                section("Entries", "entry", SectionKind::Array, 1, Some("Results")),
                section("Entries", "entry", SectionKind::Array, 1, Some("Vitals")),
                section("Codes", "code", SectionKind::Struct, 2, Some("Entries")),
            ],
            vec![],
        );
        assert!(matches!(
            SchemaTree::build(m),
            Err(SchemaError::AmbiguousParent { level: 1, .. })
        ));
    }

    #[test]
    fn test_column_validation() {
        let unknown = mapping(
            vec![section("Results", "Results", SectionKind::Struct, 0, None)],
            vec![column("Nope", "code", "code", 1)],
        );
        assert!(matches!(
            SchemaTree::build(unknown),
            Err(SchemaError::UnknownSection { .. })
        ));

        let duplicate = mapping(
            vec![section("Results", "Results", SectionKind::Struct, 0, None)],
            vec![column("Results", "code", "a", 1), column("Results", "code", "b", 2)],
        );
        assert_eq!(
            SchemaTree::build(duplicate).unwrap_err(),
            SchemaError::DuplicateColumn("code".into())
        );
    }

    #[test]
    fn test_columnless_sections() {
        let tree = SchemaTree::build(results_mapping()).unwrap();
        let names: Vec<&str> = tree
            .columnless_sections()
            .into_iter()
            .map(|id| tree.section(id).name.as_str())
            .collect();
        // Results has no columns itself but Observations below it does
        assert_eq!(names, vec!["Vitals"]);

        let mut with_pass_through = results_mapping();
        with_pass_through
            .sections
            .push(section("Notes", "note", SectionKind::Array, 1, Some("Vitals")));
        with_pass_through.columns.push(column("Notes", "text", "text", 1));
        let tree = SchemaTree::build(with_pass_through).unwrap();
        assert!(tree.columnless_sections().is_empty());
    }

    #[test]
    fn test_empty_mapping() {
        assert!(matches!(
            SchemaTree::build(mapping(vec![], vec![])),
            Err(SchemaError::EmptyMapping(_))
        ));
    }

    #[test]
    fn test_load_from_store() {
        let catalog = MetadataCatalog::default().with_mapping(results_mapping());
        let key = MappingKey::new("ccda_raw", "results", "ccd");
        assert!(SchemaTree::load(&catalog, &key).is_ok());

        let missing = MappingKey::new("ccda_raw", "results", "discharge");
        assert!(matches!(
            SchemaTree::load(&catalog, &missing),
            Err(RunError::Schema(SchemaError::MappingNotFound(_)))
        ));
    }
}
