use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use super::{Module, PackageId};
use crate::error::{Error, Result};

/// A package together with its own direct imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    #[serde(flatten)]
    pub id: PackageId,
    pub imports: Vec<PackageId>,
}

/// The result of analyzing one module.
#[derive(Debug, Clone, Serialize)]
pub struct Analyzed {
    pub module: Module,
    /// Direct dependencies of the module.
    pub imports: Vec<PackageId>,
    /// Every transitive dependency, each with its own edges.
    pub dependencies: Vec<Dependency>,
    /// Ecosystem-specific extras (lockfile version, strategy used, ...).
    pub metadata: serde_json::Value,
}

impl Analyzed {
    /// Build a result, rejecting imports that are missing from `dependencies`.
    pub fn new(
        module: Module,
        imports: Vec<PackageId>,
        dependencies: Vec<Dependency>,
        metadata: serde_json::Value,
    ) -> Result<Self> {
        let analyzed = Self {
            module,
            imports,
            dependencies,
            metadata,
        };
        analyzed.check()?;
        Ok(analyzed)
    }

    /// Every direct import must also be one of the dependencies.
    pub fn check(&self) -> Result<()> {
        let known: HashSet<&PackageId> = self.dependencies.iter().map(|d| &d.id).collect();
        match self.imports.iter().find(|id| !known.contains(id)) {
            Some(missing) => Err(Error::InconsistentGraph {
                module: self.module.name.clone(),
                package: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn dependency(&self, id: &PackageId) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| &d.id == id)
    }
}

/// Accumulates a dependency graph, merging repeated packages by identity.
///
/// Adapters feed it nodes, edges and direct imports in any order; `finish`
/// returns the import list and the closed dependency set, in a stable order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    imports: BTreeSet<PackageId>,
    nodes: BTreeMap<PackageId, BTreeSet<PackageId>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: PackageId) {
        self.nodes.entry(id).or_default();
    }

    /// Record that `from` imports `to`. Both become nodes.
    pub fn add_edge(&mut self, from: PackageId, to: PackageId) {
        self.nodes.entry(to.clone()).or_default();
        self.nodes.entry(from).or_default().insert(to);
    }

    /// Record a direct import of the module. It also becomes a node.
    pub fn add_import(&mut self, id: PackageId) {
        self.nodes.entry(id.clone()).or_default();
        self.imports.insert(id);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Mark every node nothing else imports as a direct import.
    pub fn import_roots(&mut self) {
        let imported: HashSet<&PackageId> = self.nodes.values().flatten().collect();
        let roots: Vec<PackageId> = self
            .nodes
            .keys()
            .filter(|id| !imported.contains(id))
            .cloned()
            .collect();
        self.imports.extend(roots);
    }

    pub fn finish(self) -> (Vec<PackageId>, Vec<Dependency>) {
        let imports = self.imports.into_iter().collect();
        let dependencies = self
            .nodes
            .into_iter()
            .map(|(id, imports)| Dependency {
                id,
                imports: imports.into_iter().collect(),
            })
            .collect();
        (imports, dependencies)
    }

    pub fn into_analyzed(self, module: Module, metadata: serde_json::Value) -> Result<Analyzed> {
        let (imports, dependencies) = self.finish();
        Analyzed::new(module, imports, dependencies, metadata)
    }
}
