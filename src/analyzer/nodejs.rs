use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::walk::{self, SKIPPED_DIRS};
use super::{read_file, target_file, Analyzer, Build, Discover};
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, Type};

const FETCHER: &str = "npm";

/// Sections of a manifest whose entries are direct imports.
const DEPENDENCY_SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
];

/// Analyzer for NPM and Yarn projects.
///
/// Reads the full graph from `package-lock.json` (lockfile v2/v3). Without a
/// lockfile, falls back to the ranges declared in `package.json`.
pub struct NodejsAnalyzer {
    runner: Arc<dyn CommandRunner>,
}

impl NodejsAnalyzer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Analyzer for NodejsAnalyzer {
    fn module_type(&self) -> Type {
        Type::Nodejs
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        let (lock, manifest) = manifest_paths(module);
        if lock.exists() {
            let (graph, version) = parse_package_lock_json(&lock)?;
            debug!(module = %module.name, lock = %lock.display(), packages = graph.len(), "read package-lock.json");
            return graph.into_analyzed(
                module.clone(),
                json!({ "source": "package-lock.json", "lockfileVersion": version }),
            );
        }

        warn!(module = %module.name, "no package-lock.json, using declared ranges from package.json");
        let graph = parse_package_json(&manifest)?;
        graph.into_analyzed(module.clone(), json!({ "source": "package.json" }))
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }

    fn builder(&self) -> Option<&dyn Build> {
        Some(self)
    }
}

impl Discover for NodejsAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        let manifests = walk::find_files(dir, SKIPPED_DIRS, |p| walk::file_name(p) == "package.json")?;

        let mut modules = Vec::new();
        for manifest in manifests {
            let Some(module_dir) = manifest.parent() else {
                continue;
            };
            let name = read_file(&manifest)
                .ok()
                .and_then(|content| serde_json::from_str::<Value>(&content).ok())
                .and_then(|json| json.get("name").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| walk::module_name(dir, module_dir));

            modules.push(Module::new(
                name,
                manifest.to_string_lossy(),
                module_dir,
                Type::Nodejs,
            ));
        }
        Ok(modules)
    }
}

impl Build for NodejsAnalyzer {
    fn build(&self, module: &Module) -> Result<()> {
        let command = if module.dir.join("yarn.lock").exists() {
            Command::new("yarn").args(["install", "--frozen-lockfile"])
        } else if module.dir.join("package-lock.json").exists() {
            Command::new("npm").arg("ci")
        } else {
            Command::new("npm").arg("install")
        };
        self.runner.run(&command.dir(&module.dir))?;
        Ok(())
    }

    /// npm and yarn write these into `node_modules` once an install
    /// completes. An interrupted install leaves `node_modules` without them.
    fn is_built(&self, module: &Module) -> Result<bool> {
        let node_modules = module.dir.join("node_modules");
        Ok(INSTALL_MARKERS
            .iter()
            .any(|marker| node_modules.join(marker).is_file()))
    }
}

const INSTALL_MARKERS: &[&str] = &[".package-lock.json", ".yarn-integrity"];

/// The lockfile and manifest to read for a module. A target naming a
/// `package-lock.json` is read directly; a target naming a manifest is read
/// alongside the lockfile next to it.
fn manifest_paths(module: &Module) -> (PathBuf, PathBuf) {
    match target_file(module) {
        Some(target) if walk::file_name(&target) == "package-lock.json" => {
            let manifest = target.with_file_name("package.json");
            (target, manifest)
        }
        Some(target) => (target.with_file_name("package-lock.json"), target),
        None => (
            module.dir.join("package-lock.json"),
            module.dir.join("package.json"),
        ),
    }
}

/// Name of the package installed at a lockfile path:
/// `node_modules/a/node_modules/@scope/b` → `@scope/b`.
fn package_name(pkg_path: &str) -> &str {
    match pkg_path.rfind("node_modules/") {
        Some(i) => &pkg_path[i + "node_modules/".len()..],
        None => pkg_path,
    }
}

/// Resolve `name` the way Node does, starting at the package installed at
/// `from` and walking up through enclosing `node_modules` directories.
fn resolve_install_path(packages: &Map<String, Value>, from: &str, name: &str) -> Option<String> {
    let mut base = from.to_string();
    loop {
        let candidate = if base.is_empty() {
            format!("node_modules/{name}")
        } else {
            format!("{base}/node_modules/{name}")
        };
        if packages.contains_key(&candidate) {
            return Some(candidate);
        }
        if base.is_empty() {
            return None;
        }
        base = match base.rfind("node_modules/") {
            Some(i) => base[..i].trim_end_matches('/').to_string(),
            None => String::new(),
        };
    }
}

/// `https://registry.npmjs.org/express/-/express-4.18.2.tgz` → `https://registry.npmjs.org`
fn registry_origin(resolved: &str) -> String {
    let Some(scheme_end) = resolved.find("://") else {
        return String::new();
    };
    let host_start = scheme_end + 3;
    match resolved[host_start..].find('/') {
        Some(i) => resolved[..host_start + i].to_string(),
        None => resolved.to_string(),
    }
}

fn declared_names(entry: &Value) -> Vec<String> {
    DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| entry.get(*section).and_then(Value::as_object))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

/// Parse `package-lock.json` v2/v3 (the `packages` map), returning the graph
/// and the lockfile version.
fn parse_package_lock_json(lock_path: &Path) -> Result<(GraphBuilder, u64)> {
    let content = read_file(lock_path)?;
    let json: Value =
        serde_json::from_str(&content).map_err(|e| Error::manifest(lock_path, e))?;
    let version = json.get("lockfileVersion").and_then(Value::as_u64).unwrap_or(1);

    let packages = json
        .get("packages")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Error::manifest(
                lock_path,
                format!("lockfile version {version} has no `packages` map; regenerate it with npm 7 or later"),
            )
        })?;

    let mut ids: BTreeMap<&str, PackageId> = BTreeMap::new();
    for (pkg_path, info) in packages {
        // The root entry and workspace links are not installed packages.
        if !pkg_path.contains("node_modules/") || info.get("link").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        let version = info
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("*")
            .to_string();
        let location = info
            .get("resolved")
            .and_then(Value::as_str)
            .map(registry_origin)
            .unwrap_or_default();
        ids.insert(
            pkg_path.as_str(),
            PackageId::new(FETCHER, location, package_name(pkg_path), version),
        );
    }

    let mut graph = GraphBuilder::new();
    for (pkg_path, id) in &ids {
        graph.add_node(id.clone());
        for name in declared_names(&packages[*pkg_path]) {
            // Optional and peer dependencies may legitimately be absent.
            if let Some(target) = resolve_install_path(packages, pkg_path, &name)
                .and_then(|p| ids.get(p.as_str()))
            {
                graph.add_edge(id.clone(), target.clone());
            }
        }
    }

    match packages.get("") {
        Some(root) => {
            for name in declared_names(root) {
                if let Some(target) = resolve_install_path(packages, "", &name)
                    .and_then(|p| ids.get(p.as_str()))
                {
                    graph.add_import(target.clone());
                }
            }
        }
        None => graph.import_roots(),
    }

    Ok((graph, version))
}

/// Parse `package.json` declared dependencies. Ranges are kept as revisions
/// with their operator stripped.
fn parse_package_json(path: &Path) -> Result<GraphBuilder> {
    let content = read_file(path)?;
    let json: Value = serde_json::from_str(&content).map_err(|e| Error::manifest(path, e))?;
    let mut graph = GraphBuilder::new();

    for section in DEPENDENCY_SECTIONS {
        if let Some(pkgs) = json.get(*section).and_then(Value::as_object) {
            for (name, version_range) in pkgs {
                let version = version_range
                    .as_str()
                    .unwrap_or("*")
                    .trim_start_matches(|c: char| !c.is_ascii_digit() && c != '*')
                    .to_string();
                graph.add_import(PackageId::new(FETCHER, "", name.clone(), version));
            }
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::exec::testing::FakeRunner;

    const LOCK: &str = r#"{
  "name": "my-app",
  "lockfileVersion": 3,
  "packages": {
    "": {
      "name": "my-app",
      "version": "1.0.0",
      "dependencies": { "express": "^4.18.2" },
      "devDependencies": { "jest": "^29.0.0" }
    },
    "node_modules/express": {
      "version": "4.18.2",
      "resolved": "https://registry.npmjs.org/express/-/express-4.18.2.tgz",
      "dependencies": { "qs": "6.11.0", "debug": "2.6.9" }
    },
    "node_modules/express/node_modules/debug": {
      "version": "2.6.9",
      "dependencies": { "ms": "2.0.0" }
    },
    "node_modules/debug": { "version": "4.3.4", "dependencies": { "ms": "2.1.2" } },
    "node_modules/ms": { "version": "2.1.2" },
    "node_modules/express/node_modules/ms": { "version": "2.0.0" },
    "node_modules/qs": { "version": "6.11.0" },
    "node_modules/jest": { "version": "29.7.0", "dependencies": { "debug": "^4.3.4" } },
    "packages/local": { "link": true }
  }
}"#;

    fn npm(name: &str, version: &str) -> PackageId {
        PackageId::new("npm", "", name, version)
    }

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn analyzer() -> NodejsAnalyzer {
        NodejsAnalyzer::new(Arc::new(FakeRunner::new()))
    }

    #[test]
    fn test_parse_package_lock_json() {
        let dir = project(&[("package-lock.json", LOCK)]);
        let (graph, version) = parse_package_lock_json(&dir.path().join("package-lock.json")).unwrap();
        assert_eq!(version, 3);

        let module = Module::new("my-app", "package.json", dir.path(), Type::Nodejs);
        let analyzed = graph.into_analyzed(module, Value::Null).unwrap();
        assert_eq!(analyzed.dependencies.len(), 7);

        let express = PackageId::new("npm", "https://registry.npmjs.org", "express", "4.18.2");
        assert_eq!(analyzed.imports, vec![npm("jest", "29.7.0"), express.clone()]);

        // express resolves its nested debug@2, jest resolves the hoisted debug@4
        let edges = &analyzed.dependency(&express).unwrap().imports;
        assert!(edges.contains(&npm("debug", "2.6.9")));
        assert!(edges.contains(&npm("qs", "6.11.0")));
        let jest = &analyzed.dependency(&npm("jest", "29.7.0")).unwrap().imports;
        assert_eq!(jest, &vec![npm("debug", "4.3.4")]);
        let nested_debug = &analyzed.dependency(&npm("debug", "2.6.9")).unwrap().imports;
        assert_eq!(nested_debug, &vec![npm("ms", "2.0.0")]);
    }

    #[test]
    fn test_lockfile_v1_is_rejected() {
        let dir = project(&[("package-lock.json", r#"{"lockfileVersion": 1, "dependencies": {}}"#)]);
        let err = parse_package_lock_json(&dir.path().join("package-lock.json")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Manifest);
    }

    #[test]
    fn test_falls_back_to_package_json() {
        let dir = project(&[(
            "package.json",
            r#"{
  "name": "my-app",
  "dependencies": { "express": "^4.18.2", "lodash": "~4.17.21" },
  "devDependencies": { "jest": "^29.0.0" }
}"#,
        )]);
        let module = Module::new("my-app", "package.json", dir.path(), Type::Nodejs);
        let analyzed = analyzer().analyze(&module).unwrap();
        assert_eq!(analyzed.imports.len(), 3);
        assert!(analyzed.imports.contains(&npm("lodash", "4.17.21")));
        assert_eq!(analyzed.metadata["source"], "package.json");
    }

    #[test]
    fn test_discover_uses_manifest_name() {
        let dir = project(&[
            ("package.json", r#"{"name": "root-app"}"#),
            ("web/package.json", "{}"),
            ("web/node_modules/x/package.json", r#"{"name": "x"}"#),
        ]);
        let modules = analyzer().discover(dir.path()).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["root-app", "web"]);
        assert_eq!(modules[1].dir, dir.path().join("web"));
    }

    #[test]
    fn test_build_runs_even_when_installed() {
        let dir = project(&[("package.json", "{}"), ("package-lock.json", LOCK)]);
        let runner = Arc::new(FakeRunner::new());
        let analyzer = NodejsAnalyzer::new(runner.clone());
        let module = Module::new("my-app", "package.json", dir.path(), Type::Nodejs);

        assert!(!analyzer.is_built(&module).unwrap());
        analyzer.build(&module).unwrap();
        // the fake runner installs nothing, so simulate what npm ci leaves behind
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/.package-lock.json"), "{}").unwrap();
        assert!(analyzer.is_built(&module).unwrap());

        analyzer.build(&module).unwrap();
        assert_eq!(runner.programs(), vec!["npm ci", "npm ci"]);
    }

    #[test]
    fn test_interrupted_install_is_not_built() {
        let dir = project(&[("package.json", "{}"), ("package-lock.json", LOCK)]);
        let runner = Arc::new(
            FakeRunner::new()
                .creates(dir.path().join("node_modules/express"))
                .fail("npm", "ETIMEDOUT"),
        );
        let analyzer = NodejsAnalyzer::new(runner);
        let module = Module::new("my-app", "package.json", dir.path(), Type::Nodejs);

        assert!(analyzer.build(&module).is_err());
        assert!(dir.path().join("node_modules").is_dir());
        assert!(!analyzer.is_built(&module).unwrap());
    }

    #[test]
    fn test_yarn_install_marker_counts_as_built() {
        let dir = project(&[("package.json", "{}"), ("node_modules/.yarn-integrity", "{}")]);
        let module = Module::new("my-app", "package.json", dir.path(), Type::Nodejs);
        assert!(analyzer().is_built(&module).unwrap());
    }

    #[test]
    fn test_target_selects_manifest() {
        let dir = project(&[
            ("package-lock.json", LOCK),
            ("tools/package.json", r#"{"devDependencies": {"eslint": "^8.57.0"}}"#),
        ]);

        let mut module = Module::new("tools", "tools/package.json", dir.path(), Type::Nodejs);
        let analyzed = analyzer().analyze(&module).unwrap();
        assert_eq!(analyzed.imports, vec![npm("eslint", "8.57.0")]);
        assert_eq!(analyzed.metadata["source"], "package.json");

        module.target = "package-lock.json".to_string();
        let analyzed = analyzer().analyze(&module).unwrap();
        assert_eq!(analyzed.imports.len(), 2);
        assert_eq!(analyzed.metadata["source"], "package-lock.json");
    }

    #[test]
    fn test_registry_origin() {
        assert_eq!(
            registry_origin("https://registry.npmjs.org/qs/-/qs-6.11.0.tgz"),
            "https://registry.npmjs.org"
        );
        assert_eq!(registry_origin("file:../local"), "");
    }
}
