use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::walk::{self, SKIPPED_DIRS};
use super::{read_file, target_file, Analyzer, Discover};
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, PythonStrategy, Type};

const FETCHER: &str = "pip";

/// Manifests that mark a Python module, in priority order.
const MANIFESTS: &[&str] = &["Pipfile.lock", "requirements.txt", "pyproject.toml"];

/// Analyzer for Python projects.
///
/// With the default `requirements` strategy, a target naming a file reads
/// just that file: `Pipfile.lock`, any `*.toml` as a pyproject, anything
/// else as a requirements file (`requirements-dev.txt`, `constraints.in`).
/// A directory target reads every manifest present in priority order:
/// `Pipfile.lock` (pinned) → `requirements.txt` → `pyproject.toml`.
/// Packages are deduplicated by name, case-insensitively, and the first
/// manifest to mention a package wins.
/// The `pipdeptree` strategy asks the installed environment for its graph.
///
/// There is no build step: installing into the user's environment is left
/// to the user.
pub struct PipAnalyzer {
    runner: Arc<dyn CommandRunner>,
}

impl PipAnalyzer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn analyze_manifests(&self, module: &Module) -> Result<Analyzed> {
        let manifests: Vec<PathBuf> = match target_file(module) {
            Some(target) => vec![target],
            None => MANIFESTS
                .iter()
                .map(|m| module.dir.join(m))
                .filter(|p| p.is_file())
                .collect(),
        };
        if manifests.is_empty() {
            return Err(Error::manifest(
                &module.dir,
                "no Pipfile.lock, requirements.txt or pyproject.toml",
            ));
        }

        let mut graph = GraphBuilder::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut sources = Vec::new();
        for path in &manifests {
            for (name, version) in parse_manifest(path)? {
                if seen.insert(name.to_lowercase()) {
                    graph.add_import(PackageId::new(FETCHER, "", name, version));
                }
            }
            sources.push(walk::file_name(path).to_string());
        }
        debug!(module = %module.name, ?sources, packages = graph.len(), "read python manifests");

        graph.into_analyzed(module.clone(), json!({ "strategy": "requirements", "sources": sources }))
    }

    fn analyze_pipdeptree(&self, module: &Module) -> Result<Analyzed> {
        let output = self
            .runner
            .run(&Command::new("pipdeptree").arg("--json").dir(&module.dir))?;
        let graph = parse_pipdeptree(&output.stdout)
            .map_err(|e| Error::manifest(&module.dir, format!("unreadable pipdeptree output: {e}")))?;
        debug!(module = %module.name, packages = graph.len(), "read pipdeptree output");
        graph.into_analyzed(module.clone(), json!({ "strategy": "pipdeptree" }))
    }
}

impl Analyzer for PipAnalyzer {
    fn module_type(&self) -> Type {
        Type::Pip
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        match module.options.python().strategy {
            PythonStrategy::Requirements => self.analyze_manifests(module),
            PythonStrategy::Pipdeptree => self.analyze_pipdeptree(module),
        }
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }
}

impl Discover for PipAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        let found = walk::find_files(dir, SKIPPED_DIRS, |p| MANIFESTS.contains(&walk::file_name(p)))?;

        // One module per directory, targeting the directory so every
        // manifest in it is read.
        let mut modules: Vec<Module> = Vec::new();
        for manifest in found {
            let Some(module_dir) = manifest.parent() else {
                continue;
            };
            if modules.iter().any(|m| m.dir == module_dir) {
                continue;
            }
            modules.push(Module::new(
                walk::module_name(dir, module_dir),
                module_dir.to_string_lossy(),
                module_dir,
                Type::Pip,
            ));
        }
        Ok(modules)
    }
}

fn parse_manifest(path: &Path) -> Result<Vec<(String, String)>> {
    if walk::file_name(path) == "Pipfile.lock" {
        parse_pipfile_lock(path)
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        parse_pyproject_toml(path)
    } else {
        parse_requirements_txt(path)
    }
}

/// Parse a requirements file. `name==version` keeps its version; any other
/// specifier, or none, gets revision `*`. Options, URLs and local paths are
/// skipped.
fn parse_requirements_txt(path: &Path) -> Result<Vec<(String, String)>> {
    let content = read_file(path)?;
    let re = Regex::new(
        r"^([A-Za-z0-9][A-Za-z0-9_.\-]*)(?:\[[^\]]*\])?\s*(?:==\s*([^\s;,=]+))?(?:\s*[<>=!~;,@].*|\s+--.*)?$",
    )
    .map_err(|e| Error::manifest(path, e))?;
    let mut deps = Vec::new();

    for line in content.lines() {
        let line = line.split_once('#').map_or(line, |(before, _)| before);
        let line = line.trim().trim_end_matches('\\').trim_end();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        match re.captures(line) {
            Some(caps) => {
                let version = caps.get(2).map_or("*", |m| m.as_str());
                deps.push((caps[1].to_string(), version.to_string()));
            }
            None => debug!(path = %path.display(), line, "skipping requirement"),
        }
    }

    Ok(deps)
}

/// Parse `Pipfile.lock`: JSON with `default` and `develop` sections.
fn parse_pipfile_lock(path: &Path) -> Result<Vec<(String, String)>> {
    let content = read_file(path)?;
    let json: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| Error::manifest(path, e))?;
    let mut deps = Vec::new();

    for section in &["default", "develop"] {
        if let Some(pkgs) = json.get(section).and_then(|v| v.as_object()) {
            for (name, info) in pkgs {
                let version = info
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("*")
                    .trim_start_matches("==")
                    .to_string();
                deps.push((name.clone(), version));
            }
        }
    }

    Ok(deps)
}

#[derive(Debug, Deserialize)]
struct Pyproject {
    project: Option<PyprojectProject>,
}

#[derive(Debug, Deserialize)]
struct PyprojectProject {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse `pyproject.toml` `[project].dependencies`. Unpinned entries get
/// revision `*`.
fn parse_pyproject_toml(path: &Path) -> Result<Vec<(String, String)>> {
    let content = read_file(path)?;
    let pyproject: Pyproject = toml::from_str(&content).map_err(|e| Error::manifest(path, e))?;

    let re = Regex::new(r"^([A-Za-z0-9_\-\.]+)(?:\[[^\]]*\])?\s*(?:==\s*([^\s;,]+))?")
        .map_err(|e| Error::manifest(path, e))?;
    let mut deps = Vec::new();

    if let Some(project) = pyproject.project {
        for dep_str in &project.dependencies {
            if let Some(caps) = re.captures(dep_str) {
                let version = caps
                    .get(2)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "*".to_string());
                deps.push((caps[1].to_string(), version));
            }
        }
    }

    Ok(deps)
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    package: TreePackage,
    #[serde(default)]
    dependencies: Vec<TreePackage>,
}

#[derive(Debug, Deserialize)]
struct TreePackage {
    package_name: String,
    installed_version: Option<String>,
}

impl TreePackage {
    fn id(&self) -> PackageId {
        PackageId::new(
            FETCHER,
            "",
            self.package_name.clone(),
            self.installed_version.clone().unwrap_or_else(|| "*".to_string()),
        )
    }
}

/// Parse `pipdeptree --json`. Packages nothing else depends on are the
/// direct imports.
fn parse_pipdeptree(stdout: &str) -> std::result::Result<GraphBuilder, serde_json::Error> {
    let entries: Vec<TreeEntry> = serde_json::from_str(stdout)?;
    let mut graph = GraphBuilder::new();
    for entry in &entries {
        let from = entry.package.id();
        graph.add_node(from.clone());
        for dep in &entry.dependencies {
            graph.add_edge(from.clone(), dep.id());
        }
    }
    graph.import_roots();
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::error::ErrorKind;
    use crate::exec::testing::FakeRunner;
    use crate::module::{EcosystemOptions, Options, PythonOptions};

    fn pip(name: &str, version: &str) -> PackageId {
        PackageId::new("pip", "", name, version)
    }

    #[test]
    fn test_parse_requirements_txt() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "requests==2.28.1").unwrap();
        writeln!(f, "flask>=2.0.0").unwrap();
        writeln!(f, "numpy==1.24.0 ; python_version >= '3.8'").unwrap();
        writeln!(f, "uvicorn[standard]==0.22.0  # server").unwrap();
        writeln!(f, "git+https://github.com/org/lib.git#egg=lib").unwrap();
        writeln!(f, "-r base.txt").unwrap();
        writeln!(f, "django==4.2.7 \\").unwrap();
        writeln!(f, "    --hash=sha256:ccb3b3").unwrap();
        writeln!(f, "attrs").unwrap();

        let deps = parse_requirements_txt(f.path()).unwrap();
        let names: Vec<_> = deps.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["requests", "flask", "numpy", "uvicorn", "django", "attrs"]);
        assert_eq!(deps[0], ("requests".to_string(), "2.28.1".to_string()));
        assert_eq!(deps[1], ("flask".to_string(), "*".to_string()));
        assert_eq!(deps[2].1, "1.24.0");
        assert_eq!(deps[3], ("uvicorn".to_string(), "0.22.0".to_string()));
        assert_eq!(deps[4].1, "4.2.7");
        assert_eq!(deps[5].1, "*");
    }

    #[test]
    fn test_unpinned_requirements_are_imports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask>=2.0\nrequests~=2.31\n").unwrap();

        let module = Module::new("svc", ".", dir.path(), Type::Pip);
        let analyzed = PipAnalyzer::new(Arc::new(FakeRunner::new()))
            .analyze(&module)
            .unwrap();
        assert_eq!(analyzed.imports, vec![pip("flask", "*"), pip("requests", "*")]);
    }

    #[test]
    fn test_target_file_is_read_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "requests==2.31.0\n").unwrap();
        std::fs::write(dir.path().join("requirements-dev.txt"), "pytest==7.4.0\n").unwrap();
        std::fs::create_dir(dir.path().join("tools")).unwrap();
        std::fs::write(
            dir.path().join("tools/pyproject.toml"),
            "[project]\nname = \"tools\"\ndependencies = [\"black==23.9.1\"]\n",
        )
        .unwrap();
        let analyzer = PipAnalyzer::new(Arc::new(FakeRunner::new()));

        let mut module = Module::new("svc", "requirements-dev.txt", dir.path(), Type::Pip);
        let analyzed = analyzer.analyze(&module).unwrap();
        assert_eq!(analyzed.imports, vec![pip("pytest", "7.4.0")]);
        assert_eq!(analyzed.metadata["sources"], json!(["requirements-dev.txt"]));

        module.target = "tools/pyproject.toml".to_string();
        let analyzed = analyzer.analyze(&module).unwrap();
        assert_eq!(analyzed.imports, vec![pip("black", "23.9.1")]);

        module.target = ".".to_string();
        let analyzed = analyzer.analyze(&module).unwrap();
        assert_eq!(analyzed.imports, vec![pip("requests", "2.31.0")]);
    }

    #[test]
    fn test_manifests_are_merged_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Pipfile.lock"),
            r#"{"default": {"Requests": {"version": "==2.31.0"}}, "develop": {}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "requests==2.28.1\nidna==3.4\n").unwrap();

        let module = Module::new("svc", ".", dir.path(), Type::Pip);
        let analyzed = PipAnalyzer::new(Arc::new(FakeRunner::new()))
            .analyze(&module)
            .unwrap();
        assert_eq!(analyzed.imports, vec![pip("Requests", "2.31.0"), pip("idna", "3.4")]);
        assert_eq!(analyzed.metadata["sources"][0], "Pipfile.lock");
    }

    #[test]
    fn test_missing_manifests_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let module = Module::new("svc", "", dir.path(), Type::Pip);
        let err = PipAnalyzer::new(Arc::new(FakeRunner::new()))
            .analyze(&module)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);
    }

    #[test]
    fn test_pipdeptree_strategy() {
        let tree = r#"[
  {"package": {"key": "flask", "package_name": "Flask", "installed_version": "2.3.2"},
   "dependencies": [
     {"key": "jinja2", "package_name": "Jinja2", "installed_version": "3.1.2", "required_version": ">=3.1.2"},
     {"key": "click", "package_name": "click", "installed_version": "8.1.3", "required_version": ">=8.1.3"}
   ]},
  {"package": {"key": "jinja2", "package_name": "Jinja2", "installed_version": "3.1.2"},
   "dependencies": [
     {"key": "markupsafe", "package_name": "MarkupSafe", "installed_version": "2.1.3", "required_version": ">=2.0"}
   ]},
  {"package": {"key": "click", "package_name": "click", "installed_version": "8.1.3"}, "dependencies": []},
  {"package": {"key": "markupsafe", "package_name": "MarkupSafe", "installed_version": "2.1.3"}, "dependencies": []}
]"#;
        let runner = Arc::new(FakeRunner::new().respond("pipdeptree", tree));
        let analyzer = PipAnalyzer::new(runner.clone());
        let module = Module::new("svc", "", "/src/svc", Type::Pip).with_options(Options {
            allow_unbuilt: false,
            ecosystem: EcosystemOptions::Python(PythonOptions {
                strategy: PythonStrategy::Pipdeptree,
            }),
        });

        let analyzed = analyzer.analyze(&module).unwrap();
        assert_eq!(analyzed.imports, vec![pip("Flask", "2.3.2")]);
        assert_eq!(analyzed.dependencies.len(), 4);
        let jinja = analyzed.dependency(&pip("Jinja2", "3.1.2")).unwrap();
        assert_eq!(jinja.imports, vec![pip("MarkupSafe", "2.1.3")]);
        assert_eq!(runner.programs(), vec!["pipdeptree --json"]);
    }

    #[test]
    fn test_pipdeptree_failure_is_typed() {
        let runner = Arc::new(FakeRunner::new().fail("pipdeptree", "No module named pipdeptree"));
        let module = Module::new("svc", "", "/src/svc", Type::Pip).with_options(Options {
            allow_unbuilt: false,
            ecosystem: EcosystemOptions::Python(PythonOptions {
                strategy: PythonStrategy::Pipdeptree,
            }),
        });
        let err = PipAnalyzer::new(runner).analyze(&module).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exec);
    }

    #[test]
    fn test_discover_one_module_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/requirements.txt"), "").unwrap();
        std::fs::write(dir.path().join("api/pyproject.toml"), "").unwrap();
        std::fs::create_dir(dir.path().join(".venv")).unwrap();
        std::fs::write(dir.path().join(".venv/requirements.txt"), "").unwrap();

        let modules = PipAnalyzer::new(Arc::new(FakeRunner::new()))
            .discover(dir.path())
            .unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "api");
        assert_eq!(modules[0].target, dir.path().join("api").to_string_lossy());
    }
}
