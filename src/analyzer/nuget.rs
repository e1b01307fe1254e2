use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use super::walk::{self, SKIPPED_DIRS};
use super::{read_file, Analyzer, Build, Discover};
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, Type};

const FETCHER: &str = "nuget";

/// Analyzer for .NET projects using NuGet or Paket.
///
/// After `dotnet restore`, `obj/project.assets.json` holds the resolved graph
/// per target framework and is used when present. Otherwise three manifest
/// formats are read for direct references:
/// - SDK-style `*.csproj` / `*.fsproj` (`<PackageReference>` elements)
/// - Legacy `packages.config` (`<package>` elements)
/// - `paket.lock` (NUGET section entries)
pub struct NuGetAnalyzer {
    runner: Arc<dyn CommandRunner>,
}

impl NuGetAnalyzer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn analyze_manifests(&self, module: &Module, framework: Option<&str>) -> Result<Analyzed> {
        let mut graph = GraphBuilder::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut add = |graph: &mut GraphBuilder, name: String, version: String| {
            if seen.insert(format!("{}:{}", name.to_lowercase(), version)) {
                graph.add_import(PackageId::new(FETCHER, "", name, version));
            }
        };

        for project in project_files(&module.dir)? {
            for (name, version) in parse_project_file(&project)? {
                add(&mut graph, name, version);
            }
        }

        let packages_config = module.dir.join("packages.config");
        if packages_config.exists() {
            for (name, version, target) in parse_packages_config(&packages_config)? {
                let matches = match (framework, target.as_deref()) {
                    (Some(wanted), Some(target)) => wanted == target,
                    _ => true,
                };
                if matches {
                    add(&mut graph, name, version);
                }
            }
        }

        let paket_lock = module.dir.join("paket.lock");
        if paket_lock.exists() {
            for (name, version) in parse_paket_lock(&paket_lock)? {
                add(&mut graph, name, version);
            }
        }

        graph.into_analyzed(module.clone(), json!({ "source": "manifests" }))
    }
}

impl Analyzer for NuGetAnalyzer {
    fn module_type(&self) -> Type {
        Type::NuGet
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        let framework = module.options.nuget().target_framework;
        let assets = assets_file(module);
        if assets.exists() {
            let (graph, used) = parse_project_assets(&assets, framework.as_deref())?;
            debug!(module = %module.name, framework = %used, packages = graph.len(), "read project.assets.json");
            return graph.into_analyzed(
                module.clone(),
                json!({ "source": "project.assets.json", "targetFramework": used }),
            );
        }
        self.analyze_manifests(module, framework.as_deref())
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }

    fn builder(&self) -> Option<&dyn Build> {
        Some(self)
    }
}

impl Discover for NuGetAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        let found = walk::find_files(dir, SKIPPED_DIRS, |p| {
            is_project_file(p) || walk::file_name(p) == "packages.config"
        })?;

        let mut modules: Vec<Module> = Vec::new();
        for manifest in found {
            let Some(module_dir) = manifest.parent() else {
                continue;
            };
            // A project file is a better target than packages.config.
            if let Some(existing) = modules.iter_mut().find(|m| m.dir == module_dir) {
                if is_project_file(&manifest) && !is_project_file(Path::new(&existing.target)) {
                    existing.target = manifest.to_string_lossy().into_owned();
                }
                continue;
            }
            modules.push(Module::new(
                walk::module_name(dir, module_dir),
                manifest.to_string_lossy(),
                module_dir,
                Type::NuGet,
            ));
        }
        Ok(modules)
    }
}

impl Build for NuGetAnalyzer {
    fn build(&self, module: &Module) -> Result<()> {
        let mut command = Command::new("dotnet").arg("restore");
        let target = Path::new(&module.target);
        if is_project_file(target) {
            command = command.arg(module.dir.join(target).to_string_lossy());
        }
        self.runner.run(&command.dir(&module.dir))?;
        Ok(())
    }

    /// A failed restore still writes `project.assets.json`, recording the
    /// failure in its `logs`.
    fn is_built(&self, module: &Module) -> Result<bool> {
        let assets = assets_file(module);
        if !assets.is_file() {
            return Ok(false);
        }
        let Ok(json) = serde_json::from_str::<Value>(&read_file(&assets)?) else {
            return Ok(false);
        };
        Ok(!restore_failed(&json))
    }
}

fn restore_failed(assets: &Value) -> bool {
    assets
        .get("logs")
        .and_then(Value::as_array)
        .is_some_and(|logs| {
            logs.iter()
                .any(|log| log.get("level").and_then(Value::as_str) == Some("Error"))
        })
}

fn assets_file(module: &Module) -> PathBuf {
    module.dir.join("obj").join("project.assets.json")
}

fn is_project_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("csproj" | "fsproj" | "vbproj")
    )
}

/// Project files directly under `dir`.
fn project_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| is_project_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Parse the resolved graph for one target framework from
/// `obj/project.assets.json`. Returns the graph and the framework used.
fn parse_project_assets(path: &Path, framework: Option<&str>) -> Result<(GraphBuilder, String)> {
    let content = read_file(path)?;
    let json: Value = serde_json::from_str(&content).map_err(|e| Error::manifest(path, e))?;

    let targets = json
        .get("targets")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::manifest(path, "missing `targets`"))?;
    let (used, libraries) = match framework {
        Some(wanted) => targets
            .iter()
            .find(|(key, _)| key.as_str() == wanted)
            .ok_or_else(|| Error::manifest(path, format!("no target for framework {wanted}")))?,
        // The first framework the project file lists; `targets` keeps file order.
        None => targets
            .iter()
            .next()
            .ok_or_else(|| Error::manifest(path, "no target frameworks"))?,
    };
    let libraries = libraries
        .as_object()
        .ok_or_else(|| Error::manifest(path, format!("target {used} is not an object")))?;

    // Package name (lowercased) -> id, for the packages restored in this target.
    let mut by_name: BTreeMap<String, PackageId> = BTreeMap::new();
    for (key, library) in libraries {
        if library.get("type").and_then(Value::as_str) != Some("package") {
            continue;
        }
        let Some((name, version)) = key.split_once('/') else {
            continue;
        };
        by_name.insert(name.to_lowercase(), PackageId::new(FETCHER, "", name, version));
    }

    let mut graph = GraphBuilder::new();
    for (key, library) in libraries {
        let Some(from) = key
            .split_once('/')
            .and_then(|(name, _)| by_name.get(&name.to_lowercase()))
        else {
            continue;
        };
        graph.add_node(from.clone());
        if let Some(deps) = library.get("dependencies").and_then(Value::as_object) {
            for dep in deps.keys() {
                if let Some(to) = by_name.get(&dep.to_lowercase()) {
                    graph.add_edge(from.clone(), to.clone());
                }
            }
        }
    }

    let direct = json
        .pointer(&format!("/project/frameworks/{}/dependencies", escape_pointer(used)))
        .and_then(Value::as_object);
    match direct {
        Some(direct) => {
            for name in direct.keys() {
                if let Some(id) = by_name.get(&name.to_lowercase()) {
                    graph.add_import(id.clone());
                }
            }
        }
        None => graph.import_roots(),
    }

    Ok((graph, used.clone()))
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Parse `<PackageReference Include="..." Version="..." />` from `.csproj` / `.fsproj`.
fn parse_project_file(path: &Path) -> Result<Vec<(String, String)>> {
    let content = read_file(path)?;
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut deps = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if tag == "PackageReference" {
                    let mut name = String::new();
                    let mut version = String::new();
                    for attr in e.attributes().flatten() {
                        let key =
                            String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                        let val = attr.unescape_value().unwrap_or_default().into_owned();
                        match key.as_str() {
                            "Include" => name = val,
                            "Version" => version = val,
                            _ => {}
                        }
                    }
                    if !name.is_empty() {
                        deps.push((name, version));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::manifest(path, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(deps)
}

/// Parse `<package id="..." version="..." targetFramework="..." />` from
/// `packages.config`.
fn parse_packages_config(path: &Path) -> Result<Vec<(String, String, Option<String>)>> {
    let content = read_file(path)?;
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut deps = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if tag == "package" {
                    let mut id = String::new();
                    let mut version = String::new();
                    let mut target = None;
                    for attr in e.attributes().flatten() {
                        let key =
                            String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                        let val = attr.unescape_value().unwrap_or_default().into_owned();
                        match key.as_str() {
                            "id" => id = val,
                            "version" => version = val,
                            "targetFramework" => target = Some(val),
                            _ => {}
                        }
                    }
                    if !id.is_empty() {
                        deps.push((id, version, target));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::manifest(path, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(deps)
}

/// Parse `paket.lock` NUGET section entries like `    PackageName (1.2.3)`.
fn parse_paket_lock(path: &Path) -> Result<Vec<(String, String)>> {
    let content = read_file(path)?;
    let re = Regex::new(r"^\s{4}(\S+)\s+\(([^)]+)\)").map_err(|e| Error::manifest(path, e))?;
    let mut deps = Vec::new();
    let mut in_nuget = false;

    for line in content.lines() {
        if line.trim_end() == "NUGET" {
            in_nuget = true;
            continue;
        }
        // A new top-level section ends the NUGET block
        if !line.starts_with(' ') && !line.is_empty() {
            in_nuget = false;
        }
        if in_nuget {
            if let Some(caps) = re.captures(line) {
                deps.push((caps[1].to_string(), caps[2].to_string()));
            }
        }
    }

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::exec::testing::FakeRunner;

    const ASSETS: &str = r#"{
  "version": 3,
  "targets": {
    "net8.0": {
      "Serilog/3.1.1": { "type": "package" },
      "Serilog.Sinks.Console/5.0.1": {
        "type": "package",
        "dependencies": { "Serilog": "3.1.1" }
      },
      "Shared/1.0.0": { "type": "project" }
    }
  },
  "project": {
    "frameworks": {
      "net8.0": {
        "dependencies": {
          "Serilog.Sinks.Console": { "target": "Package", "version": "[5.0.1, )" }
        }
      }
    }
  }
}"#;

    fn nuget(name: &str, version: &str) -> PackageId {
        PackageId::new("nuget", "", name, version)
    }

    #[test]
    fn test_parse_csproj() {
        let xml = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="13.0.1" />
    <PackageReference Include="Serilog" Version="2.12.0" />
  </ItemGroup>
</Project>"#;
        let mut f = NamedTempFile::with_suffix(".csproj").unwrap();
        write!(f, "{}", xml).unwrap();
        let deps = parse_project_file(f.path()).unwrap();
        assert_eq!(
            deps,
            vec![
                ("Newtonsoft.Json".to_string(), "13.0.1".to_string()),
                ("Serilog".to_string(), "2.12.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_packages_config_filtered_by_framework() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("packages.config"),
            r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="Newtonsoft.Json" version="13.0.1" targetFramework="net452" />
  <package id="NUnit" version="3.13.3" targetFramework="net48" />
</packages>"#,
        )
        .unwrap();
        let analyzer = NuGetAnalyzer::new(Arc::new(FakeRunner::new()));
        let module = Module::new("legacy", "packages.config", dir.path(), Type::NuGet);

        let analyzed = analyzer.analyze_manifests(&module, Some("net452")).unwrap();
        assert_eq!(analyzed.imports, vec![nuget("Newtonsoft.Json", "13.0.1")]);
        let analyzed = analyzer.analyze_manifests(&module, None).unwrap();
        assert_eq!(analyzed.imports.len(), 2);
    }

    #[test]
    fn test_parse_paket_lock() {
        let content = r#"REFERENCES

NUGET
  remote: https://api.nuget.org/v3/index.json
    Newtonsoft.Json (13.0.1)
    Serilog (2.12.0)

GITHUB
  remote: some/repo
    file.fs
"#;
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{}", content).unwrap();
        let deps = parse_paket_lock(f.path()).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].0, "Newtonsoft.Json");
        assert_eq!(deps[1].0, "Serilog");
    }

    #[test]
    fn test_assets_file_gives_full_graph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("obj")).unwrap();
        std::fs::write(dir.path().join("obj/project.assets.json"), ASSETS).unwrap();
        let analyzer = NuGetAnalyzer::new(Arc::new(FakeRunner::new()));
        let module = Module::new("api", "api.csproj", dir.path(), Type::NuGet);

        assert!(analyzer.is_built(&module).unwrap());
        let analyzed = analyzer.analyze(&module).unwrap();
        assert_eq!(analyzed.imports, vec![nuget("Serilog.Sinks.Console", "5.0.1")]);
        assert_eq!(analyzed.dependencies.len(), 2);
        let sink = analyzed
            .dependency(&nuget("Serilog.Sinks.Console", "5.0.1"))
            .unwrap();
        assert_eq!(sink.imports, vec![nuget("Serilog", "3.1.1")]);
        assert_eq!(analyzed.metadata["targetFramework"], "net8.0");
    }

    #[test]
    fn test_unknown_framework_is_an_error() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{}", ASSETS).unwrap();
        let err = parse_project_assets(f.path(), Some("net48")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Manifest);
    }

    #[test]
    fn test_discover_prefers_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/packages.config"), "<packages/>").unwrap();
        std::fs::write(dir.path().join("api/Api.csproj"), "<Project/>").unwrap();

        let modules = NuGetAnalyzer::new(Arc::new(FakeRunner::new()))
            .discover(dir.path())
            .unwrap();
        assert_eq!(modules.len(), 1);
        assert!(modules[0].target.ends_with("Api.csproj"));
    }

    #[test]
    fn test_first_listed_framework_is_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("obj")).unwrap();
        std::fs::write(
            dir.path().join("obj/project.assets.json"),
            r#"{
  "targets": {
    "net8.0": { "Serilog/3.1.1": { "type": "package" } },
    "net48": { "Serilog/2.12.0": { "type": "package" } }
  }
}"#,
        )
        .unwrap();
        let module = Module::new("api", "api.csproj", dir.path(), Type::NuGet);
        let analyzed = NuGetAnalyzer::new(Arc::new(FakeRunner::new()))
            .analyze(&module)
            .unwrap();
        assert_eq!(analyzed.metadata["targetFramework"], "net8.0");
        assert_eq!(analyzed.imports, vec![nuget("Serilog", "3.1.1")]);
    }

    #[test]
    fn test_failed_restore_is_not_built() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("obj")).unwrap();
        std::fs::write(
            dir.path().join("obj/project.assets.json"),
            r#"{
  "targets": { "net8.0": {} },
  "logs": [
    { "code": "NU1101", "level": "Error", "message": "Unable to find package Nope" }
  ]
}"#,
        )
        .unwrap();
        let runner = Arc::new(FakeRunner::new());
        let analyzer = NuGetAnalyzer::new(runner.clone());
        let module = Module::new("api", "Api.csproj", dir.path(), Type::NuGet);

        assert!(!analyzer.is_built(&module).unwrap());

        std::fs::write(dir.path().join("obj/project.assets.json"), ASSETS).unwrap();
        assert!(analyzer.is_built(&module).unwrap());
        analyzer.build(&module).unwrap();
        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[0], "restore");
    }
}
