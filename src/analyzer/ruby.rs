use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::debug;

use super::walk::{self, SKIPPED_DIRS};
use super::{read_file, target_file, Analyzer, Build, Discover};
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, RubyStrategy, Type};

const FETCHER: &str = "gem";

/// Analyzer for Bundler projects.
///
/// The default strategy reads `Gemfile.lock`: every `specs:` entry is a node,
/// its indented requirements are edges, and `DEPENDENCIES` lists the imports.
/// The `list` strategy asks `bundle list` instead, which gives no edges.
pub struct RubyAnalyzer {
    runner: Arc<dyn CommandRunner>,
}

impl RubyAnalyzer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn analyze_list(&self, module: &Module) -> Result<Analyzed> {
        let output = self.runner.run(&bundle(module, "list"))?;

        let mut graph = GraphBuilder::new();
        for (name, version) in parse_bundle_list(&output.stdout) {
            graph.add_import(PackageId::new(FETCHER, "", name, version));
        }
        graph.into_analyzed(module.clone(), json!({ "strategy": "list" }))
    }
}

impl Analyzer for RubyAnalyzer {
    fn module_type(&self) -> Type {
        Type::Ruby
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        match module.options.ruby().strategy {
            RubyStrategy::List => self.analyze_list(module),
            RubyStrategy::Lockfile => {
                let lockfile = lockfile_of(module);
                let graph = parse_gemfile_lock(&lockfile)?;
                debug!(module = %module.name, lockfile = %lockfile.display(), packages = graph.len(), "read lockfile");
                graph.into_analyzed(module.clone(), json!({ "strategy": "lockfile" }))
            }
        }
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }

    fn builder(&self) -> Option<&dyn Build> {
        Some(self)
    }
}

impl Discover for RubyAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        let gemfiles = walk::find_files(dir, SKIPPED_DIRS, |p| walk::file_name(p) == "Gemfile")?;
        Ok(gemfiles
            .iter()
            .filter_map(|gemfile| {
                let module_dir = gemfile.parent()?;
                Some(Module::new(
                    walk::module_name(dir, module_dir),
                    gemfile.to_string_lossy(),
                    module_dir,
                    Type::Ruby,
                ))
            })
            .collect())
    }
}

impl Build for RubyAnalyzer {
    fn build(&self, module: &Module) -> Result<()> {
        self.runner.run(&bundle(module, "install"))?;
        Ok(())
    }

    fn is_built(&self, module: &Module) -> Result<bool> {
        Ok(lockfile_of(module).is_file())
    }
}

/// A targeted Gemfile other than the lockfile itself, for `BUNDLE_GEMFILE`.
fn gemfile_of(module: &Module) -> Option<PathBuf> {
    target_file(module).filter(|target| !is_lockfile(target))
}

fn is_lockfile(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("lock" | "locked")
    )
}

/// Bundler's lockfile naming: `gems.rb` locks to `gems.locked`, any other
/// Gemfile to `<gemfile>.lock`.
fn lockfile_of(module: &Module) -> PathBuf {
    match target_file(module) {
        Some(target) if is_lockfile(&target) => target,
        Some(target) if walk::file_name(&target) == "gems.rb" => target.with_file_name("gems.locked"),
        Some(target) => {
            let mut name = target.into_os_string();
            name.push(".lock");
            PathBuf::from(name)
        }
        None => module.dir.join("Gemfile.lock"),
    }
}

fn bundle(module: &Module, subcommand: &str) -> Command {
    let command = Command::new("bundle").arg(subcommand).dir(&module.dir);
    match gemfile_of(module) {
        Some(gemfile) => command.env("BUNDLE_GEMFILE", gemfile.to_string_lossy()),
        None => command,
    }
}

/// A gem resolved in one of the lockfile's source sections.
struct Spec {
    id: PackageId,
    requires: Vec<String>,
}

/// Parse `Gemfile.lock` into a graph.
///
/// ```text
/// GEM
///   remote: https://rubygems.org/
///   specs:
///     actionpack (7.0.4)
///       rack (~> 2.0)
///
/// DEPENDENCIES
///   actionpack
/// ```
///
/// Gems from `GIT` and `PATH` sections carry their remote as location.
fn parse_gemfile_lock(path: &Path) -> Result<GraphBuilder> {
    let content = read_file(path)?;
    let entry = Regex::new(r"^(\S+?)(?:!)?(?:\s+\(([^)]*)\))?$").map_err(|e| Error::manifest(path, e))?;

    let mut specs: Vec<Spec> = Vec::new();
    let mut direct: Vec<String> = Vec::new();
    let mut section = String::new();
    let mut remote = String::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') {
            section = line.trim().to_string();
            remote.clear();
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let text = line.trim();
        match (section.as_str(), indent) {
            ("GEM" | "GIT" | "PATH", 2) => {
                if let Some(value) = text.strip_prefix("remote:") {
                    remote = value.trim().to_string();
                }
            }
            ("GEM" | "GIT" | "PATH", 4) => {
                let caps = entry
                    .captures(text)
                    .ok_or_else(|| Error::manifest(path, format!("malformed spec line: {text}")))?;
                let version = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                let location = if section == "GEM" { "" } else { remote.as_str() };
                specs.push(Spec {
                    id: PackageId::new(FETCHER, location, &caps[1], version),
                    requires: Vec::new(),
                });
            }
            ("GEM" | "GIT" | "PATH", 6) => {
                let (Some(spec), Some(caps)) = (specs.last_mut(), entry.captures(text)) else {
                    return Err(Error::manifest(path, format!("requirement outside a spec: {text}")));
                };
                spec.requires.push(caps[1].to_string());
            }
            ("DEPENDENCIES", 2) => {
                if let Some(caps) = entry.captures(text) {
                    direct.push(caps[1].to_string());
                }
            }
            _ => {}
        }
    }

    let by_name: BTreeMap<&str, &PackageId> = specs.iter().map(|s| (s.id.name.as_str(), &s.id)).collect();
    let mut graph = GraphBuilder::new();
    for spec in &specs {
        graph.add_node(spec.id.clone());
        for required in &spec.requires {
            // Platform-specific gems may not be locked for this platform.
            if let Some(to) = by_name.get(required.as_str()) {
                graph.add_edge(spec.id.clone(), (*to).clone());
            }
        }
    }
    for name in &direct {
        match by_name.get(name.as_str()) {
            Some(id) => graph.add_import((*id).clone()),
            None => debug!(gem = %name, "dependency not locked, skipping"),
        }
    }

    Ok(graph)
}

/// Parse `bundle list` output lines like `  * rack (2.2.4)` or
/// `  * mygem (0.1.0 1a2b3c4)`; the trailing git ref is dropped.
fn parse_bundle_list(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("* ")?;
            let (name, version) = rest.split_once(" (")?;
            let version = version.trim_end_matches(')');
            let version = version.split_whitespace().next().unwrap_or_default();
            Some((name.to_string(), version.to_string()))
        })
        .collect()
}
