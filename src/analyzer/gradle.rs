use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::debug;

use super::walk::{self, SKIPPED_DIRS};
use super::{has_build_stamp, read_file, stamped_build, target_file, Analyzer, Build, Discover};
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, Type};

const FETCHER: &str = "mvn";

const BUILD_SCRIPTS: &[&str] = &["build.gradle", "build.gradle.kts"];

const DEFAULT_TASK: &str = "build";

/// Analyzer for Gradle projects.
///
/// Prefers `gradle.lockfile`, which pins every resolved artifact per
/// configuration. Without one, reads `group:artifact:version` declarations
/// from the build script. The `configuration` option narrows either source
/// to one configuration, e.g. `runtimeClasspath`.
pub struct GradleAnalyzer {
    runner: Arc<dyn CommandRunner>,
}

impl GradleAnalyzer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Analyzer for GradleAnalyzer {
    fn module_type(&self) -> Type {
        Type::Gradle
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        let configuration = module.options.gradle().configuration;
        let wanted = |configs: &[String]| match &configuration {
            Some(c) => configs.iter().any(|x| x == c),
            None => true,
        };

        let (entries, source) = match source_of(module)? {
            Source::Lockfile(path) => (parse_gradle_lockfile(&path)?, "gradle.lockfile"),
            Source::Script(path) => (parse_build_gradle(&path)?, "build script"),
        };

        let mut graph = GraphBuilder::new();
        for entry in entries.iter().filter(|e| wanted(&e.configurations)) {
            graph.add_import(PackageId::new(
                FETCHER,
                "",
                format!("{}:{}", entry.group, entry.artifact),
                entry.version.clone(),
            ));
        }
        debug!(module = %module.name, source, packages = graph.len(), "read gradle dependencies");

        graph.into_analyzed(
            module.clone(),
            json!({ "source": source, "configuration": configuration }),
        )
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }

    fn builder(&self) -> Option<&dyn Build> {
        Some(self)
    }
}

impl Discover for GradleAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        let scripts = walk::find_files(dir, SKIPPED_DIRS, |p| BUILD_SCRIPTS.contains(&walk::file_name(p)))?;

        let mut modules: Vec<Module> = Vec::new();
        for script in scripts {
            let Some(module_dir) = script.parent() else {
                continue;
            };
            if modules.iter().any(|m| m.dir == module_dir) {
                continue;
            }
            modules.push(Module::new(
                walk::module_name(dir, module_dir),
                script.to_string_lossy(),
                module_dir,
                Type::Gradle,
            ));
        }
        Ok(modules)
    }
}

impl Build for GradleAnalyzer {
    fn build(&self, module: &Module) -> Result<()> {
        let task = module
            .options
            .gradle()
            .task
            .unwrap_or_else(|| DEFAULT_TASK.to_string());
        let wrapper = module.dir.join("gradlew");
        let program = if wrapper.exists() {
            wrapper.to_string_lossy().into_owned()
        } else {
            "gradle".to_string()
        };
        let command = Command::new(program).arg(task).arg("--console=plain").dir(&module.dir);
        stamped_build(&module.dir.join("build"), || self.runner.run(&command).map(drop))
    }

    fn is_built(&self, module: &Module) -> Result<bool> {
        Ok(has_build_stamp(&module.dir.join("build")))
    }
}

enum Source {
    Lockfile(PathBuf),
    Script(PathBuf),
}

/// Where a module's dependencies are read from. A lockfile next to the
/// targeted build script wins over the script itself.
fn source_of(module: &Module) -> Result<Source> {
    let dir = match target_file(module) {
        Some(target) if walk::file_name(&target) == "gradle.lockfile" => {
            return Ok(Source::Lockfile(target));
        }
        Some(target) => {
            let lockfile = target.with_file_name("gradle.lockfile");
            return Ok(if lockfile.is_file() {
                Source::Lockfile(lockfile)
            } else {
                Source::Script(target)
            });
        }
        None => &module.dir,
    };

    let lockfile = dir.join("gradle.lockfile");
    if lockfile.is_file() {
        return Ok(Source::Lockfile(lockfile));
    }
    BUILD_SCRIPTS
        .iter()
        .map(|s| dir.join(s))
        .find(|p| p.is_file())
        .map(Source::Script)
        .ok_or_else(|| Error::manifest(dir, "no build.gradle or build.gradle.kts"))
}

#[derive(Debug, Clone, PartialEq)]
struct GradleEntry {
    group: String,
    artifact: String,
    version: String,
    configurations: Vec<String>,
}

/// Resolvable configurations a declaration keyword contributes to.
fn classpaths_of(keyword: &str) -> &'static [&'static str] {
    match keyword {
        "implementation" | "api" => &[
            "compileClasspath",
            "runtimeClasspath",
            "testCompileClasspath",
            "testRuntimeClasspath",
        ],
        "compileOnly" => &["compileClasspath"],
        "runtimeOnly" => &["runtimeClasspath", "testRuntimeClasspath"],
        "testImplementation" => &["testCompileClasspath", "testRuntimeClasspath"],
        _ => &[],
    }
}

fn entry(keyword: &str, group: &str, artifact: &str, version: &str) -> GradleEntry {
    let mut configurations = vec![keyword.to_string()];
    configurations.extend(classpaths_of(keyword).iter().map(|c| c.to_string()));
    GradleEntry {
        group: group.to_string(),
        artifact: artifact.to_string(),
        version: version.to_string(),
        configurations,
    }
}

/// Parse `build.gradle` or `build.gradle.kts` declarations with regex.
fn parse_build_gradle(path: &Path) -> Result<Vec<GradleEntry>> {
    let content = read_file(path)?;
    let mut deps = Vec::new();

    // implementation 'group:artifact:version'
    // implementation("group:artifact:version")
    let re_shorthand = Regex::new(
        r#"(implementation|api|compileOnly|runtimeOnly|testImplementation)\s*\(?\s*['"]([^'":]+):([^'":]+):([^'"]+)['"]"#,
    )
    .map_err(|e| Error::manifest(path, e))?;

    for caps in re_shorthand.captures_iter(&content) {
        deps.push(entry(&caps[1], &caps[2], &caps[3], &caps[4]));
    }

    // implementation group: 'com.example', name: 'foo', version: '1.0'
    let re_map = Regex::new(
        r#"(implementation|api|compileOnly|runtimeOnly|testImplementation)\s+group:\s*['"]([^'"]+)['"]\s*,\s*name:\s*['"]([^'"]+)['"]\s*,\s*version:\s*['"]([^'"]+)['"]"#,
    )
    .map_err(|e| Error::manifest(path, e))?;

    for caps in re_map.captures_iter(&content) {
        deps.push(entry(&caps[1], &caps[2], &caps[3], &caps[4]));
    }

    Ok(deps)
}

/// Parse `gradle.lockfile`: `group:artifact:version=conf1,conf2` lines.
fn parse_gradle_lockfile(path: &Path) -> Result<Vec<GradleEntry>> {
    let content = read_file(path)?;
    let re = Regex::new(r"^([^:=\s]+):([^:=\s]+):([^=\s]+)(?:=(\S*))?").map_err(|e| Error::manifest(path, e))?;
    let mut deps = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("empty=") {
            continue;
        }
        if let Some(caps) = re.captures(line) {
            let configurations = caps
                .get(4)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            deps.push(GradleEntry {
                group: caps[1].to_string(),
                artifact: caps[2].to_string(),
                version: caps[3].to_string(),
                configurations,
            });
        }
    }

    Ok(deps)
}
