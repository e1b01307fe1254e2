use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;
use tracing::debug;

use super::walk::{self, SKIPPED_DIRS};
use super::{has_build_stamp, read_file, stamped_build, Analyzer, Build, Discover};
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, Type};

const FETCHER: &str = "mvn";

/// Analyzer for Maven projects.
///
/// Reports the dependencies declared in `pom.xml`, with `${property}`
/// references resolved against the POM's own `<properties>`. Only direct
/// dependencies are visible this way, so every dependency is also an import.
pub struct MavenAnalyzer {
    runner: Arc<dyn CommandRunner>,
}

impl MavenAnalyzer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Analyzer for MavenAnalyzer {
    fn module_type(&self) -> Type {
        Type::Maven
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        let pom_path = pom_of(module);
        let pom = parse_pom_xml(&pom_path)?;
        debug!(module = %module.name, pom = %pom_path.display(), dependencies = pom.dependencies.len(), "read pom.xml");

        let mut graph = GraphBuilder::new();
        for (coordinates, version) in &pom.dependencies {
            graph.add_import(PackageId::new(FETCHER, "", coordinates.clone(), version.clone()));
        }
        graph.into_analyzed(
            module.clone(),
            json!({ "pom": pom_path, "artifact": pom.artifact }),
        )
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }

    fn builder(&self) -> Option<&dyn Build> {
        Some(self)
    }
}

impl Discover for MavenAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        let poms = walk::find_files(dir, SKIPPED_DIRS, |p| walk::file_name(p) == "pom.xml")?;
        Ok(poms
            .iter()
            .filter_map(|pom| {
                let module_dir = pom.parent()?;
                Some(Module::new(
                    walk::module_name(dir, module_dir),
                    pom.to_string_lossy(),
                    module_dir,
                    Type::Maven,
                ))
            })
            .collect())
    }
}

impl Build for MavenAnalyzer {
    fn build(&self, module: &Module) -> Result<()> {
        let mut command = Command::new("mvn").args(["install", "-DskipTests", "-B"]);
        if let Some(settings) = module.options.maven().settings {
            command = command.arg("-s").arg(settings.to_string_lossy());
        }
        command = command.arg("-f").arg(pom_of(module).to_string_lossy());
        stamped_build(&module.dir.join("target"), || {
            self.runner.run(&command.dir(&module.dir)).map(drop)
        })
    }

    fn is_built(&self, module: &Module) -> Result<bool> {
        Ok(has_build_stamp(&module.dir.join("target")))
    }
}

/// The POM a module points at: its target when that is a file, otherwise
/// `pom.xml` in its directory.
fn pom_of(module: &Module) -> std::path::PathBuf {
    let target = Path::new(&module.target);
    if target.extension().is_some_and(|ext| ext == "xml") {
        module.dir.join(target)
    } else {
        module.dir.join("pom.xml")
    }
}

#[derive(Debug, Default)]
struct Pom {
    artifact: Option<String>,
    /// `(group:artifact, version)` in declaration order.
    dependencies: Vec<(String, String)>,
}

/// Parse `pom.xml` with the quick-xml event API. Only `project/dependencies`
/// counts: managed and plugin dependencies are not part of the build.
fn parse_pom_xml(path: &Path) -> Result<Pom> {
    let content = read_file(path)?;
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut properties: HashMap<String, String> = HashMap::new();
    let mut declared: Vec<(String, String, String)> = Vec::new();
    let mut current = (String::new(), String::new(), String::new());
    let mut group_id = String::new();
    let mut artifact_id = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                stack.push(name);
                if stack == ["project", "dependencies", "dependency"] {
                    current = (String::new(), String::new(), String::new());
                }
            }
            Ok(Event::End(_)) => {
                if stack == ["project", "dependencies", "dependency"] && !current.1.is_empty() {
                    declared.push(std::mem::take(&mut current));
                }
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                let path: Vec<&str> = stack.iter().map(String::as_str).collect();
                match path.as_slice() {
                    ["project", "groupId"] => group_id = text,
                    ["project", "parent", "groupId"] if group_id.is_empty() => group_id = text,
                    ["project", "artifactId"] => artifact_id = Some(text),
                    ["project", "version"] => {
                        properties.insert("project.version".to_string(), text);
                    }
                    ["project", "properties", key] => {
                        properties.insert(key.to_string(), text);
                    }
                    ["project", "dependencies", "dependency", "groupId"] => current.0 = text,
                    ["project", "dependencies", "dependency", "artifactId"] => current.1 = text,
                    ["project", "dependencies", "dependency", "version"] => current.2 = text,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::manifest(path, e)),
            _ => {}
        }
        buf.clear();
    }

    properties.insert("project.groupId".to_string(), group_id.clone());

    let dependencies = declared
        .into_iter()
        .map(|(group, artifact, version)| {
            let group = interpolate(&group, &properties);
            let coordinates = if group.is_empty() {
                artifact
            } else {
                format!("{group}:{artifact}")
            };
            (coordinates, interpolate(&version, &properties))
        })
        .collect();

    Ok(Pom {
        artifact: artifact_id.map(|a| format!("{group_id}:{a}")),
        dependencies,
    })
}

/// Replace `${name}` references with known property values. Unknown
/// references are left as written.
fn interpolate(value: &str, properties: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match properties.get(key) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::exec::testing::FakeRunner;
    use crate::module::{EcosystemOptions, MavenOptions, Options};

    const POM: &str = r#"<?xml version="1.0"?>
<project>
  <groupId>com.example</groupId>
  <artifactId>app</artifactId>
  <version>1.2.0</version>
  <properties>
    <commons.version>3.12.0</commons.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.managed</groupId>
        <artifactId>bom</artifactId>
        <version>9.9</version>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>org.apache.commons</groupId>
      <artifactId>commons-lang3</artifactId>
      <version>${commons.version}</version>
    </dependency>
    <dependency>
      <groupId>${project.groupId}</groupId>
      <artifactId>core</artifactId>
      <version>${project.version}</version>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
  </dependencies>
</project>"#;

    #[test]
    fn test_parse_pom_xml() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{}", POM).unwrap();
        let pom = parse_pom_xml(f.path()).unwrap();
        assert_eq!(pom.artifact.as_deref(), Some("com.example:app"));
        assert_eq!(
            pom.dependencies,
            vec![
                ("org.apache.commons:commons-lang3".to_string(), "3.12.0".to_string()),
                ("com.example:core".to_string(), "1.2.0".to_string()),
                ("junit:junit".to_string(), "4.13.2".to_string()),
            ]
        );
    }

    #[test]
    fn test_interpolate_leaves_unknown_references() {
        let props = HashMap::from([("a".to_string(), "1".to_string())]);
        assert_eq!(interpolate("${a}.${b}", &props), "1.${b}");
        assert_eq!(interpolate("x${a", &props), "x${a");
    }

    #[test]
    fn test_build_passes_settings_and_stamps_target() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), POM).unwrap();
        let runner = Arc::new(FakeRunner::new());
        let analyzer = MavenAnalyzer::new(runner.clone());
        let module = Module::new("app", "pom.xml", dir.path(), Type::Maven).with_options(Options {
            allow_unbuilt: false,
            ecosystem: EcosystemOptions::Maven(MavenOptions {
                settings: Some("ci/settings.xml".into()),
            }),
        });

        assert!(!analyzer.is_built(&module).unwrap());
        analyzer.build(&module).unwrap();
        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].args.windows(2).any(|w| w == ["-s", "ci/settings.xml"]));
        assert!(analyzer.is_built(&module).unwrap());

        // a forced rebuild still runs the tool
        analyzer.build(&module).unwrap();
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_build_leaving_target_is_not_built() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), POM).unwrap();
        let runner = FakeRunner::new()
            .creates(dir.path().join("target/classes"))
            .fail("mvn", "COMPILATION ERROR");
        let analyzer = MavenAnalyzer::new(Arc::new(runner));
        let module = Module::new("app", "pom.xml", dir.path(), Type::Maven);

        assert!(analyzer.build(&module).is_err());
        assert!(dir.path().join("target/classes").is_dir());
        assert!(!analyzer.is_built(&module).unwrap());
    }

    #[test]
    fn test_analyze_reports_declared_dependencies_as_imports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), POM).unwrap();
        let module = Module::new("app", "pom.xml", dir.path(), Type::Maven);
        let analyzed = MavenAnalyzer::new(Arc::new(FakeRunner::new()))
            .analyze(&module)
            .unwrap();
        assert_eq!(analyzed.imports.len(), 3);
        assert_eq!(analyzed.dependencies.len(), 3);
        assert!(analyzed
            .imports
            .contains(&PackageId::new("mvn", "", "junit:junit", "4.13.2")));
    }
}
