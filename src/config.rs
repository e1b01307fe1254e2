use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::module::{EcosystemOptions, Module, Options, Type};

const CONFIG_DIR: &str = ".depscan";
const CONFIG_FILE: &str = "config.toml";

/// Root configuration, deserialized from `.depscan/config.toml`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub analyze: AnalyzeSettings,
    /// Explicitly configured modules. Empty means "discover".
    pub modules: Vec<Module>,
}

/// When to run an ecosystem's build step before analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPolicy {
    /// Build modules that are not built yet.
    #[default]
    Auto,
    /// Never build; unbuilt modules fail unless they allow it.
    Never,
    /// Always run the build step.
    Always,
}

/// The `[analyze]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzeSettings {
    pub build: BuildPolicy,
    /// Stop starting new modules after the first failure.
    pub fail_fast: bool,
    /// Maximum number of directories worked on at once.
    pub jobs: usize,
}

impl Default for AnalyzeSettings {
    fn default() -> Self {
        Self {
            build: BuildPolicy::Auto,
            fail_fast: false,
            jobs: default_jobs(),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    analyze: AnalyzeSettings,
    #[serde(default)]
    modules: Vec<RawModule>,
}

/// One `[[modules]]` entry before its type and options are resolved.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModule {
    name: String,
    /// Working directory, relative to the project root.
    path: PathBuf,
    /// Relative to `path`; defaults to the directory itself.
    target: Option<String>,
    #[serde(rename = "type")]
    module_type: String,
    #[serde(default)]
    allow_unbuilt: bool,
    options: Option<toml::Value>,
}

impl RawModule {
    fn resolve(self, project_path: &Path) -> Result<Module> {
        let module_type = Type::parse(&self.module_type)
            .map_err(|e| Error::Config(format!("module {}: {e}", self.name)))?;
        let ecosystem = match self.options {
            Some(value) => EcosystemOptions::from_toml(module_type, value)
                .map_err(|e| Error::Config(format!("module {}: {e}", self.name)))?,
            None => EcosystemOptions::default_for(module_type),
        };

        Ok(Module::new(
            self.name,
            self.target.unwrap_or_else(|| ".".to_string()),
            project_path.join(self.path),
            module_type,
        )
        .with_options(Options {
            allow_unbuilt: self.allow_unbuilt,
            ecosystem,
        }))
    }
}

/// Load the configuration, searching in order:
///
/// 1. `config_override` — path passed via `--config`
/// 2. `<project_path>/.depscan/config.toml`
/// 3. `~/.config/depscan/config.toml`
/// 4. Built-in [`Config::default`]
///
/// Module paths are relative to `project_path` whichever file they came from.
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path, project_path);
    }

    let project_config = project_path.join(CONFIG_DIR).join(CONFIG_FILE);
    if project_config.exists() {
        return read_config(&project_config, project_path);
    }

    if let Some(config_dir) = dirs::home_dir().map(|h| h.join(".config").join("depscan")) {
        let home_config = config_dir.join(CONFIG_FILE);
        if home_config.exists() {
            return read_config(&home_config, project_path);
        }
    }

    debug!("no config file found, using defaults");
    Ok(Config::default())
}

fn read_config(path: &Path, project_path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "loading config");
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_config(&content, project_path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), strip_prefix(&e))))
}

/// Parse config text. Fails on unknown keys, unknown module types and
/// options that do not fit the module's type.
pub fn parse_config(content: &str, project_path: &Path) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    if raw.analyze.jobs == 0 {
        return Err(Error::Config("analyze.jobs must be at least 1".to_string()));
    }

    let modules = raw
        .modules
        .into_iter()
        .map(|m| m.resolve(project_path))
        .collect::<Result<Vec<_>>>()?;

    Ok(Config {
        analyze: raw.analyze,
        modules,
    })
}

/// The message of a config error without its "invalid config" prefix, so
/// re-wrapping with the file path does not repeat it.
fn strip_prefix(e: &Error) -> String {
    match e {
        Error::Config(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::module::{PythonOptions, PythonStrategy};

    const CONFIG: &str = r#"
[analyze]
build = "never"
fail_fast = true
jobs = 2

[[modules]]
name = "web"
path = "frontend"
type = "npm"
allow_unbuilt = true

[[modules]]
name = "tools"
path = "scripts"
target = "requirements-dev.txt"
type = "python"
[modules.options]
strategy = "pipdeptree"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(CONFIG, Path::new("/repo")).unwrap();
        assert_eq!(config.analyze.build, BuildPolicy::Never);
        assert!(config.analyze.fail_fast);
        assert_eq!(config.analyze.jobs, 2);

        let web = &config.modules[0];
        assert_eq!(web.module_type, Type::Nodejs);
        assert_eq!(web.dir, Path::new("/repo/frontend"));
        assert_eq!(web.target, ".");
        assert!(web.options.allow_unbuilt);

        let tools = &config.modules[1];
        assert_eq!(tools.module_type, Type::Pip);
        assert_eq!(tools.target, "requirements-dev.txt");
        assert_eq!(
            tools.options.ecosystem,
            EcosystemOptions::Python(PythonOptions {
                strategy: PythonStrategy::Pipdeptree
            })
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("", Path::new(".")).unwrap();
        assert_eq!(config.analyze.build, BuildPolicy::Auto);
        assert!(!config.analyze.fail_fast);
        assert!(config.analyze.jobs >= 1);
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = parse_config(
            "[[modules]]\nname = \"x\"\npath = \".\"\ntype = \"NPM\"\n",
            Path::new("."),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("unknown module type: NPM"));
    }

    #[test]
    fn test_unknown_option_key_is_rejected() {
        let content = "[[modules]]\nname = \"x\"\npath = \".\"\ntype = \"gem\"\n\
                       [modules.options]\nstrategy = \"list\"\nfrozen = true\n";
        let err = parse_config(content, Path::new(".")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_options_on_optionless_type_are_rejected() {
        let content = "[[modules]]\nname = \"x\"\npath = \".\"\ntype = \"npm\"\n\
                       [modules.options]\nstrategy = \"list\"\n";
        assert!(parse_config(content, Path::new(".")).is_err());
    }

    #[test]
    fn test_zero_jobs_is_rejected() {
        assert!(parse_config("[analyze]\njobs = 0\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_bad_build_policy_is_rejected() {
        assert!(parse_config("[analyze]\nbuild = \"sometimes\"\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_load_config_prefers_override_then_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".depscan")).unwrap();
        std::fs::write(
            dir.path().join(".depscan/config.toml"),
            "[analyze]\njobs = 3\n",
        )
        .unwrap();
        let other = dir.path().join("ci.toml");
        std::fs::write(&other, "[analyze]\njobs = 7\n").unwrap();

        assert_eq!(load_config(dir.path(), None).unwrap().analyze.jobs, 3);
        assert_eq!(load_config(dir.path(), Some(&other)).unwrap().analyze.jobs, 7);
    }

    #[test]
    fn test_missing_override_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path(), Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_config_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[analyze]\nbogus = 1\n").unwrap();
        let err = load_config(dir.path(), Some(&path)).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
