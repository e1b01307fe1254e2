use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Type;
use crate::error::{Error, Result};

/// A single unit of code (an entry point) to analyze.
///
/// `target` is ecosystem-specific: a manifest path for most tools, an import
/// path for Go. `dir` is where the ecosystem's tools run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub name: String,
    pub target: String,
    pub dir: PathBuf,
    #[serde(rename = "type")]
    pub module_type: Type,
    pub options: Options,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        dir: impl Into<PathBuf>,
        module_type: Type,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            dir: dir.into(),
            module_type,
            options: Options::for_type(module_type),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

/// Optional modifiers for module analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Options {
    /// Analyze even when the module is not built and building is disabled.
    pub allow_unbuilt: bool,
    pub ecosystem: EcosystemOptions,
}

impl Options {
    pub fn for_type(module_type: Type) -> Self {
        Self {
            allow_unbuilt: false,
            ecosystem: EcosystemOptions::default_for(module_type),
        }
    }

    pub fn go(&self) -> GoOptions {
        match &self.ecosystem {
            EcosystemOptions::Go(o) => o.clone(),
            _ => GoOptions::default(),
        }
    }

    pub fn python(&self) -> PythonOptions {
        match &self.ecosystem {
            EcosystemOptions::Python(o) => o.clone(),
            _ => PythonOptions::default(),
        }
    }

    pub fn ruby(&self) -> RubyOptions {
        match &self.ecosystem {
            EcosystemOptions::Ruby(o) => o.clone(),
            _ => RubyOptions::default(),
        }
    }

    pub fn gradle(&self) -> GradleOptions {
        match &self.ecosystem {
            EcosystemOptions::Gradle(o) => o.clone(),
            _ => GradleOptions::default(),
        }
    }

    pub fn maven(&self) -> MavenOptions {
        match &self.ecosystem {
            EcosystemOptions::Maven(o) => o.clone(),
            _ => MavenOptions::default(),
        }
    }

    pub fn nuget(&self) -> NuGetOptions {
        match &self.ecosystem {
            EcosystemOptions::NuGet(o) => o.clone(),
            _ => NuGetOptions::default(),
        }
    }
}

/// Ecosystem-specific options. The variant is chosen by the module type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EcosystemOptions {
    #[default]
    None,
    Go(GoOptions),
    Python(PythonOptions),
    Ruby(RubyOptions),
    Gradle(GradleOptions),
    Maven(MavenOptions),
    NuGet(NuGetOptions),
}

impl EcosystemOptions {
    pub fn default_for(module_type: Type) -> Self {
        match module_type {
            Type::Golang => EcosystemOptions::Go(GoOptions::default()),
            Type::Pip => EcosystemOptions::Python(PythonOptions::default()),
            Type::Ruby => EcosystemOptions::Ruby(RubyOptions::default()),
            Type::Gradle => EcosystemOptions::Gradle(GradleOptions::default()),
            Type::Maven => EcosystemOptions::Maven(MavenOptions::default()),
            Type::NuGet => EcosystemOptions::NuGet(NuGetOptions::default()),
            Type::Bower
            | Type::Cocoapods
            | Type::Composer
            | Type::Sbt
            | Type::Nodejs
            | Type::VendoredArchives => EcosystemOptions::None,
        }
    }

    /// Read the `options` table of a config entry into the shape its type
    /// expects. Unknown keys are rejected.
    pub fn from_toml(module_type: Type, value: toml::Value) -> Result<Self> {
        let invalid =
            |e: toml::de::Error| Error::Config(format!("options for {module_type} module: {e}"));

        let options = match module_type {
            Type::Golang => EcosystemOptions::Go(value.try_into().map_err(invalid)?),
            Type::Pip => EcosystemOptions::Python(value.try_into().map_err(invalid)?),
            Type::Ruby => EcosystemOptions::Ruby(value.try_into().map_err(invalid)?),
            Type::Gradle => EcosystemOptions::Gradle(value.try_into().map_err(invalid)?),
            Type::Maven => EcosystemOptions::Maven(value.try_into().map_err(invalid)?),
            Type::NuGet => EcosystemOptions::NuGet(value.try_into().map_err(invalid)?),
            _ => {
                let empty = value.as_table().map_or(true, |t| t.is_empty());
                if !empty {
                    return Err(Error::Config(format!(
                        "{module_type} modules take no options"
                    )));
                }
                EcosystemOptions::None
            }
        };
        Ok(options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoOptions {
    pub allow_unresolved: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PythonStrategy {
    /// Read requirements.txt, Pipfile.lock or pyproject.toml.
    #[default]
    Requirements,
    /// Ask `pipdeptree` for the installed graph.
    Pipdeptree,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PythonOptions {
    pub strategy: PythonStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RubyStrategy {
    /// Read Gemfile.lock.
    #[default]
    Lockfile,
    /// Ask `bundle list`.
    List,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RubyOptions {
    pub strategy: RubyStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GradleOptions {
    /// Task run by Build. Defaults to `build`.
    pub task: Option<String>,
    /// Configuration whose dependencies are reported, e.g. `runtimeClasspath`.
    pub configuration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MavenOptions {
    /// Alternate `settings.xml` passed to `mvn -s`.
    pub settings: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NuGetOptions {
    pub target_framework: Option<String>,
}
