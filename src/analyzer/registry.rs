use std::collections::BTreeMap;
use std::sync::Arc;

use super::{gradle, maven, nodejs, nuget, pip, ruby, vendored, Analyzer};
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::module::Type;

/// Maps module types to the adapters that implement them.
///
/// Built once at startup and shared by reference; nothing is registered
/// after construction.
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<Type, Box<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// Every adapter this crate ships, running tools through `runner`.
    pub fn builtin(runner: Arc<dyn CommandRunner>) -> Self {
        Self::builder()
            .register(nodejs::NodejsAnalyzer::new(runner.clone()))
            .register(pip::PipAnalyzer::new(runner.clone()))
            .register(maven::MavenAnalyzer::new(runner.clone()))
            .register(gradle::GradleAnalyzer::new(runner.clone()))
            .register(nuget::NuGetAnalyzer::new(runner.clone()))
            .register(ruby::RubyAnalyzer::new(runner))
            .register(vendored::VendoredArchivesAnalyzer::new())
            .build()
    }

    pub fn system() -> Self {
        Self::builtin(Arc::new(SystemRunner))
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            analyzers: BTreeMap::new(),
        }
    }

    /// The adapter for `module_type`, or [`Error::AnalyzerNotFound`] when the
    /// type is known but nothing implements it.
    pub fn resolve(&self, module_type: Type) -> Result<&dyn Analyzer> {
        self.analyzers
            .get(&module_type)
            .map(|a| a.as_ref())
            .ok_or(Error::AnalyzerNotFound(module_type))
    }

    /// Registered types, in canonical order.
    pub fn types(&self) -> impl Iterator<Item = Type> + '_ {
        self.analyzers.keys().copied()
    }

    pub fn analyzers(&self) -> impl Iterator<Item = &dyn Analyzer> + '_ {
        self.analyzers.values().map(|a| a.as_ref())
    }
}

pub struct RegistryBuilder {
    analyzers: BTreeMap<Type, Box<dyn Analyzer>>,
}

impl RegistryBuilder {
    /// Register an adapter under its own type. A later registration for the
    /// same type replaces the earlier one.
    pub fn register<A: Analyzer + 'static>(mut self, analyzer: A) -> Self {
        self.analyzers
            .insert(analyzer.module_type(), Box::new(analyzer));
        self
    }

    pub fn build(self) -> AnalyzerRegistry {
        AnalyzerRegistry {
            analyzers: self.analyzers,
        }
    }
}
