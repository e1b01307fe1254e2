use std::path::Path;

use tracing::{debug, warn};

use crate::analyzer::AnalyzerRegistry;
use crate::error::{Error, Operation};
use crate::module::{Module, Type};

/// What auto-configuration found under a directory.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Modules from every adapter, grouped by adapter in type order.
    pub modules: Vec<Module>,
    /// Adapters that could not finish. Their modules are missing from
    /// `modules`; other adapters are unaffected.
    pub failures: Vec<Error>,
}

/// Ask every registered adapter that can discover to scan `root`.
///
/// With a non-empty `types`, only those types are asked, and a requested type
/// with no adapter or no discover capability is reported as a failure.
pub fn discover_modules(registry: &AnalyzerRegistry, root: &Path, types: &[Type]) -> Discovery {
    let mut discovery = Discovery::default();

    for &requested in types {
        match registry.resolve(requested) {
            Err(e) => discovery.failures.push(e),
            Ok(analyzer) if analyzer.discoverer().is_none() => discovery
                .failures
                .push(Error::not_implemented(requested, Operation::Discover)),
            Ok(_) => {}
        }
    }

    for analyzer in registry.analyzers() {
        let module_type = analyzer.module_type();
        if !types.is_empty() && !types.contains(&module_type) {
            continue;
        }
        if analyzer.discoverer().is_none() {
            continue;
        }

        match analyzer.discover(root) {
            Ok(modules) => {
                debug!(%module_type, count = modules.len(), "discovered modules");
                discovery.modules.extend(modules);
            }
            Err(e) => {
                warn!(%module_type, error = %e, "discovery failed");
                discovery.failures.push(e);
            }
        }
    }

    discovery
}
