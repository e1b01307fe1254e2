//! The analyzer contract every ecosystem adapter implements.
//!
//! Analysis is the one required capability. Discovery and building are
//! optional and queried through [`Analyzer::discoverer`] and
//! [`Analyzer::builder`]; the convenience calls on `dyn Analyzer` turn a
//! missing capability into [`Error::NotImplemented`].

use std::path::{Path, PathBuf};

use crate::error::{Error, Operation, Result};
use crate::module::{Analyzed, Module, Type};

pub mod gradle;
pub mod maven;
pub mod nodejs;
pub mod nuget;
pub mod pip;
pub mod registry;
pub mod ruby;
pub mod vendored;

mod walk;

pub use registry::AnalyzerRegistry;

/// Extracts the dependency graph of one module.
pub trait Analyzer: Send + Sync {
    /// The module type this adapter handles.
    fn module_type(&self) -> Type;

    /// Run an analysis of a module. Tool failures are errors, never partial
    /// results.
    fn analyze(&self, module: &Module) -> Result<Analyzed>;

    /// Auto-configuration support, if any.
    fn discoverer(&self) -> Option<&dyn Discover> {
        None
    }

    /// Build support, if any.
    fn builder(&self) -> Option<&dyn Build> {
        None
    }
}

/// Finds modules below a directory.
pub trait Discover {
    /// Must not modify the filesystem. Unreadable subdirectories are skipped;
    /// an unreadable `dir` is an error.
    fn discover(&self, dir: &Path) -> Result<Vec<Module>>;
}

/// Brings a module into an analyzable state with the ecosystem's tools.
pub trait Build {
    /// Run the ecosystem's build tools. Always runs them; deciding whether a
    /// build is needed is the caller's job (see [`Build::is_built`]).
    fn build(&self, module: &Module) -> Result<()>;

    /// Whether a build has already succeeded. No side effects. A failed
    /// build that left partial output behind must not count as built.
    fn is_built(&self, module: &Module) -> Result<bool>;
}

impl dyn Analyzer + '_ {
    pub fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        match self.discoverer() {
            Some(d) => d.discover(dir).map_err(|e| match e {
                Error::NotImplemented { .. } | Error::Discovery { .. } => e,
                other => Error::Discovery {
                    module_type: self.module_type(),
                    dir: dir.to_path_buf(),
                    source: Box::new(other),
                },
            }),
            None => Err(Error::not_implemented(
                self.module_type(),
                Operation::Discover,
            )),
        }
    }

    pub fn build(&self, module: &Module) -> Result<()> {
        match self.builder() {
            Some(b) => b.build(module).map_err(|e| match e {
                Error::NotImplemented { .. } => e,
                other => other.in_build(&module.name),
            }),
            None => Err(Error::not_implemented(self.module_type(), Operation::Build)),
        }
    }

    pub fn is_built(&self, module: &Module) -> Result<bool> {
        match self.builder() {
            Some(b) => b.is_built(module),
            None => Err(Error::not_implemented(
                self.module_type(),
                Operation::IsBuilt,
            )),
        }
    }

    /// Analyze and re-check the import invariant on the adapter's output.
    pub fn analyze_checked(&self, module: &Module) -> Result<Analyzed> {
        let analyzed = self.analyze(module).map_err(|e| match e {
            Error::NotImplemented { .. } => e,
            other => other.in_analyze(&module.name),
        })?;
        analyzed.check()?;
        Ok(analyzed)
    }
}

/// Read a manifest or lockfile, attributing failures to its path.
pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// The file a module's target names, relative to its directory. `None` when
/// the target is the directory itself (`"."`) or anything else not a file.
pub(crate) fn target_file(module: &Module) -> Option<PathBuf> {
    let path = module.dir.join(&module.target);
    path.is_file().then_some(path)
}

/// Marker left in a build output directory once the build tool succeeded.
/// Tools create their output directories before they can fail, so the
/// directory alone does not mean built.
const BUILD_STAMP: &str = ".depscan-built";

pub(crate) fn has_build_stamp(out_dir: &Path) -> bool {
    out_dir.join(BUILD_STAMP).is_file()
}

/// Run `build` with no stamp in `out_dir`, stamping it only on success.
pub(crate) fn stamped_build<F>(out_dir: &Path, build: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let stamp = out_dir.join(BUILD_STAMP);
    if let Err(e) = std::fs::remove_file(&stamp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(Error::io(&stamp, e));
        }
    }
    build()?;
    std::fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;
    std::fs::write(&stamp, "").map_err(|e| Error::io(&stamp, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::module::{GraphBuilder, PackageId};

    struct AnalyzeOnly;

    impl Analyzer for AnalyzeOnly {
        fn module_type(&self) -> Type {
            Type::Bower
        }

        fn analyze(&self, module: &Module) -> Result<Analyzed> {
            let mut graph = GraphBuilder::new();
            graph.add_import(PackageId::new("bower", "", "jquery", "3.7.1"));
            graph.into_analyzed(module.clone(), serde_json::Value::Null)
        }
    }

    struct Broken;

    impl Analyzer for Broken {
        fn module_type(&self) -> Type {
            Type::Bower
        }

        fn analyze(&self, module: &Module) -> Result<Analyzed> {
            Ok(Analyzed {
                module: module.clone(),
                imports: vec![PackageId::new("bower", "", "jquery", "3.7.1")],
                dependencies: vec![],
                metadata: serde_json::Value::Null,
            })
        }
    }

    fn module() -> Module {
        Module::new("site", "bower.json", "/src/site", Type::Bower)
    }

    #[test]
    fn test_missing_capabilities_are_not_implemented() {
        let analyzer: &dyn Analyzer = &AnalyzeOnly;

        let err = analyzer.discover(Path::new("/src")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);

        let err = analyzer.build(&module()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert!(matches!(
            err,
            Error::NotImplemented {
                operation: Operation::Build,
                ..
            }
        ));

        let err = analyzer.is_built(&module()).unwrap_err();
        assert!(err.is_not_implemented());

        assert_eq!(analyzer.analyze_checked(&module()).unwrap().imports.len(), 1);
    }

    #[test]
    fn test_stamp_written_only_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("target");

        let err = stamped_build(&out, || {
            std::fs::create_dir_all(out.join("classes")).unwrap();
            Err(Error::NotBuilt {
                module: "api".to_string(),
            })
        });
        assert!(err.is_err());
        assert!(out.is_dir());
        assert!(!has_build_stamp(&out));

        stamped_build(&out, || Ok(())).unwrap();
        assert!(has_build_stamp(&out));

        // A failing rebuild clears the previous stamp.
        let _ = stamped_build(&out, || {
            Err(Error::NotBuilt {
                module: "api".to_string(),
            })
        });
        assert!(!has_build_stamp(&out));
    }

    #[test]
    fn test_target_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements-dev.txt"), "").unwrap();

        let mut module = Module::new("app", ".", dir.path(), Type::Pip);
        assert_eq!(target_file(&module), None);

        module.target = "requirements-dev.txt".to_string();
        assert_eq!(
            target_file(&module),
            Some(dir.path().join("requirements-dev.txt"))
        );

        module.target = "missing.txt".to_string();
        assert_eq!(target_file(&module), None);
    }

    #[test]
    fn test_analyze_checked_rejects_dangling_imports() {
        let analyzer: &dyn Analyzer = &Broken;
        let err = analyzer.analyze_checked(&module()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentGraph);
    }
}
