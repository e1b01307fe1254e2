use std::fs::File;
use std::path::{Path, PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::walk::{self, SKIPPED_DIRS};
use super::{Analyzer, Discover};
use crate::error::{Error, Result};
use crate::module::{Analyzed, GraphBuilder, Module, PackageId, Type};

const FETCHER: &str = "archive";

const EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip", ".rpm", ".jar", ".whl", ".gem"];

/// Analyzer for third-party archives checked into a repository.
///
/// Each archive in the module directory is one package, identified by its
/// file name and the SHA-256 of its content. There is nothing to build.
#[derive(Debug, Default)]
pub struct VendoredArchivesAnalyzer;

impl VendoredArchivesAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for VendoredArchivesAnalyzer {
    fn module_type(&self) -> Type {
        Type::VendoredArchives
    }

    fn analyze(&self, module: &Module) -> Result<Analyzed> {
        let target = module.dir.join(&module.target);
        let archives = if target.is_file() {
            vec![target]
        } else {
            archives_in(&module.dir)?
        };

        let mut graph = GraphBuilder::new();
        for archive in &archives {
            let file_name = walk::file_name(archive);
            let name = strip_extension(file_name).unwrap_or(file_name);
            let location = archive
                .strip_prefix(&module.dir)
                .unwrap_or(archive)
                .to_string_lossy()
                .replace('\\', "/");
            graph.add_import(PackageId::new(FETCHER, location, name, hash_file(archive)?));
        }
        debug!(module = %module.name, archives = archives.len(), "hashed vendored archives");

        graph.into_analyzed(module.clone(), json!({ "archives": archives.len() }))
    }

    fn discoverer(&self) -> Option<&dyn Discover> {
        Some(self)
    }
}

impl Discover for VendoredArchivesAnalyzer {
    fn discover(&self, dir: &Path) -> Result<Vec<Module>> {
        // Archives live in vendor/ more often than not.
        let skipped: Vec<&str> = SKIPPED_DIRS
            .iter()
            .copied()
            .filter(|d| *d != "vendor")
            .collect();
        let archives = walk::find_files(dir, &skipped, is_archive)?;

        let mut modules: Vec<Module> = Vec::new();
        for archive in archives {
            let Some(module_dir) = archive.parent() else {
                continue;
            };
            if modules.iter().any(|m| m.dir == module_dir) {
                continue;
            }
            modules.push(Module::new(
                walk::module_name(dir, module_dir),
                ".",
                module_dir,
                Type::VendoredArchives,
            ));
        }
        Ok(modules)
    }
}

fn strip_extension(file_name: &str) -> Option<&str> {
    EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .filter(|stem| !stem.is_empty())
}

fn is_archive(path: &Path) -> bool {
    strip_extension(walk::file_name(path)).is_some()
}

/// Archives directly inside `dir`, sorted.
fn archives_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut archives: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_archive(p))
        .collect();
    archives.sort();
    Ok(archives)
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}
