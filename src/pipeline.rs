//! The build-then-analyze run over a set of modules.
//!
//! Modules sharing a working directory run one after another, since their
//! tools write to the same places. Different directories run concurrently on
//! the blocking pool, at most `jobs` at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, AnalyzerRegistry};
use crate::config::{AnalyzeSettings, BuildPolicy};
use crate::error::{Error, Result};
use crate::module::{Analyzed, Module};

#[derive(Debug)]
pub enum ModuleStatus {
    Analyzed(Analyzed),
    Failed(Error),
    /// Not attempted because an earlier module failed under fail-fast.
    Skipped,
}

#[derive(Debug)]
pub struct ModuleOutcome {
    pub module: Module,
    pub status: ModuleStatus,
}

impl ModuleOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ModuleStatus::Failed(_))
    }

    pub fn analyzed(&self) -> Option<&Analyzed> {
        match &self.status {
            ModuleStatus::Analyzed(analyzed) => Some(analyzed),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            ModuleStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Build (per `settings.build`) and analyze every module. Returns one outcome
/// per module, in input order. A failing module never aborts the run unless
/// `fail_fast` is set, in which case modules not yet started are skipped.
pub async fn analyze_modules(
    registry: Arc<AnalyzerRegistry>,
    modules: Vec<Module>,
    settings: &AnalyzeSettings,
) -> Vec<ModuleOutcome> {
    analyze_modules_with(registry, modules, settings, |_| {}).await
}

/// Like [`analyze_modules`], calling `on_done` as each module finishes.
pub async fn analyze_modules_with<F>(
    registry: Arc<AnalyzerRegistry>,
    modules: Vec<Module>,
    settings: &AnalyzeSettings,
    on_done: F,
) -> Vec<ModuleOutcome>
where
    F: Fn(&ModuleOutcome) + Send + Sync + 'static,
{
    let groups = group_by_dir(modules);
    info!(groups = groups.len(), jobs = settings.jobs, "analyzing modules");

    let semaphore = Arc::new(Semaphore::new(settings.jobs.max(1)));
    let stop = Arc::new(AtomicBool::new(false));
    let on_done = Arc::new(on_done);

    let tasks = groups.into_iter().map(|group| {
        let registry = registry.clone();
        let semaphore = semaphore.clone();
        let stop = stop.clone();
        let on_done = on_done.clone();
        let settings = settings.clone();
        async move {
            let _permit = semaphore.acquire_owned().await;
            let pending: Vec<(usize, Module)> = group.clone();
            let report = on_done.clone();
            let handle = tokio::task::spawn_blocking(move || {
                run_group(&registry, group, &settings, &stop, &*on_done)
            });
            match handle.await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!(error = %e, "analysis task failed");
                    pending
                        .into_iter()
                        .map(|(index, module)| {
                            let outcome = ModuleOutcome {
                                status: ModuleStatus::Failed(Error::Aborted {
                                    module: module.name.clone(),
                                    reason: e.to_string(),
                                }),
                                module,
                            };
                            (*report)(&outcome);
                            (index, outcome)
                        })
                        .collect()
                }
            }
        }
    });

    let mut outcomes: Vec<(usize, ModuleOutcome)> =
        join_all(tasks).await.into_iter().flatten().collect();
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Modules grouped by working directory, groups ordered by first appearance,
/// each module tagged with its input position.
fn group_by_dir(modules: Vec<Module>) -> Vec<Vec<(usize, Module)>> {
    let mut slots: HashMap<PathBuf, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, Module)>> = Vec::new();
    for (index, module) in modules.into_iter().enumerate() {
        let slot = *slots.entry(module.dir.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push((index, module));
    }
    groups
}

fn run_group(
    registry: &AnalyzerRegistry,
    group: Vec<(usize, Module)>,
    settings: &AnalyzeSettings,
    stop: &AtomicBool,
    on_done: &dyn Fn(&ModuleOutcome),
) -> Vec<(usize, ModuleOutcome)> {
    group
        .into_iter()
        .map(|(index, module)| {
            let status = if settings.fail_fast && stop.load(Ordering::SeqCst) {
                debug!(module = %module.name, "skipped after earlier failure");
                ModuleStatus::Skipped
            } else {
                match analyze_one(registry, &module, settings.build) {
                    Ok(analyzed) => {
                        info!(
                            module = %module.name,
                            dependencies = analyzed.dependencies.len(),
                            "analyzed"
                        );
                        ModuleStatus::Analyzed(analyzed)
                    }
                    Err(e) => {
                        warn!(module = %module.name, error = %e, "module failed");
                        stop.store(true, Ordering::SeqCst);
                        ModuleStatus::Failed(e)
                    }
                }
            };
            let outcome = ModuleOutcome { module, status };
            on_done(&outcome);
            (index, outcome)
        })
        .collect()
}

fn analyze_one(registry: &AnalyzerRegistry, module: &Module, policy: BuildPolicy) -> Result<Analyzed> {
    let analyzer = registry.resolve(module.module_type)?;

    match policy {
        BuildPolicy::Always => build(analyzer, module)?,
        BuildPolicy::Auto => {
            if !is_built(analyzer, module)? {
                build(analyzer, module)?;
            }
        }
        BuildPolicy::Never => {
            if !module.options.allow_unbuilt && !is_built(analyzer, module)? {
                return Err(Error::NotBuilt {
                    module: module.name.clone(),
                });
            }
        }
    }

    analyzer.analyze_checked(module)
}

/// A module whose adapter cannot build counts as built.
fn is_built(analyzer: &dyn Analyzer, module: &Module) -> Result<bool> {
    match analyzer.is_built(module) {
        Err(e) if e.is_not_implemented() => {
            debug!(module = %module.name, "nothing to build");
            Ok(true)
        }
        other => other.map_err(|e| e.in_build(&module.name)),
    }
}

fn build(analyzer: &dyn Analyzer, module: &Module) -> Result<()> {
    match analyzer.build(module) {
        Err(e) if e.is_not_implemented() => {
            debug!(module = %module.name, "nothing to build");
            Ok(())
        }
        Ok(()) => {
            debug!(module = %module.name, "built");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
