//! Renderers for analysis outcomes.
//!
//! - [`terminal`] — colored summary and tables; respects `--verbose` / `--quiet`.
//! - [`to_json`] — machine-readable form of every outcome, for `--json`.

pub mod terminal;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind};
use crate::module::{Dependency, Module, PackageId};
use crate::pipeline::{ModuleOutcome, ModuleStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Analyzed,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    kind: ErrorKind,
    message: String,
}

impl From<&Error> for ErrorReport {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// One module's entry. Graph fields are present only when analyzed.
#[derive(Debug, Serialize)]
struct OutcomeReport<'a> {
    module: &'a Module,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    imports: Option<&'a [PackageId]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependencies: Option<Vec<DependencyReport<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct DependencyReport<'a> {
    #[serde(flatten)]
    dependency: &'a Dependency,
    fingerprint: String,
}

impl<'a> From<&'a ModuleOutcome> for OutcomeReport<'a> {
    fn from(outcome: &'a ModuleOutcome) -> Self {
        let mut report = OutcomeReport {
            module: &outcome.module,
            status: Status::Skipped,
            error: None,
            imports: None,
            dependencies: None,
            metadata: None,
        };
        match &outcome.status {
            ModuleStatus::Analyzed(analyzed) => {
                report.status = Status::Analyzed;
                report.imports = Some(&analyzed.imports);
                report.dependencies = Some(
                    analyzed
                        .dependencies
                        .iter()
                        .map(|dependency| DependencyReport {
                            dependency,
                            fingerprint: dependency.id.fingerprint(),
                        })
                        .collect(),
                );
                report.metadata = Some(&analyzed.metadata);
            }
            ModuleStatus::Failed(e) => {
                report.status = Status::Failed;
                report.error = Some(e.into());
            }
            ModuleStatus::Skipped => {}
        }
        report
    }
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    version: &'static str,
    modules: Vec<OutcomeReport<'a>>,
}

/// JSON document for a run: one entry per module, in outcome order.
pub fn to_json(outcomes: &[ModuleOutcome]) -> serde_json::Result<Value> {
    serde_json::to_value(RunReport {
        version: env!("CARGO_PKG_VERSION"),
        modules: outcomes.iter().map(OutcomeReport::from).collect(),
    })
}
