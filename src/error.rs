//! Error type shared by the registry, the analyzer contract and the adapters.
//!
//! Every failure carries an [`ErrorKind`] so callers can route on the
//! category (skip a capability gap, report a config mistake, mark one module
//! failed) without matching on message text.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::module::Type;

pub type Result<T> = std::result::Result<T, Error>;

/// One of the contract operations, used to say which capability was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Discover,
    Build,
    IsBuilt,
    Analyze,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Discover => write!(f, "discover"),
            Operation::Build => write!(f, "build"),
            Operation::IsBuilt => write!(f, "is-built"),
            Operation::Analyze => write!(f, "analyze"),
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A raw type string matched no alias.
    UnknownType,
    /// The adapter exists but declines the operation.
    NotImplemented,
    /// The type is known but no adapter is registered for it.
    NotFound,
    /// The module has not been built and building was not allowed.
    NotBuilt,
    Discovery,
    Build,
    Analyze,
    /// A subprocess could not be spawned or exited nonzero.
    Exec,
    /// A manifest or lockfile could not be read or understood.
    Manifest,
    Config,
    Io,
    /// An adapter produced imports that are missing from its dependency set.
    InconsistentGraph,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown module type: {0}")]
    UnknownType(String),

    #[error("{operation} is not implemented for {module_type} modules")]
    NotImplemented {
        module_type: Type,
        operation: Operation,
    },

    #[error("no analyzer registered for module type {0}")]
    AnalyzerNotFound(Type),

    #[error("module {module} is not built")]
    NotBuilt { module: String },

    #[error("could not discover {module_type} modules in {}: {source}", dir.display())]
    Discovery {
        module_type: Type,
        dir: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("could not build module {module}: {source}")]
    Build {
        module: String,
        #[source]
        source: Box<Error>,
    },

    #[error("could not analyze module {module}: {source}")]
    Analyze {
        module: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", describe_status(status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("invalid manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module {module} imports {package} which is not among its dependencies")]
    InconsistentGraph { module: String, package: String },

    #[error("work on module {module} stopped unexpectedly: {reason}")]
    Aborted { module: String, reason: String },
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownType(_) => ErrorKind::UnknownType,
            Error::NotImplemented { .. } => ErrorKind::NotImplemented,
            Error::AnalyzerNotFound(_) => ErrorKind::NotFound,
            Error::NotBuilt { .. } => ErrorKind::NotBuilt,
            Error::Discovery { .. } => ErrorKind::Discovery,
            Error::Build { .. } => ErrorKind::Build,
            Error::Analyze { .. } | Error::Aborted { .. } => ErrorKind::Analyze,
            Error::Spawn { .. } | Error::CommandFailed { .. } => ErrorKind::Exec,
            Error::Manifest { .. } => ErrorKind::Manifest,
            Error::Config(_) => ErrorKind::Config,
            Error::Io { .. } => ErrorKind::Io,
            Error::InconsistentGraph { .. } => ErrorKind::InconsistentGraph,
        }
    }

    /// True when this error, or the error it wraps, is a capability gap.
    pub fn is_not_implemented(&self) -> bool {
        match self {
            Error::NotImplemented { .. } => true,
            Error::Discovery { source, .. }
            | Error::Build { source, .. }
            | Error::Analyze { source, .. } => source.is_not_implemented(),
            _ => false,
        }
    }

    pub fn not_implemented(module_type: Type, operation: Operation) -> Self {
        Error::NotImplemented {
            module_type,
            operation,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Error::Manifest {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn in_build(self, module: &str) -> Self {
        match self {
            already @ Error::Build { .. } => already,
            other => Error::Build {
                module: module.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn in_analyze(self, module: &str) -> Self {
        match self {
            already @ Error::Analyze { .. } => already,
            other => Error::Analyze {
                module: module.to_string(),
                source: Box::new(other),
            },
        }
    }
}
