//! The data model shared by every ecosystem: module types and their aliases,
//! module descriptors, package identities and analysis results.

mod analyzed;
mod descriptor;
mod package;
mod types;

pub use analyzed::{Analyzed, Dependency, GraphBuilder};
pub use descriptor::{
    EcosystemOptions, GoOptions, GradleOptions, MavenOptions, Module, NuGetOptions, Options,
    PythonOptions, PythonStrategy, RubyOptions, RubyStrategy,
};
pub use package::{PackageId, FINGERPRINT_NAMESPACE};
pub use types::{list_types, Type, TYPES};
