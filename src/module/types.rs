use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A supported build ecosystem.
///
/// The set is closed: [`Type::parse`] only ever yields one of [`TYPES`], and
/// every variant must have an entry in [`ALIASES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    // Individual tools
    /// bower.io
    Bower,
    /// cocoapods.org
    Cocoapods,
    /// getcomposer.org
    Composer,
    /// maven.apache.org
    Maven,
    /// scala-sbt.org
    Sbt,
    /// gradle.org
    Gradle,
    /// nuget.org
    NuGet,
    /// pip.pypa.io
    Pip,

    // Ecosystems where many tools behave similarly
    /// Bundler and other rubygems tooling
    Ruby,
    /// NPM and Yarn
    Nodejs,
    /// dep, glide, godep, govendor, vndr and manual GOPATH vendoring
    Golang,

    /// Archives checked into the tree (.tar, .rpm, .zip, ...)
    VendoredArchives,
}

/// Every supported type, in the order used for help text and validation.
pub const TYPES: &[Type] = &[
    Type::Bower,
    Type::Cocoapods,
    Type::Composer,
    Type::Maven,
    Type::Sbt,
    Type::Gradle,
    Type::NuGet,
    Type::Pip,
    Type::Ruby,
    Type::Nodejs,
    Type::Golang,
    Type::VendoredArchives,
];

/// Accepted spellings for each type. Matching is exact and case-sensitive.
/// The first alias of each entry is the canonical form.
const ALIASES: &[(Type, &[&str])] = &[
    (Type::Bower, &["bower", "bowerpackage"]),
    (
        Type::Cocoapods,
        &["cocoapods", "ios", "pod", "cocoapodspackage"],
    ),
    (Type::Composer, &["composer", "composerpackage"]),
    (Type::Maven, &["maven", "mvn", "javaartifact"]),
    (Type::Sbt, &["sbt", "scala", "sbtpackage"]),
    (Type::Gradle, &["gradle"]),
    (Type::NuGet, &["nuget", "nugetpackage", "dotnet", "csharp"]),
    (
        Type::Pip,
        &[
            "pip",
            "python",
            "py",
            "pippackage",
            "pythonrequirementspackage",
            "pythonprogram",
        ],
    ),
    (Type::Ruby, &["ruby", "bundler", "gem", "rubygems"]),
    (
        Type::Nodejs,
        &["nodejs", "node", "npm", "commonjspackage", "npmpackage"],
    ),
    (Type::Golang, &["golang", "go", "gopackage"]),
    (Type::VendoredArchives, &["vendoredarchives"]),
];

impl Type {
    /// Resolve a raw type string from config or the command line.
    pub fn parse(raw: &str) -> Result<Type> {
        ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&raw))
            .map(|(ty, _)| *ty)
            .ok_or_else(|| Error::UnknownType(raw.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Type::Bower => "bower",
            Type::Cocoapods => "cocoapods",
            Type::Composer => "composer",
            Type::Maven => "maven",
            Type::Sbt => "sbt",
            Type::Gradle => "gradle",
            Type::NuGet => "nuget",
            Type::Pip => "pip",
            Type::Ruby => "ruby",
            Type::Nodejs => "nodejs",
            Type::Golang => "golang",
            Type::VendoredArchives => "vendoredarchives",
        }
    }

    /// All spellings [`Type::parse`] accepts for this type.
    pub fn aliases(&self) -> &'static [&'static str] {
        ALIASES
            .iter()
            .find(|(ty, _)| ty == self)
            .map(|(_, aliases)| *aliases)
            .unwrap_or(&[])
    }
}

/// The canonical list of types.
pub fn list_types() -> &'static [Type] {
    TYPES
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Type {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Type::parse(s)
    }
}

impl TryFrom<String> for Type {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Type::parse(&value)
    }
}

impl From<Type> for String {
    fn from(ty: Type) -> Self {
        ty.as_str().to_string()
    }
}
