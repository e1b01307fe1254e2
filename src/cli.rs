use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "depscan",
    about = "Discover, build and analyze project modules across build ecosystems",
    version,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments for the default `analyze` command
    #[command(flatten)]
    pub analyze: AnalyzeArgs,

    /// Config file [default: ./.depscan/config.toml, fallback ~/.config/depscan/config.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging and per-module dependency tables
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print the summary line
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build and analyze every module (the default)
    Analyze(AnalyzeArgs),
    /// List the modules auto-configuration finds, without building
    Discover(DiscoverArgs),
    /// List supported module types and their aliases
    Types,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Project path to analyze
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Never build; unbuilt modules fail unless they allow it
    #[arg(long, conflicts_with = "force_build")]
    pub no_build: bool,

    /// Build every module even if it looks built
    #[arg(long)]
    pub force_build: bool,

    /// Stop after the first failing module
    #[arg(long)]
    pub fail_fast: bool,

    /// Directories to work on at once
    #[arg(long, short = 'j', value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Only discover modules of this type (repeatable; any alias, e.g. npm, gem)
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// Project path to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Only ask adapters of this type (repeatable)
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<String>,
}
