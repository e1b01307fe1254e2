//! `depscan` — find the modules in a project, build them with their own
//! ecosystem tools and report each module's dependency graph.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]).
//! 2. Load `.depscan/config.toml` ([`depscan::config::load_config`]).
//! 3. Take the configured modules, or discover them
//!    ([`depscan::detector::discover_modules`]).
//! 4. Build and analyze every module ([`depscan::pipeline`]).
//! 5. Render the terminal or JSON report ([`depscan::report`]).
//! 6. Exit `0` (every module analyzed) or `1` (at least one failed).

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{AnalyzeArgs, Cli, Command, DiscoverArgs};
use depscan::analyzer::AnalyzerRegistry;
use depscan::config::{load_config, BuildPolicy};
use depscan::detector::discover_modules;
use depscan::module::{list_types, Module, Type};
use depscan::pipeline::analyze_modules_with;
use depscan::report;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let command = cli
        .command
        .clone()
        .unwrap_or_else(|| Command::Analyze(cli.analyze.clone()));

    let failed = match command {
        Command::Analyze(args) => run_analyze(&cli, &args).await?,
        Command::Discover(args) => run_discover(&cli, &args)?,
        Command::Types => run_types(&cli)?,
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr so `--json` output stays parseable. `RUST_LOG` wins
/// over the verbosity flags.
fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_path(path: &Path) -> std::path::PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn parse_types(raw: &[String]) -> Result<Vec<Type>> {
    raw.iter()
        .map(|r| Type::parse(r).with_context(|| format!("--type {r}")))
        .collect()
}

async fn run_analyze(cli: &Cli, args: &AnalyzeArgs) -> Result<bool> {
    let path = resolve_path(&args.path);
    let config = load_config(&path, cli.config.as_deref())?;
    let types = parse_types(&args.types)?;

    let mut settings = config.analyze;
    if args.no_build {
        settings.build = BuildPolicy::Never;
    }
    if args.force_build {
        settings.build = BuildPolicy::Always;
    }
    settings.fail_fast |= args.fail_fast;
    if let Some(jobs) = args.jobs {
        settings.jobs = usize::from(jobs);
    }

    let registry = Arc::new(AnalyzerRegistry::system());

    // Configured modules replace discovery entirely.
    let modules: Vec<Module> = if config.modules.is_empty() {
        let discovery = discover_modules(&registry, &path, &types);
        for failure in &discovery.failures {
            if !cli.quiet {
                eprintln!("  {} {}", "!".yellow(), failure);
            }
        }
        discovery.modules
    } else {
        config
            .modules
            .into_iter()
            .filter(|m| types.is_empty() || types.contains(&m.module_type))
            .collect()
    };

    if modules.is_empty() {
        eprintln!("No modules found in {}", path.display());
        return Ok(true);
    }

    let pb = if !cli.quiet && !cli.json {
        let pb = ProgressBar::new(modules.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let tick = pb.clone();
    let outcomes = analyze_modules_with(registry, modules, &settings, move |outcome| {
        if let Some(pb) = &tick {
            pb.set_message(outcome.module.name.clone());
            pb.inc(1);
        }
    })
    .await;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report::to_json(&outcomes)?)?);
    } else {
        report::terminal::render(&outcomes, &path, cli.verbose, cli.quiet);
    }

    Ok(outcomes.iter().any(|o| o.is_failed()))
}

fn run_discover(cli: &Cli, args: &DiscoverArgs) -> Result<bool> {
    let path = resolve_path(&args.path);
    let types = parse_types(&args.types)?;
    let registry = AnalyzerRegistry::system();
    let discovery = discover_modules(&registry, &path, &types);

    if cli.json {
        let failures: Vec<String> = discovery.failures.iter().map(ToString::to_string).collect();
        let doc = json!({ "modules": discovery.modules, "failures": failures });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        report::terminal::render_discovery(&discovery, &path, cli.quiet);
    }
    Ok(false)
}

fn run_types(cli: &Cli) -> Result<bool> {
    let registry = AnalyzerRegistry::system();

    if cli.json {
        let types: Vec<_> = list_types()
            .iter()
            .map(|&ty| {
                let analyzer = registry.resolve(ty).ok();
                json!({
                    "type": ty,
                    "aliases": ty.aliases(),
                    "analyze": analyzer.is_some(),
                    "discover": analyzer.is_some_and(|a| a.discoverer().is_some()),
                    "build": analyzer.is_some_and(|a| a.builder().is_some()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&types)?);
    } else {
        report::terminal::render_types(&registry);
    }
    Ok(false)
}
