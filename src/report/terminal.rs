use std::path::Path;

use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::analyzer::AnalyzerRegistry;
use crate::detector::Discovery;
use crate::module::{list_types, Analyzed, Module};
use crate::pipeline::{ModuleOutcome, ModuleStatus};

fn header(path: &Path) {
    println!("\n {} v{}", "depscan".bold(), env!("CARGO_PKG_VERSION"));
    println!(" Scanning: {}\n", path.display());
}

fn bold(title: &str) -> Cell {
    Cell::new(title).add_attribute(Attribute::Bold)
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| bold(h)).collect::<Vec<_>>());
    table
}

/// Render the outcome of an analysis run.
pub fn render(outcomes: &[ModuleOutcome], path: &Path, verbose: bool, quiet: bool) {
    let total = outcomes.len();
    let analyzed: Vec<&Analyzed> = outcomes.iter().filter_map(ModuleOutcome::analyzed).collect();
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let skipped = total - analyzed.len() - failed;
    let packages: usize = analyzed.iter().map(|a| a.dependencies.len()).sum();

    if quiet {
        println!(
            "Modules: {}  Analyzed: {}  Failed: {}  Skipped: {}",
            total,
            analyzed.len().to_string().green(),
            failed.to_string().red(),
            skipped.to_string().yellow(),
        );
        return;
    }

    header(path);

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Modules            : {}", total));
    println!(
        " │  {:<48} │",
        format!("{}  Analyzed        : {:>4}  ({} packages)", "✓".green(), analyzed.len(), packages)
    );
    println!(
        " │  {:<48} │",
        format!("{}  Failed          : {:>4}", "✗".red(), failed)
    );
    println!(
        " │  {:<48} │",
        format!("{}  Skipped         : {:>4}", "⚠".yellow(), skipped)
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    render_outcome_table(outcomes);
    println!();

    if failed > 0 {
        println!(" {} Modules that could not be analyzed:\n", "[ERROR]".red().bold());
        for outcome in outcomes {
            if let Some(e) = outcome.error() {
                println!("   {} {}", outcome.module.name.bold(), e);
            }
        }
        println!();
    }

    if verbose {
        for a in analyzed {
            println!(" {} {}\n", "[DEPS]".green().bold(), a.module.name);
            render_dependency_table(a);
            println!();
        }
    }
}

fn render_outcome_table(outcomes: &[ModuleOutcome]) {
    let mut table = new_table(&["Module", "Type", "Directory", "Imports", "Packages", "Status"]);

    for outcome in outcomes {
        let (status, color, imports, packages) = match &outcome.status {
            ModuleStatus::Analyzed(a) => (
                "✓ analyzed",
                Color::Green,
                a.imports.len().to_string(),
                a.dependencies.len().to_string(),
            ),
            ModuleStatus::Failed(_) => ("✗ failed", Color::Red, "-".to_string(), "-".to_string()),
            ModuleStatus::Skipped => ("⚠ skipped", Color::Yellow, "-".to_string(), "-".to_string()),
        };

        table.add_row(vec![
            Cell::new(&outcome.module.name),
            Cell::new(outcome.module.module_type.to_string()),
            Cell::new(outcome.module.dir.display().to_string()),
            Cell::new(imports).set_alignment(CellAlignment::Right),
            Cell::new(packages).set_alignment(CellAlignment::Right),
            Cell::new(status).fg(color).set_alignment(CellAlignment::Center),
        ]);
    }

    println!("{}", table);
}

fn render_dependency_table(analyzed: &Analyzed) {
    let mut table = new_table(&["Package", "Revision", "Type", "Location", "Direct", "Imports"]);

    for dep in &analyzed.dependencies {
        let direct = analyzed.imports.contains(&dep.id);
        table.add_row(vec![
            Cell::new(&dep.id.name),
            Cell::new(&dep.id.revision),
            Cell::new(&dep.id.package_type),
            Cell::new(&dep.id.location).fg(Color::DarkGrey),
            Cell::new(if direct { "yes" } else { "" }).set_alignment(CellAlignment::Center),
            Cell::new(dep.imports.len()).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("{}", table);
}

/// Render the modules auto-configuration would analyze.
pub fn render_discovery(discovery: &Discovery, path: &Path, quiet: bool) {
    if quiet {
        println!(
            "Modules: {}  Failures: {}",
            discovery.modules.len(),
            discovery.failures.len()
        );
        return;
    }

    header(path);

    if discovery.modules.is_empty() {
        println!(" No modules found.\n");
    } else {
        let mut table = new_table(&["Module", "Type", "Target", "Directory"]);
        for module in &discovery.modules {
            table.add_row(module_row(module));
        }
        println!("{}\n", table);
    }

    for failure in &discovery.failures {
        println!(" {} {}", "[WARN]".yellow().bold(), failure);
    }
}

fn module_row(module: &Module) -> Vec<Cell> {
    vec![
        Cell::new(&module.name),
        Cell::new(module.module_type.to_string()),
        Cell::new(&module.target),
        Cell::new(module.dir.display().to_string()),
    ]
}

/// Render every module type with its aliases and what the registry can do
/// for it.
pub fn render_types(registry: &AnalyzerRegistry) {
    let mut table = new_table(&["Type", "Aliases", "Analyze", "Discover", "Build"]);

    let mark = |supported: bool| {
        let cell = if supported {
            Cell::new("✓").fg(Color::Green)
        } else {
            Cell::new("-").fg(Color::DarkGrey)
        };
        cell.set_alignment(CellAlignment::Center)
    };

    for &ty in list_types() {
        let analyzer = registry.resolve(ty).ok();
        table.add_row(vec![
            Cell::new(ty.as_str()).add_attribute(Attribute::Bold),
            Cell::new(ty.aliases().join(", ")),
            mark(analyzer.is_some()),
            mark(analyzer.is_some_and(|a| a.discoverer().is_some())),
            mark(analyzer.is_some_and(|a| a.builder().is_some())),
        ]);
    }

    println!("{}", table);
}
