//! CLI subcommands — fmt, lint, graph, run, test, clean.
//!
//! Argument parsing stays here at the edge; each command maps onto one core
//! entry point and any returned error becomes a non-zero exit in main.

use crate::core::{executor, lint, parser, resolver, serializer};
use crate::{cache, sidecar};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rewrite a notebook in canonical form
    Fmt {
        /// Path to the .woofnb file
        file: PathBuf,
    },

    /// Check notebook invariants without executing
    Lint {
        /// Path to the .woofnb file
        file: PathBuf,
    },

    /// Print the dependency graph in topological order
    Graph {
        /// Path to the .woofnb file
        file: PathBuf,
    },

    /// Execute a notebook
    Run {
        /// Path to the .woofnb file
        file: PathBuf,

        /// Restrict execution to these cell ids (repeatable)
        #[arg(long = "cell")]
        cell: Vec<String>,

        /// Do not expand the selection to its dependency closure
        #[arg(long)]
        no_deps: bool,
    },

    /// Execute test cells plus their dependency closure
    Test {
        /// Path to the .woofnb file
        file: PathBuf,
    },

    /// Remove sidecar and cache artifacts
    Clean {
        /// Path to the .woofnb file
        file: Option<PathBuf>,

        /// Clean every notebook under the working directory
        #[arg(long)]
        all: bool,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Fmt { file } => cmd_fmt(&file),
        Commands::Lint { file } => cmd_lint(&file),
        Commands::Graph { file } => cmd_graph(&file),
        Commands::Run {
            file,
            cell,
            no_deps,
        } => cmd_run(&file, cell, no_deps, false),
        Commands::Test { file } => cmd_run(&file, Vec::new(), false, true),
        Commands::Clean { file, all } => cmd_clean(file.as_deref(), all),
    }
}

fn cmd_fmt(file: &Path) -> Result<(), String> {
    let original = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    let formatted = serializer::format_text(&original).map_err(|e| e.to_string())?;
    std::fs::write(file, &formatted)
        .map_err(|e| format!("cannot write {}: {}", file.display(), e))?;
    println!("Formatted: {}", file.display());
    Ok(())
}

fn cmd_lint(file: &Path) -> Result<(), String> {
    let nb = parser::parse_file(file)?;
    let diags = lint::lint_notebook(&nb);
    for d in diags
        .iter()
        .filter(|d| d.severity == lint::Severity::Warning)
    {
        println!("{}", d);
    }
    for d in diags.iter().filter(|d| d.severity == lint::Severity::Error) {
        println!("{}", d);
    }
    if lint::has_errors(&diags) {
        return Err(format!(
            "{} lint error(s)",
            diags
                .iter()
                .filter(|d| d.severity == lint::Severity::Error)
                .count()
        ));
    }
    println!("OK: no lint errors");
    Ok(())
}

fn cmd_graph(file: &Path) -> Result<(), String> {
    let nb = parser::parse_file(file)?;
    let order = resolver::topo_order(&nb)
        .map_err(|members| format!("dependency cycle involving: {}", members.join(", ")))?;
    for idx in order {
        let cell = &nb.cells[idx];
        println!("{} -> [{}]", cell.id, cell.deps.join(", "));
    }
    Ok(())
}

fn cmd_run(file: &Path, select: Vec<String>, no_deps: bool, tests_only: bool) -> Result<(), String> {
    let nb = parser::parse_file(file)?;
    let opts = executor::RunOptions {
        select,
        no_deps,
        tests_only,
        ..Default::default()
    };
    let summary = executor::run(&nb, &opts)?;

    for (id, status) in &summary.statuses {
        println!("{:<22} {}", status.to_string(), id);
    }
    let failed = summary.statuses.len()
        - summary.count(crate::core::model::CellStatus::Success)
        - summary.count(crate::core::model::CellStatus::Replayed)
        - summary.count(crate::core::model::CellStatus::Skipped);

    if summary.ok() {
        println!(
            "Run complete: {} executed, {} replayed.",
            summary.count(crate::core::model::CellStatus::Success),
            summary.count(crate::core::model::CellStatus::Replayed)
        );
        Ok(())
    } else {
        Err(format!("{} cell(s) did not succeed", failed))
    }
}

fn cmd_clean(file: Option<&Path>, all: bool) -> Result<(), String> {
    if all {
        return clean_all_in(Path::new("."));
    }
    let file = file.ok_or_else(|| "clean requires a file or --all".to_string())?;
    clean_one(file)
}

fn clean_one(file: &Path) -> Result<(), String> {
    sidecar::remove(&sidecar::sidecar_path(file))?;
    cache::clean_notebook(file)?;
    println!("Cleaned: {}", file.display());
    Ok(())
}

/// Walk one directory level for `*.woofnb` files, clean each, and drop the
/// whole cache root.
fn clean_all_in(dir: &Path) -> Result<(), String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("cannot read {}: {}", dir.display(), e))?;
    let mut cleaned = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("woofnb") {
            sidecar::remove(&sidecar::sidecar_path(&path))?;
            cleaned += 1;
        }
    }
    cache::clean_all(&dir.join(".woof-cache"))?;
    println!("Cleaned {} notebook(s)", cleaned);
    Ok(())
}
