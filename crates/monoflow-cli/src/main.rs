//! monoflow - layered CI execution for monorepos
//!
//! ## Commands
//!
//! - `plan`: Print the execution layers for a set of targets or changes
//! - `run`: Plan and execute module units layer by layer, failing fast
//! - `affected`: List the modules impacted by a set of changed paths

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use monoflow_ci::ProcessJobBackend;
use monoflow_core::{
    cancel_pair, capture_head_sha, changed_files, filter_by_units, plan, render_pipeline,
    render_plan, write_result_json, ChangeDetector, ContractSource, DependencyGraph,
    ExecutionPlan, ManifestSource, Orchestrator, OrchestratorConfig, PathChangeDetector,
};
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "monoflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Layered, fail-fast CI execution for monorepo modules", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which modules a command works on.
#[derive(Args, Debug, Clone)]
struct Selection {
    /// Module manifest (TOML or JSON)
    #[arg(short, long, env = "MONOFLOW_MANIFEST", default_value = "monoflow.toml")]
    manifest: PathBuf,

    /// Target module (repeatable; none means every module)
    #[arg(short, long = "target")]
    targets: Vec<String>,

    /// Changed path; its owning module and all dependents become targets
    #[arg(long)]
    changed: Vec<PathBuf>,

    /// Treat files changed since this git ref as `--changed` paths
    #[arg(long)]
    since: Option<String>,

    /// Repository root that module paths are relative to
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution plan
    Plan {
        #[command(flatten)]
        selection: Selection,

        /// Keep modules without a unit in the printed plan
        #[arg(long)]
        all_units: bool,
    },

    /// Plan and execute module units
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Git ref to run at (default: HEAD of --workdir)
        #[arg(long = "ref", env = "MONOFLOW_REF")]
        git_ref: Option<String>,

        /// Write the pipeline result as JSON to this file
        #[arg(long)]
        result_json: Option<PathBuf>,
    },

    /// List modules affected by changed paths, including dependents
    Affected {
        /// Module manifest (TOML or JSON)
        #[arg(short, long, env = "MONOFLOW_MANIFEST", default_value = "monoflow.toml")]
        manifest: PathBuf,

        /// Changed paths, relative to the repository root
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    monoflow_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Plan {
            selection,
            all_units,
        } => cmd_plan(&selection, all_units),
        Commands::Run {
            selection,
            git_ref,
            result_json,
        } => {
            let code = cmd_run(&selection, git_ref, result_json.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Affected { manifest, paths } => cmd_affected(&manifest, &paths),
    }
}

fn load_graph(manifest: &Path) -> Result<DependencyGraph> {
    let modules = ManifestSource::new(manifest)
        .load()
        .with_context(|| format!("Failed to load manifest {:?}", manifest))?;
    let graph = DependencyGraph::build(modules).context("Invalid module graph")?;
    debug!(modules = graph.len(), "module graph loaded");
    Ok(graph)
}

/// Resolve the selection to plan targets. `None` means changes were given
/// but touched no module, so there is nothing to do.
fn resolve_targets(graph: &DependencyGraph, selection: &Selection) -> Result<Option<Vec<String>>> {
    let mut changed = selection.changed.clone();
    if let Some(base) = &selection.since {
        let since = changed_files(&selection.workdir, base)
            .with_context(|| format!("Failed to list files changed since {base}"))?;
        changed.extend(since);
    }

    let mut targets = selection.targets.clone();
    if changed.is_empty() && selection.since.is_none() {
        return Ok(Some(targets));
    }

    let impacted = PathChangeDetector::new(graph)
        .with_dependents(true)
        .impacted(&changed);
    info!(
        changed = changed.len(),
        impacted = impacted.len(),
        "resolved changed paths"
    );
    if impacted.is_empty() && targets.is_empty() {
        return Ok(None);
    }
    targets.extend(impacted);
    Ok(Some(targets))
}

/// Build the plan for a selection, dropping unit-less modules unless
/// `all_units` is set.
fn build_plan(
    graph: &DependencyGraph,
    selection: &Selection,
    all_units: bool,
) -> Result<Option<ExecutionPlan>> {
    let Some(targets) = resolve_targets(graph, selection)? else {
        return Ok(None);
    };
    let full = plan(graph, &targets).context("Planning failed")?;
    if all_units {
        return Ok(Some(full));
    }
    Ok(Some(filter_by_units(&full, graph)))
}

fn cmd_plan(selection: &Selection, all_units: bool) -> Result<()> {
    let graph = load_graph(&selection.manifest)?;
    match build_plan(&graph, selection, all_units)? {
        Some(plan) => print!("{}", render_plan(&plan)),
        None => println!("Nothing to do: no module is affected by the changes"),
    }
    Ok(())
}

/// Plan and execute; returns the process exit code.
async fn cmd_run(
    selection: &Selection,
    git_ref: Option<String>,
    result_json: Option<&Path>,
) -> Result<i32> {
    let graph = load_graph(&selection.manifest)?;
    let Some(plan) = build_plan(&graph, selection, false)? else {
        println!("Nothing to do: no module is affected by the changes");
        return Ok(0);
    };

    let git_ref = match git_ref {
        Some(r) => r,
        None => capture_head_sha(&selection.workdir)
            .context("Failed to resolve --ref from git HEAD")?,
    };

    print!("{}", render_plan(&plan));
    println!();

    let backend = Arc::new(ProcessJobBackend::from_graph(&graph, &selection.workdir));
    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling pipeline");
            cancel.cancel();
        }
    });

    let result = Orchestrator::new(backend)
        .with_config(OrchestratorConfig::from_env())
        .with_cancel_signal(signal)
        .run(&plan, &git_ref)
        .await;

    print!("{}", render_pipeline(&result));

    if let Some(path) = result_json {
        write_result_json(path, &result)?;
        info!(path = %path.display(), "pipeline result written");
    }

    Ok(result.exit_code())
}

fn cmd_affected(manifest: &Path, paths: &[PathBuf]) -> Result<()> {
    let graph = load_graph(manifest)?;
    let impacted = PathChangeDetector::new(&graph)
        .with_dependents(true)
        .impacted(paths);
    for moniker in impacted {
        println!("{moniker}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[[module]]
moniker = "core"
path = "libs/core"

[module.unit]
command = ["true"]

[[module]]
moniker = "docs"
path = "docs"
dependencies = ["core"]

[[module]]
moniker = "api"
path = "services/api"
dependencies = ["docs"]

[module.unit]
command = ["true"]

[[module]]
moniker = "tool"
path = "tools/tool"

[module.unit]
command = ["false"]
"#;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["libs/core", "docs", "services/api", "tools/tool"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("monoflow.toml"), MANIFEST).unwrap();
        dir
    }

    fn selection(dir: &Path) -> Selection {
        Selection {
            manifest: dir.join("monoflow.toml"),
            targets: Vec::new(),
            changed: Vec::new(),
            since: None,
            workdir: dir.to_path_buf(),
        }
    }

    fn layer_ids(plan: &ExecutionPlan) -> Vec<Vec<&str>> {
        plan.layers()
            .iter()
            .map(|l| l.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "monoflow", "run", "-m", "m.toml", "-t", "api", "-t", "core", "--ref", "abc",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                selection, git_ref, ..
            } => {
                assert_eq!(selection.manifest, PathBuf::from("m.toml"));
                assert_eq!(selection.targets, vec!["api", "core"]);
                assert_eq!(git_ref.as_deref(), Some("abc"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_plan_filters_unitless_modules() {
        let dir = workspace();
        let mut sel = selection(dir.path());
        sel.targets = vec!["api".to_string()];
        let graph = load_graph(&sel.manifest).unwrap();

        let filtered = build_plan(&graph, &sel, false).unwrap().unwrap();
        assert_eq!(layer_ids(&filtered), vec![vec!["core"], vec!["api"]]);

        let full = build_plan(&graph, &sel, true).unwrap().unwrap();
        assert_eq!(layer_ids(&full), vec![vec!["core"], vec!["docs"], vec!["api"]]);
    }

    #[test]
    fn test_changed_paths_select_dependents() {
        let dir = workspace();
        let mut sel = selection(dir.path());
        sel.changed = vec![PathBuf::from("libs/core/src/lib.rs")];
        let graph = load_graph(&sel.manifest).unwrap();

        let targets = resolve_targets(&graph, &sel).unwrap().unwrap();
        assert_eq!(targets, vec!["api", "core", "docs"]);
    }

    #[test]
    fn test_unowned_changes_mean_nothing_to_do() {
        let dir = workspace();
        let mut sel = selection(dir.path());
        sel.changed = vec![PathBuf::from("README.md")];
        let graph = load_graph(&sel.manifest).unwrap();

        assert!(resolve_targets(&graph, &sel).unwrap().is_none());
        assert!(build_plan(&graph, &sel, false).unwrap().is_none());
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let dir = workspace();
        let mut sel = selection(dir.path());
        sel.targets = vec!["ghost".to_string()];
        let graph = load_graph(&sel.manifest).unwrap();
        assert!(build_plan(&graph, &sel, false).is_err());
    }

    #[tokio::test]
    async fn test_run_exit_code_follows_pipeline() {
        let dir = workspace();
        let mut sel = selection(dir.path());
        sel.targets = vec!["api".to_string()];
        let out = dir.path().join("result.json");

        let code = cmd_run(&sel, Some("abc".to_string()), Some(&out))
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert!(out.exists());

        sel.targets = vec!["tool".to_string()];
        let code = cmd_run(&sel, Some("abc".to_string()), None).await.unwrap();
        assert_eq!(code, 1);
    }
}
