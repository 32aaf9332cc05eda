// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod graph;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod types;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::ConfigFile;
use crate::config::loader::load_or_default;
use crate::engine::{BatchResult, Orchestrator};
use crate::exec::VenvProvisioner;
use crate::fs::{FileSystem, JsonStore, RealFileSystem};
use crate::graph::librariesio::DEFAULT_LIBRARIES_IO_URL;
use crate::graph::{DependencyGraph, DependencySource, LibrariesIo, import_dependents};
use crate::ledger::{ResultQuery, ResultsLedger, ResultsStore};
use crate::model::{EdgeMetadata, format_test_run};
use crate::watch::{PypiIndex, VersionWatcher};

/// Subdirectories of the data directory.
const GRAPHS_DIR: &str = "graphs";
const RESULTS_DIR: &str = "results";
const VERSIONS_DIR: &str = "versions";

/// Persistent stores rooted at the data directory.
struct Stores {
    graph: Arc<DependencyGraph>,
    ledger: Arc<ResultsLedger>,
    versions: JsonStore,
}

impl Stores {
    fn open(data_dir: &Path) -> Self {
        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        Self {
            graph: Arc::new(DependencyGraph::new(Arc::clone(&fs), data_dir.join(GRAPHS_DIR))),
            ledger: Arc::new(ResultsLedger::new(Arc::clone(&fs), data_dir.join(RESULTS_DIR))),
            versions: JsonStore::new(fs, data_dir.join(VERSIONS_DIR)),
        }
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the file-backed graph, ledger and version stores
/// - the venv provisioner and orchestrator
/// - the package index (for `watch` / `check-version`)
/// - Ctrl-C handling while watching
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(args.config.as_deref())?;
    let data_dir = args.data_dir.clone().unwrap_or_else(|| cfg.data_dir());
    info!(data_dir = %data_dir.display(), "using data directory");
    let stores = Stores::open(&data_dir);

    match args.command {
        Command::Register {
            upstream,
            downstream,
            constraint,
            test_command,
            contact,
        } => {
            let metadata = EdgeMetadata {
                test_command,
                contact,
                ..EdgeMetadata::default()
            };
            let edge = stores
                .graph
                .register_dependent(&upstream, &downstream, &constraint, metadata)?;
            if edge.parsed_constraint().is_none() && !edge.constraint.trim().is_empty() {
                warn!(constraint = %edge.constraint, "constraint has no recognised operator; stored as written");
            }
            println!(
                "Registered {} -> {}{}",
                edge.upstream,
                edge.downstream,
                edge.constraint_label()
            );
        }

        Command::Unregister {
            upstream,
            downstream,
        } => {
            if stores.graph.unregister_dependent(&upstream, &downstream)? {
                println!("Unregistered {upstream} -> {downstream}");
            } else {
                println!("{downstream} was not registered as a dependent of {upstream}");
            }
        }

        Command::FetchGraph {
            package,
            depth,
            api_key,
        } => {
            let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
                bail!("no Libraries.io API key (pass --api-key or set LIBRARIES_IO_API_KEY)");
            };
            println!("Fetching dependents of {package} (depth={depth})...");
            let index = LibrariesIo::new(DEFAULT_LIBRARIES_IO_URL, api_key)?;
            let edges = import_dependents(&index, stores.graph.as_ref(), &package, depth)
                .await
                .with_context(|| format!("could not fetch dependents of {package}"))?;
            println!("Imported {} dependency edges", edges.len());
        }

        Command::ListDependents { upstream } => {
            let edges = stores.graph.get_dependents(&upstream)?;
            if edges.is_empty() {
                println!("No dependents registered for {upstream}");
            } else {
                println!("Dependents of {upstream} ({}):", edges.len());
                for edge in edges {
                    println!(
                        "  {}{}  [test: {}]",
                        edge.downstream,
                        edge.constraint_label(),
                        edge.test_command_or(&cfg.orchestrator.default_test_command)
                    );
                }
            }
        }

        Command::Test {
            upstream,
            version,
            json,
        } => {
            let orchestrator = build_orchestrator(&cfg, &stores);
            let batch = orchestrator
                .test_dependents(stores.graph.as_ref(), &upstream, &version)
                .await?;
            print_batch(&batch, json)?;
        }

        Command::Watch { packages, interval } => {
            let packages = if packages.is_empty() {
                cfg.watch.packages.clone()
            } else {
                packages
            };
            if packages.is_empty() {
                bail!("no packages to watch (pass them as arguments or set [watch].packages)");
            }
            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| cfg.watch_interval());

            let index = PypiIndex::new(cfg.watch.index_url.clone())?;
            let watcher = VersionWatcher::new(index, stores.versions.clone());
            let orchestrator = build_orchestrator(&cfg, &stores);
            let graph = Arc::clone(&stores.graph);

            watcher
                .watch_continuously(
                    &packages,
                    interval,
                    move |package, change| {
                        let orchestrator = orchestrator.clone();
                        let graph = Arc::clone(&graph);
                        async move {
                            info!(
                                package = %package,
                                old = change.old.as_deref().unwrap_or("<none>"),
                                new = %change.new,
                                "testing dependents of new release"
                            );
                            match orchestrator
                                .test_dependents(graph.as_ref(), &package, &change.new)
                                .await
                            {
                                Ok(batch) => {
                                    if let Err(e) = print_batch(&batch, false) {
                                        error!(error = %e, "could not print batch");
                                    }
                                }
                                Err(e) => error!(package = %package, error = %e, "test batch failed"),
                            }
                        }
                    },
                    shutdown_signal(),
                )
                .await?;
        }

        Command::Results {
            upstream,
            downstream,
            status,
            limit,
        } => {
            let query = ResultQuery {
                upstream,
                downstream,
                status,
                after: None,
                limit: Some(limit),
            };
            let runs = stores.ledger.query_results(&query)?;
            if runs.is_empty() {
                println!("No results found");
            }
            for run in runs {
                println!("{}\n", format_test_run(&run));
            }
        }

        Command::ShowResult { test_id } => {
            let run = stores.ledger.get_result(&test_id)?;
            println!("{}", format_test_run(&run));
            println!("   Downstream version: {}", run.downstream_version);
            println!("   Command: {}", run.test_command);
            println!("   Exit code: {}", run.exit_code);
            println!(
                "   Duration: {:.1}s",
                run.duration().num_milliseconds() as f64 / 1000.0
            );
            println!("\n{}", run.output);
        }

        Command::CheckVersion { package } => {
            let index = PypiIndex::new(cfg.watch.index_url.clone())?;
            let watcher = VersionWatcher::new(index, stores.versions.clone());
            let latest = watcher
                .get_latest_version(&package)
                .await
                .with_context(|| format!("could not determine latest version of {package}"))?;
            let stored = watcher.get_stored_version(&package)?;
            println!("{package}: latest {latest}");
            if let Some(stored) = stored {
                println!("  last seen: {stored}");
            }
        }
    }

    Ok(())
}

fn build_orchestrator(cfg: &ConfigFile, stores: &Stores) -> Orchestrator<VenvProvisioner> {
    let ledger: Arc<dyn ResultsStore> = stores.ledger.clone();
    Orchestrator::new(
        Arc::new(VenvProvisioner::new(cfg.orchestrator.python.clone())),
        ledger,
        cfg.orchestrator_options(),
    )
}

fn print_batch(batch: &BatchResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&batch.summary())?);
        return Ok(());
    }

    if batch.is_empty() {
        println!("No dependents registered for {}", batch.upstream);
        return Ok(());
    }

    println!("Testing {}@{}", batch.upstream, batch.version);
    for run in &batch.runs {
        println!(
            "  {} {}: {} (exit {}, id {})",
            run.status.symbol(),
            run.downstream_package,
            run.status,
            run.exit_code,
            run.test_id
        );
    }
    println!(
        "Summary: {} total, {} passed, {} failed, {} errored",
        batch.len(),
        batch.passed(),
        batch.failed(),
        batch.errored()
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
