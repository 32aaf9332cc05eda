// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::TestStatus;

/// Command-line arguments for `wary`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "wary",
    version,
    about = "Test downstream packages against new upstream releases.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `wary.toml` in the current working directory if it exists,
    /// built-in defaults otherwise.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WARY_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Override `[storage].data_dir`.
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register DOWNSTREAM as depending on UPSTREAM.
    Register {
        upstream: String,
        downstream: String,
        /// Version constraint on the upstream, e.g. ">=1.0".
        #[arg(long, default_value = "")]
        constraint: String,
        /// Test command for this dependent (default: `[orchestrator].default_test_command`).
        #[arg(long, value_name = "CMD")]
        test_command: Option<String>,
        /// Maintainer contact.
        #[arg(long)]
        contact: Option<String>,
    },

    /// Remove DOWNSTREAM from the dependents of UPSTREAM.
    Unregister { upstream: String, downstream: String },

    /// List the registered dependents of UPSTREAM.
    ListDependents { upstream: String },

    /// Import the dependents of PACKAGE from Libraries.io into the graph.
    FetchGraph {
        package: String,
        /// Extra levels of dependents-of-dependents to follow.
        #[arg(long, default_value_t = 1)]
        depth: u32,
        /// Libraries.io API key.
        #[arg(long, env = "LIBRARIES_IO_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Test every dependent of UPSTREAM against VERSION.
    Test {
        upstream: String,
        version: String,
        /// Print the batch summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Poll the package index and test dependents on every new release.
    Watch {
        /// Packages to follow (default: `[watch].packages`).
        packages: Vec<String>,
        /// Poll interval in seconds (default: `[watch].interval_secs`).
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Query recorded test results, newest first.
    Results {
        #[arg(long)]
        upstream: Option<String>,
        #[arg(long)]
        downstream: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<TestStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one recorded result in full, including its output.
    ShowResult { test_id: String },

    /// Print the latest released version of PACKAGE.
    CheckVersion { package: String },
}

fn parse_status(s: &str) -> Result<TestStatus, String> {
    s.parse()
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_test_subcommand_with_global_flags() {
        let args = CliArgs::try_parse_from([
            "wary", "test", "dol", "0.2.51", "--json", "--data-dir", "/tmp/w",
        ])
        .unwrap();
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/w")));
        match args.command {
            Command::Test {
                upstream,
                version,
                json,
            } => {
                assert_eq!(upstream, "dol");
                assert_eq!(version, "0.2.51");
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn results_status_filter_is_validated() {
        let ok = CliArgs::try_parse_from(["wary", "results", "--status", "fail"]).unwrap();
        assert!(matches!(
            ok.command,
            Command::Results {
                status: Some(TestStatus::Fail),
                limit: 20,
                ..
            }
        ));
        assert!(CliArgs::try_parse_from(["wary", "results", "--status", "flaky"]).is_err());
    }

    #[test]
    fn watch_interval_must_be_positive() {
        let ok = CliArgs::try_parse_from(["wary", "watch", "dol", "--interval", "30"]).unwrap();
        assert!(matches!(
            ok.command,
            Command::Watch {
                interval: Some(30),
                ..
            }
        ));
        assert!(CliArgs::try_parse_from(["wary", "watch", "--interval", "0"]).is_err());
    }

    #[test]
    fn fetch_graph_defaults_to_depth_one() {
        let args =
            CliArgs::try_parse_from(["wary", "fetch-graph", "dol", "--api-key", "k"]).unwrap();
        match args.command {
            Command::FetchGraph {
                package,
                depth,
                api_key,
            } => {
                assert_eq!(package, "dol");
                assert_eq!(depth, 1);
                assert_eq!(api_key.as_deref(), Some("k"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let args = CliArgs::try_parse_from(["wary", "unregister", "dol", "my-package"]).unwrap();
        assert!(matches!(args.command, Command::Unregister { .. }));
    }
}
