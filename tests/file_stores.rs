mod common;
use crate::common::{init_tracing, options, orchestrator, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wary::errors::WaryError;
use wary::fs::{FileSystem, RealFileSystem};
use wary::graph::{DependencyGraph, DependencySource};
use wary::ledger::{ResultQuery, ResultsLedger, ResultsStore};
use wary::model::EdgeMetadata;
use wary::types::TestStatus;
use wary_test_utils::{FakeProvisioner, Script};

type TestResult = Result<(), Box<dyn Error>>;

fn real_fs() -> Arc<dyn FileSystem> {
    Arc::new(RealFileSystem)
}

#[tokio::test]
async fn registered_dependents_are_tested_and_results_reloadable() -> TestResult {
    with_timeout(async {
        init_tracing();
        let data = TempDir::new()?;

        let graph = DependencyGraph::new(real_fs(), data.path().join("graphs"));
        for downstream in ["pkg-a", "pkg-b"] {
            graph.register_dependent("dol", downstream, ">=0.2", EdgeMetadata::default())?;
        }

        let ledger = Arc::new(ResultsLedger::new(real_fs(), data.path().join("results")));
        let provisioner = Arc::new(FakeProvisioner::new().script("pkg-b", Script::Exit(2)));
        let orch = orchestrator(provisioner, ledger.clone(), options(2, Duration::from_secs(30)));

        let batch = orch.test_dependents(&graph, "dol", "0.2.51").await?;
        assert_eq!(batch.len(), 2);

        // A fresh ledger over the same directory sees every run.
        let reopened = ResultsLedger::new(real_fs(), data.path().join("results"));
        assert_eq!(reopened.len()?, 2);
        for run in &batch.runs {
            assert_eq!(&reopened.get_result(&run.test_id)?, run);
        }

        let failures = reopened.query_results(&ResultQuery {
            status: Some(TestStatus::Fail),
            ..Default::default()
        })?;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].downstream_package, "pkg-b");
        assert_eq!(failures[0].exit_code, 2);

        let latest = reopened
            .get_latest_result("dol", "pkg-a")?
            .ok_or("no result for pkg-a")?;
        assert_eq!(latest.status, TestStatus::Pass);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn registering_twice_keeps_a_single_edge() -> TestResult {
    with_timeout(async {
        init_tracing();
        let data = TempDir::new()?;
        let graph = DependencyGraph::new(real_fs(), data.path());

        graph.register_dependent("dol", "my-package", ">=0.1", EdgeMetadata::default())?;
        let metadata = EdgeMetadata {
            test_command: Some("pytest tests/".to_string()),
            ..EdgeMetadata::default()
        };
        graph.register_dependent("dol", "my-package", ">=0.2", metadata)?;

        let edges = graph.get_dependents("dol")?;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].constraint, ">=0.2");
        assert_eq!(edges[0].test_command_or("pytest"), "pytest tests/");
        assert_eq!(graph.upstreams()?, vec!["dol".to_string()]);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn results_are_write_once() -> TestResult {
    with_timeout(async {
        init_tracing();
        let data = TempDir::new()?;
        let ledger = Arc::new(ResultsLedger::new(real_fs(), data.path()));
        let orch = orchestrator(
            Arc::new(FakeProvisioner::new()),
            ledger.clone(),
            options(1, Duration::from_secs(30)),
        );

        let run = orch
            .run_one("dol", "0.2.51", "my-package", "pytest", Duration::from_secs(5))
            .await;
        assert!(ledger.is_empty()?, "run_one does not persist");

        ledger.add_result(&run)?;
        let err = ledger.add_result(&run).unwrap_err();
        assert!(matches!(err, WaryError::DuplicateRun(ref id) if id == &run.test_id));
        assert_eq!(ledger.len()?, 1);

        Ok(())
    })
    .await
}
