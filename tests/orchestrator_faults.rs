mod common;
use crate::common::{init_tracing, options, orchestrator, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use wary::errors::WaryError;
use wary::model::NOT_EXECUTED;
use wary::types::TestStatus;
use wary_test_utils::builders::edges;
use wary_test_utils::{FakeProvisioner, MemoryLedger, Script, StaticGraph, UnreachableGraph};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn empty_dependents_yield_empty_batch_without_provisioning() -> TestResult {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(FakeProvisioner::new());
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(
            Arc::clone(&provisioner),
            ledger.clone(),
            options(3, Duration::from_secs(60)),
        );

        let batch = orch.run_batch("dol", "0.2.51", &[]).await;
        assert!(batch.is_empty());

        let batch = orch
            .test_dependents(&StaticGraph::default(), "dol", "0.2.51")
            .await?;
        assert!(batch.is_empty());

        assert!(provisioner.provisioned().is_empty());
        assert!(ledger.runs().is_empty());

        Ok(())
    })
    .await
}

#[tokio::test]
async fn unreachable_graph_is_an_error_not_an_empty_batch() {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(FakeProvisioner::new());
        let orch = orchestrator(
            Arc::clone(&provisioner),
            Arc::new(MemoryLedger::new()),
            options(3, Duration::from_secs(60)),
        );

        let err = orch
            .test_dependents(&UnreachableGraph, "dol", "0.2.51")
            .await
            .unwrap_err();
        assert!(matches!(err, WaryError::Graph(_)));
        assert!(provisioner.provisioned().is_empty());
    })
    .await
}

#[tokio::test]
async fn panicking_run_becomes_error_record_and_others_continue() -> TestResult {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(FakeProvisioner::new().script("pkg-b", Script::Panic));
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(provisioner, ledger.clone(), options(3, Duration::from_secs(60)));

        let batch = orch
            .run_batch("dol", "0.2.51", &edges("dol", &["pkg-a", "pkg-b", "pkg-c"]))
            .await;

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.faults, 1);
        assert_eq!(batch.passed(), 2);

        let panicked = batch
            .runs
            .iter()
            .find(|r| r.downstream_package == "pkg-b")
            .ok_or("missing pkg-b run")?;
        assert_eq!(panicked.status, TestStatus::Error);
        assert_eq!(panicked.exit_code, NOT_EXECUTED);
        assert!(panicked.output.contains("scripted panic while testing pkg-b"));

        // The fault record is persisted too.
        assert_eq!(ledger.runs().len(), 3);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn ledger_failure_turns_one_run_into_an_error_record() -> TestResult {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(FakeProvisioner::new());
        let ledger = Arc::new(MemoryLedger::new().failing_for("pkg-b"));
        let orch = orchestrator(provisioner, ledger.clone(), options(2, Duration::from_secs(60)));

        let batch = orch
            .run_batch("dol", "0.2.51", &edges("dol", &["pkg-a", "pkg-b", "pkg-c"]))
            .await;

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.faults, 1);

        let faulted = batch
            .runs
            .iter()
            .find(|r| r.downstream_package == "pkg-b")
            .ok_or("missing pkg-b run")?;
        assert_eq!(faulted.status, TestStatus::Error);
        assert!(faulted.output.contains("ledger is unreachable"));

        let stored: Vec<_> = ledger
            .runs()
            .into_iter()
            .map(|r| r.downstream_package)
            .collect();
        assert_eq!(stored.len(), 2);
        assert!(!stored.contains(&"pkg-b".to_string()));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn spawn_failure_and_downstream_install_failure_are_errors() -> TestResult {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(
            FakeProvisioner::new()
                .script("no-cmd", Script::SpawnFails)
                .script(
                    "not-on-pypi",
                    Script::DownstreamInstallFails("404 Not Found".to_string()),
                ),
        );
        let orch = orchestrator(
            Arc::clone(&provisioner),
            Arc::new(MemoryLedger::new()),
            options(3, Duration::from_secs(60)),
        );

        let batch = orch
            .run_batch("dol", "0.2.51", &edges("dol", &["no-cmd", "not-on-pypi"]))
            .await;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.errored(), 2);
        for run in &batch.runs {
            assert_eq!(run.exit_code, NOT_EXECUTED);
            assert!(run.is_consistent());
        }
        let install = batch
            .runs
            .iter()
            .find(|r| r.downstream_package == "not-on-pypi")
            .ok_or("missing run")?;
        assert!(install.output.contains("Failed to install not-on-pypi: 404 Not Found"));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn sandboxes_are_distinct_and_removed_after_the_batch() -> TestResult {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(
            FakeProvisioner::new()
                .script("pkg-b", Script::Exit(1))
                .script("pkg-c", Script::Panic),
        );
        let orch = orchestrator(
            Arc::clone(&provisioner),
            Arc::new(MemoryLedger::new()),
            options(3, Duration::from_secs(60)),
        );

        let batch = orch
            .run_batch(
                "dol",
                "0.2.51",
                &edges("dol", &["pkg-a", "pkg-b", "pkg-c", "pkg-d"]),
            )
            .await;
        assert_eq!(batch.len(), 4);

        let sandboxes = provisioner.sandboxes();
        assert_eq!(sandboxes.len(), 4, "one sandbox per run");
        for root in sandboxes.keys() {
            assert!(!root.exists(), "sandbox {} was not torn down", root.display());
        }

        Ok(())
    })
    .await
}

#[tokio::test]
async fn dropping_a_batch_cancels_its_runs() -> TestResult {
    with_timeout(async {
        init_tracing();

        let provisioner = Arc::new(FakeProvisioner::new().script("slow-pkg", Script::Hang));
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(
            Arc::clone(&provisioner),
            ledger.clone(),
            options(1, Duration::from_secs(1)),
        );

        let dependents = edges("dol", &["slow-pkg"]);
        let cut_short = tokio::time::timeout(
            Duration::from_millis(200),
            orch.run_batch("dol", "0.2.51", &dependents),
        )
        .await;
        assert!(cut_short.is_err(), "batch should still be running");

        // Long enough for a detached run to have finished and persisted.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(ledger.runs().is_empty(), "cancelled run must not be recorded");
        assert!(provisioner.executed().len() <= 1);
        for root in provisioner.sandboxes().keys() {
            assert!(!root.exists(), "sandbox {} survived cancellation", root.display());
        }

        Ok(())
    })
    .await
}
