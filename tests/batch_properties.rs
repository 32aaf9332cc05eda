use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use wary::engine::{Orchestrator, OrchestratorOptions};
use wary_test_utils::builders::edges;
use wary_test_utils::{FakeProvisioner, MemoryLedger, Script};

fn script_strategy() -> impl Strategy<Value = Script> {
    prop_oneof![
        4 => (0..4i32).prop_map(Script::Exit),
        1 => Just(Script::UpstreamInstallFails("no such version".to_string())),
        1 => Just(Script::DownstreamInstallFails("404".to_string())),
        1 => Just(Script::SpawnFails),
        1 => Just(Script::Hang),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // Every dependent gets exactly one run, and every run's status agrees
    // with its exit code, whatever mix of outcomes the backend produces.
    #[test]
    fn batch_has_one_consistent_run_per_dependent(
        scripts in proptest::collection::vec(script_strategy(), 0..7),
        concurrency in 1usize..4,
    ) {
        let names: Vec<String> = (0..scripts.len()).map(|i| format!("pkg-{i}")).collect();
        let mut provisioner = FakeProvisioner::new().with_run_delay(Duration::from_millis(1));
        for (name, script) in names.iter().zip(scripts) {
            provisioner = provisioner.script(name, script);
        }
        let provisioner = Arc::new(provisioner);
        let ledger = Arc::new(MemoryLedger::new());
        let orch = Orchestrator::new(
            Arc::clone(&provisioner),
            ledger.clone(),
            OrchestratorOptions {
                concurrency,
                run_timeout: Duration::from_millis(50),
                ..OrchestratorOptions::default()
            },
        );

        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dependents = edges("dol", &name_refs);

        let rt = tokio::runtime::Runtime::new().unwrap();
        let batch = rt.block_on(orch.run_batch("dol", "0.2.51", &dependents));

        prop_assert_eq!(batch.len(), names.len());
        let seen: BTreeSet<_> = batch.runs.iter().map(|r| r.downstream_package.clone()).collect();
        let expected: BTreeSet<_> = names.iter().cloned().collect();
        prop_assert_eq!(seen, expected);

        for run in &batch.runs {
            prop_assert!(run.is_consistent(), "inconsistent run: {:?}", run);
            prop_assert!(run.finished_at >= run.started_at);
        }
        prop_assert_eq!(ledger.runs().len(), names.len());
        prop_assert!(provisioner.max_in_flight() <= concurrency);
    }
}
