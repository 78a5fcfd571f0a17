/// Property-based tests for status mapping and lifecycle sequences
///
/// These tests generate random runtime status strings and random sequences
/// of lifecycle operations and verify invariants hold across all of them:
/// - Status mapping is total and ignores case and surrounding whitespace
/// - No row is left in a transitional status once an operation returns
/// - The stored status agrees with what the backend runs
use cloudport::backend::SimulatedBackend;
use cloudport::container::{Caller, ContainerSpec, ServiceType};
use cloudport::state::ContainerRepository;
use cloudport::{map_runtime_status, Orchestrator, Status};
use proptest::prelude::*;
use std::sync::Arc;

/// Operation types for property-based testing
#[derive(Debug, Clone, Copy)]
enum Operation {
    Start,
    Stop,
    Restart,
    /// The container dies outside the platform and a listing notices
    Crash,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Start),
        Just(Operation::Stop),
        Just(Operation::Restart),
        Just(Operation::Crash),
    ]
}

fn runtime_status_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "created", "running", "restarting", "paused", "exited", "dead", "removing",
            "Succeeded", "InProgress", "Provisioning", "Failed", "Canceled", "Deleting",
        ])
        .prop_map(String::from),
        ".{0,16}",
    ]
}

proptest! {
    /// Every string maps to a canonical status.
    #[test]
    fn test_status_mapping_is_total(raw in ".{0,32}") {
        let status = map_runtime_status(&raw);
        prop_assert!(Status::ALL.contains(&status));
    }

    #[test]
    fn test_status_mapping_ignores_case_and_padding(raw in runtime_status_strategy()) {
        let expected = map_runtime_status(&raw);
        prop_assert_eq!(map_runtime_status(&raw.to_ascii_uppercase()), expected);
        prop_assert_eq!(map_runtime_status(&format!("  {}\n", raw)), expected);
    }

    /// Random lifecycle sequences always settle in a resting status.
    #[test]
    fn test_lifecycle_sequences_settle(ops in prop::collection::vec(operation_strategy(), 1..25)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let backend = Arc::new(SimulatedBackend::new());
            let orchestrator = Orchestrator::builder()
                .backend(backend.clone())
                .in_memory()
                .build()
                .await
                .expect("Failed to build orchestrator");
            let repo = ContainerRepository::new(orchestrator.store().clone());
            let caller = Caller::client("alice", "t1");
            let spec = ContainerSpec::new("web", "nginx:alpine", "t1", ServiceType::WebServer);
            let row = orchestrator.create(&caller, spec).await.unwrap();

            for op in &ops {
                let expected = match op {
                    Operation::Start => {
                        orchestrator.start(&caller, &row.id).await.unwrap();
                        Status::Running
                    }
                    Operation::Stop => {
                        orchestrator.stop(&caller, &row.id).await.unwrap();
                        Status::Stopped
                    }
                    Operation::Restart => {
                        orchestrator.restart(&caller, &row.id).await.unwrap();
                        Status::Running
                    }
                    Operation::Crash => {
                        backend.set_state(&row.id, "dead");
                        orchestrator.list(&caller, None, false).await.unwrap();
                        Status::Error
                    }
                };

                let stored = repo.get(&row.id).await.unwrap().unwrap();
                assert!(
                    !stored.status.is_transitional(),
                    "{:?} left {} in {}",
                    op,
                    row.id,
                    stored.status
                );
                assert_eq!(stored.status, expected, "after {:?}", op);

                let live = backend.state_of(&row.id).unwrap();
                assert_eq!(map_runtime_status(&live), expected);
            }
        });
    }
}
