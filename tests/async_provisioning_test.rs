/// Background provisioning on backends that finish `create` asynchronously.
use cloudport::backend::SimulatedBackend;
use cloudport::container::{Caller, ContainerSpec, ServiceType};
use cloudport::state::ContainerRepository;
use cloudport::{Orchestrator, Status};
use std::sync::Arc;
use std::time::Duration;

async fn create_async_orchestrator() -> (Orchestrator, Arc<SimulatedBackend>) {
    let backend = Arc::new(SimulatedBackend::with_async_provisioning());
    let orchestrator = Orchestrator::builder()
        .backend(backend.clone())
        .in_memory()
        .build()
        .await
        .expect("Failed to build orchestrator");
    (orchestrator, backend)
}

fn spec(name: &str) -> ContainerSpec {
    ContainerSpec::new(name, "nginx:alpine", "t1", ServiceType::WebServer)
}

#[tokio::test]
async fn test_create_returns_creating_then_runs() {
    let (orchestrator, backend) = create_async_orchestrator().await;
    let caller = Caller::client("alice", "t1");

    backend.set_delay(Some(Duration::from_millis(50)));
    let row = orchestrator.create(&caller, spec("web")).await.unwrap();
    assert_eq!(row.status, Status::Creating);
    assert!(row.runtime_id.is_none());
    assert_eq!(orchestrator.pending_provisions(), 1);

    orchestrator.drain().await;
    backend.set_delay(None);

    let view = orchestrator.describe(&caller, &row.id).await.unwrap();
    assert_eq!(view.status, Status::Running);
    assert!(view.runtime_id.is_some());
    assert_eq!(orchestrator.pending_provisions(), 0);

    let actions: Vec<String> = orchestrator
        .recent_activity(&caller, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec!["provisioned", "create"]);
}

#[tokio::test]
async fn test_operations_wait_for_provisioning() {
    let (orchestrator, backend) = create_async_orchestrator().await;
    let caller = Caller::client("alice", "t1");

    backend.set_delay(Some(Duration::from_millis(50)));
    let row = orchestrator.create(&caller, spec("web")).await.unwrap();

    // Stop blocks on the container lock until provisioning lets go of it
    let stopped = orchestrator.stop(&caller, &row.id).await.unwrap();
    assert_eq!(stopped.status, Status::Stopped);
    assert!(stopped.runtime_id.is_some());
    backend.set_delay(None);
}

#[tokio::test]
async fn test_failed_provisioning_marks_error() {
    let (orchestrator, backend) = create_async_orchestrator().await;
    let caller = Caller::client("alice", "t1");

    backend.set_fail_all(true);
    let row = orchestrator.create(&caller, spec("web")).await.unwrap();
    assert_eq!(row.status, Status::Creating);
    orchestrator.drain().await;
    backend.set_fail_all(false);

    let stored = ContainerRepository::new(orchestrator.store().clone())
        .get(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Status::Error);

    let entries = orchestrator.recent_activity(&caller, 1).await.unwrap();
    assert_eq!(entries[0].action, "create_failed");
}

#[tokio::test]
async fn test_shutdown_cancels_outstanding_provisioning() {
    let (orchestrator, backend) = create_async_orchestrator().await;
    let caller = Caller::admin("root");

    backend.set_delay(Some(Duration::from_secs(30)));
    let row = orchestrator.create(&caller, spec("slow")).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown())
        .await
        .expect("shutdown should not wait for the backend");

    let stored = ContainerRepository::new(orchestrator.store().clone())
        .get(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Status::Error);
    let entries = orchestrator.recent_activity(&caller, 1).await.unwrap();
    assert_eq!(entries[0].action, "create_failed");
}
