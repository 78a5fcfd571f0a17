/// Cleanup of leftover test and simulation rows.
use cloudport::backend::SimulatedBackend;
use cloudport::container::{Caller, ContainerSpec, ManagedContainer, ServiceType};
use cloudport::state::ContainerRepository;
use cloudport::{Error, Orchestrator, Status};
use std::sync::Arc;

async fn create_test_orchestrator() -> (Orchestrator, Arc<SimulatedBackend>, ContainerRepository) {
    let backend = Arc::new(SimulatedBackend::new());
    let orchestrator = Orchestrator::builder()
        .backend(backend.clone())
        .in_memory()
        .build()
        .await
        .expect("Failed to build orchestrator");
    let repo = ContainerRepository::new(orchestrator.store().clone());
    (orchestrator, backend, repo)
}

/// A row with no backend resource behind it.
async fn orphan(repo: &ContainerRepository, name: &str) -> String {
    let mut row = ManagedContainer::from_spec(&ContainerSpec::new(
        name,
        "nginx:alpine",
        "t1",
        ServiceType::Custom,
    ));
    row.status = Status::Stopped;
    repo.insert(&row).await.unwrap().id
}

#[tokio::test]
async fn test_cleanup_is_admin_only() {
    let (orchestrator, _backend, repo) = create_test_orchestrator().await;
    orphan(&repo, "test-1").await;

    let err = orchestrator
        .cleanup_test_containers(&Caller::client("alice", "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
    assert_eq!(repo.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_removes_only_matching_orphans() {
    let (orchestrator, _backend, repo) = create_test_orchestrator().await;
    let admin = Caller::admin("root");

    let test_row = orphan(&repo, "test-1").await;
    let sim_row = orphan(&repo, "sim_worker").await;
    let keep_row = orphan(&repo, "production").await;
    let almost = orphan(&repo, "testing").await;
    // Matches the pattern but is running on the backend
    let live = orchestrator
        .create(
            &admin,
            ContainerSpec::new("demo-live", "nginx:alpine", "t1", ServiceType::WebServer),
        )
        .await
        .unwrap();

    let report = orchestrator.cleanup_test_containers(&admin).await.unwrap();
    let mut removed = report.removed.clone();
    removed.sort();
    assert_eq!(removed, vec![sim_row.clone(), test_row.clone()]);
    assert_eq!(report.kept, vec![live.id.clone()]);

    let remaining: Vec<String> = repo.list(None).await.unwrap().into_iter().map(|r| r.id).collect();
    assert!(remaining.contains(&keep_row));
    assert!(remaining.contains(&almost));
    assert!(remaining.contains(&live.id));
    assert_eq!(remaining.len(), 3);

    let entries = orchestrator.recent_activity(&admin, 1).await.unwrap();
    assert_eq!(entries[0].action, "cleanup");
    assert!(entries[0].target.is_none());
}

#[tokio::test]
async fn test_cleanup_refuses_when_backend_is_down() {
    let (orchestrator, backend, repo) = create_test_orchestrator().await;
    orphan(&repo, "test-1").await;

    backend.set_fail_all(true);
    assert!(orchestrator
        .cleanup_test_containers(&Caller::admin("root"))
        .await
        .is_err());
    assert_eq!(repo.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_with_nothing_to_do_records_nothing() {
    let (orchestrator, _backend, _repo) = create_test_orchestrator().await;
    let admin = Caller::admin("root");

    let report = orchestrator.cleanup_test_containers(&admin).await.unwrap();
    assert!(report.removed.is_empty());
    assert!(report.kept.is_empty());
    assert!(orchestrator.recent_activity(&admin, 10).await.unwrap().is_empty());
}
