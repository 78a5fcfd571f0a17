/// End-to-end lifecycle tests against the simulated backend.
///
/// Every test builds an orchestrator with an in-memory store, so they run
/// without Docker or the Azure CLI and can be run in parallel.
use cloudport::backend::SimulatedBackend;
use cloudport::container::{Caller, ContainerSpec, PortMapping, ServiceType};
use cloudport::state::ContainerRepository;
use cloudport::{Error, Orchestrator, Status};
use std::sync::Arc;
use std::time::Duration;

async fn create_test_orchestrator() -> (Orchestrator, Arc<SimulatedBackend>) {
    let backend = Arc::new(SimulatedBackend::new());
    let orchestrator = Orchestrator::builder()
        .backend(backend.clone())
        .in_memory()
        .build()
        .await
        .expect("Failed to build orchestrator");
    (orchestrator, backend)
}

fn web_spec(name: &str, tenant: &str) -> ContainerSpec {
    ContainerSpec::new(name, "nginx:alpine", tenant, ServiceType::WebServer)
        .with_port(PortMapping::tcp(80))
}

#[tokio::test]
async fn test_create_runs_container_and_sets_url() {
    let (orchestrator, backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");

    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    assert_eq!(row.id, "t1.web1");
    assert_eq!(row.tenant_id, "t1");
    assert_eq!(row.status, Status::Running);
    assert!(row.runtime_id.is_some());
    assert!(row.url.as_deref().is_some_and(|u| !u.is_empty()));
    assert_eq!(backend.state_of("t1.web1").as_deref(), Some("running"));
}

#[tokio::test]
async fn test_start_stop_restart_remove() {
    let (orchestrator, backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");
    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    let stopped = orchestrator.stop(&caller, &row.id).await.unwrap();
    assert_eq!(stopped.status, Status::Stopped);
    assert_eq!(backend.state_of(&row.id).as_deref(), Some("exited"));

    let started = orchestrator.start(&caller, &row.id).await.unwrap();
    assert_eq!(started.status, Status::Running);

    let restarted = orchestrator.restart(&caller, &row.id).await.unwrap();
    assert_eq!(restarted.status, Status::Running);

    orchestrator.remove(&caller, &row.id).await.unwrap();
    assert!(backend.is_empty());
    assert!(matches!(
        orchestrator.describe(&caller, &row.id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (orchestrator, _backend) = create_test_orchestrator().await;
    let caller = Caller::admin("root");
    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    orchestrator.stop(&caller, &row.id).await.unwrap();
    let again = orchestrator.stop(&caller, &row.id).await.unwrap();
    assert_eq!(again.status, Status::Stopped);
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let (orchestrator, _backend) = create_test_orchestrator().await;
    let caller = Caller::admin("root");

    for result in [
        orchestrator.start(&caller, "nope").await.map(|_| ()),
        orchestrator.stop(&caller, "nope").await.map(|_| ()),
        orchestrator.remove(&caller, "nope").await,
        orchestrator.logs(&caller, "nope", 10).await.map(|_| ()),
    ] {
        let err = result.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
        assert_eq!(err.exit_code(), 4);
    }
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let (orchestrator, _backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");
    orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    let err = orchestrator
        .create(&caller, web_spec("web1", "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(ref id) if id == "t1.web1"));
}

#[tokio::test]
async fn test_invalid_spec_is_rejected_before_persisting() {
    let (orchestrator, backend) = create_test_orchestrator().await;
    let caller = Caller::admin("root");

    let err = orchestrator
        .create(&caller, web_spec("bad name", "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(orchestrator.list(&caller, None, false).await.unwrap().is_empty());
    assert!(backend.calls().iter().all(|c| !c.starts_with("create")));
}

#[tokio::test]
async fn test_backend_failure_marks_error() {
    let (orchestrator, backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");
    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    backend.set_fail_all(true);
    let err = orchestrator.stop(&caller, &row.id).await.unwrap_err();
    assert!(matches!(err, Error::Backend { .. }));

    backend.set_fail_all(false);
    let view = orchestrator.describe(&caller, &row.id).await.unwrap();
    assert_eq!(view.status, Status::Error);

    // An errored container can be recovered with start
    let started = orchestrator.start(&caller, &row.id).await.unwrap();
    assert_eq!(started.status, Status::Running);
}

#[tokio::test]
async fn test_failed_create_leaves_error_row() {
    let (orchestrator, backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");

    backend.set_fail_all(true);
    let err = orchestrator
        .create(&caller, web_spec("web1", "t1"))
        .await
        .unwrap_err();
    assert!(err.is_backend_failure());
    backend.set_fail_all(false);

    let view = orchestrator.describe(&caller, "t1.web1").await.unwrap();
    assert_eq!(view.status, Status::Error);
    assert!(view.runtime_id.is_none());
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let backend = Arc::new(SimulatedBackend::new());
    let orchestrator = Orchestrator::builder()
        .backend(backend.clone())
        .in_memory()
        .backend_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();
    let caller = Caller::admin("root");
    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    backend.set_delay(Some(Duration::from_millis(500)));
    let err = orchestrator.stop(&caller, &row.id).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got {:?}", err);
    backend.set_delay(None);

    let stored = ContainerRepository::new(orchestrator.store().clone())
        .get(&row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Status::Error);
}

#[tokio::test]
async fn test_predefined_templates() {
    let (orchestrator, _backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");

    let row = orchestrator
        .create_predefined(&caller, ServiceType::InterpreterRuntime, None)
        .await
        .unwrap();
    assert_eq!(row.service_type, ServiceType::InterpreterRuntime);
    assert_eq!(row.image, "nginx:alpine");
    assert_eq!(row.environment.get("CLIENT_ID").map(String::as_str), Some("t1"));
    assert!(row.name.starts_with("python-"));
    assert_eq!(row.id, format!("t1.{}", row.name));

    let err = orchestrator
        .create_predefined(&caller, ServiceType::Custom, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // Admins have to say which tenant they create for
    let admin = Caller::admin("root");
    assert!(orchestrator
        .create_predefined(&admin, ServiceType::WebServer, None)
        .await
        .is_err());
    let row = orchestrator
        .create_predefined(&admin, ServiceType::WebServer, Some("t2"))
        .await
        .unwrap();
    assert_eq!(row.tenant_id, "t2");
}

#[tokio::test]
async fn test_logs_and_stats() {
    let (orchestrator, backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");
    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();

    let lines = orchestrator.logs(&caller, &row.id, 2).await.unwrap();
    assert_eq!(lines.len(), 2);

    let stats = orchestrator.stats(&caller, &row.id).await.unwrap();
    assert!(stats.is_zero());

    // Stats never fail once access is granted
    backend.set_fail_all(true);
    let stats = orchestrator.stats(&caller, &row.id).await.unwrap();
    assert!(stats.is_zero());
    assert!(orchestrator.logs(&caller, &row.id, 2).await.is_err());
}

#[tokio::test]
async fn test_activity_is_recorded() {
    let (orchestrator, _backend) = create_test_orchestrator().await;
    let caller = Caller::client("alice", "t1");
    let row = orchestrator.create(&caller, web_spec("web1", "t1")).await.unwrap();
    orchestrator.stop(&caller, &row.id).await.unwrap();
    orchestrator.remove(&caller, &row.id).await.unwrap();

    let entries = orchestrator.recent_activity(&caller, 10).await.unwrap();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["remove", "stop", "create"]);
    assert!(entries.iter().all(|e| e.actor == "alice"));
    assert!(entries.iter().all(|e| e.target.as_deref() == Some("t1.web1")));
    assert_eq!(entries[1].detail["from"], serde_json::json!("running"));
}
