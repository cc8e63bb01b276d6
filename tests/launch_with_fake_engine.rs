//! End-to-end launch, readiness and teardown through the public API, using
//! the in-memory engine so no Docker daemon is needed.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempdock::testing::{EngineCall, FakeConnector, FakeEngine, FakeOp};
use tempdock::{
    CONTAINER_TO_LOCALHOST_DNS, ContainerRequest, Launcher, LifecycleConfig, ShutdownStep,
    StepOutcome,
};

fn fake_launcher() -> (FakeEngine, Arc<FakeConnector>, Launcher) {
    let engine = FakeEngine::new();
    let connector = Arc::new(FakeConnector::new(engine.clone()));
    let launcher = Launcher::new(connector.clone(), LifecycleConfig::default());
    (engine, connector, launcher)
}

#[tokio::test]
async fn port_mapping_has_one_distinct_host_port_per_request() {
    let (engine, _, launcher) = fake_launcher();

    let request = ContainerRequest::new("nginx:1.25").ports([80, 443, 8080, 9000]);
    let handle = launcher.launch(&request, "web").await.unwrap();

    let mapping = handle.port_mapping();
    assert_eq!(mapping.len(), 4);
    let hosts: HashSet<u16> = mapping.iter().map(|(_, host)| host).collect();
    assert_eq!(hosts.len(), 4);
    assert!(hosts.iter().all(|p| *p >= 1024));

    let created = engine.container(handle.id()).unwrap();
    assert_eq!(created.spec.exposed_ports, vec![80, 443, 8080, 9000]);
    assert_eq!(created.host.port_bindings.len(), 4);

    handle.shutdown().await;
}

#[tokio::test]
async fn wait_for_port_sees_listener_on_mapped_port() {
    let (_, _, launcher) = fake_launcher();
    let handle = launcher
        .launch(&ContainerRequest::new("redis:4.0.11").port(6379), "redis")
        .await
        .unwrap();
    let mapped = handle.host_port(6379).unwrap();

    // Stand in for the engine's port proxy. The allocator released the port,
    // so binding it here normally succeeds.
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, mapped))
        .await
        .unwrap();

    handle
        .wait_for_port_to_open(mapped, Duration::from_secs(2))
        .await
        .unwrap();

    drop(listener);
    handle.shutdown().await;
}

#[tokio::test]
async fn wait_for_port_times_out_when_nothing_listens() {
    let (_, _, launcher) = fake_launcher();
    let handle = launcher
        .launch(&ContainerRequest::new("redis:4.0.11").port(6379), "redis")
        .await
        .unwrap();
    let mapped = handle.host_port(6379).unwrap();

    let err = handle
        .wait_for_port_to_open(mapped, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    handle.shutdown().await;
}

#[tokio::test]
async fn full_lifecycle_call_order() {
    let (engine, connector, launcher) = fake_launcher();

    let handle = launcher
        .launch(&ContainerRequest::new("redis:4.0.11"), "order")
        .await
        .unwrap();
    let id = handle.id().to_string();
    engine.append_logs(&id, "Ready to accept connections\n");
    handle
        .wait_for_log_line("Ready to accept connections", Duration::from_secs(1))
        .await
        .unwrap();
    let report = handle.shutdown().await;

    assert!(report.is_clean());
    let calls: Vec<&'static str> = engine
        .calls()
        .iter()
        .map(|c| match c {
            EngineCall::Ping => "ping",
            EngineCall::ImageExists { .. } => "inspect",
            EngineCall::Pull { .. } => "pull",
            EngineCall::Create { .. } => "create",
            EngineCall::Start { .. } => "start",
            EngineCall::Stop { .. } => "stop",
            EngineCall::Kill { .. } => "kill",
            EngineCall::Remove { .. } => "remove",
            EngineCall::Logs { .. } => "logs",
            EngineCall::RemoveImage { .. } => "rmi",
            EngineCall::Close => "close",
        })
        .collect();
    assert_eq!(
        calls,
        vec!["inspect", "pull", "create", "start", "logs", "stop", "remove", "close"]
    );
    assert!(connector.connections()[0].is_closed());
    assert!(!engine.container_exists(&id));
}

#[tokio::test]
async fn stubborn_container_is_killed_then_removed() {
    let (engine, _, launcher) = fake_launcher();
    let handle = launcher
        .launch(&ContainerRequest::new("redis:4.0.11"), "stubborn")
        .await
        .unwrap();
    engine.fail_on(FakeOp::Stop);

    let report = handle.shutdown_with_timeout(Duration::from_secs(3)).await;

    assert!(matches!(
        report.outcome(ShutdownStep::Stop),
        Some(StepOutcome::Failed(_))
    ));
    assert_eq!(
        report.outcome(ShutdownStep::Kill),
        Some(&StepOutcome::Succeeded)
    );
    assert_eq!(
        report.outcome(ShutdownStep::Remove),
        Some(&StepOutcome::Succeeded)
    );
    assert_eq!(engine.last_stop_grace(handle.id()), Some(Duration::from_secs(3)));
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn concurrent_launches_get_distinct_names_and_ports() {
    let (engine, connector, launcher) = fake_launcher();
    let launcher = Arc::new(launcher);
    engine.add_image("redis:4.0.11");

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let launcher = launcher.clone();
        tasks.push(tokio::spawn(async move {
            launcher
                .launch(&ContainerRequest::new("redis:4.0.11").port(6379), "parallel")
                .await
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    let names: HashSet<&str> = handles.iter().map(|h| h.name()).collect();
    assert_eq!(names.len(), 4);
    let ports: HashSet<u16> = handles.iter().filter_map(|h| h.host_port(6379)).collect();
    assert_eq!(ports.len(), 4);
    assert_eq!(connector.connection_count(), 4);

    for handle in &handles {
        handle.shutdown().await;
    }
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn host_alias_can_be_handed_to_the_container() {
    let (engine, _, launcher) = fake_launcher();
    let request =
        ContainerRequest::new("alpine:3.19").env("UPSTREAM_HOST", CONTAINER_TO_LOCALHOST_DNS);
    let handle = launcher.launch(&request, "alias").await.unwrap();

    let created = engine.container(handle.id()).unwrap();
    assert_eq!(
        created.spec.env,
        vec!["UPSTREAM_HOST=docker.for.mac.localhost".to_string()]
    );
    handle.shutdown().await;
}
