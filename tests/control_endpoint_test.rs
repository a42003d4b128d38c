use std::io::Write;
use std::time::Duration;

use orchestrator::app::Application;
use orchestrator::shutdown::ShutdownManager;
use orchestrator_core::config::{DispatcherKind, QueueFullPolicy};
use orchestrator_core::AppConfig;
use serde_json::Value;
use tokio::net::TcpListener;

async fn local_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config_for(port: u16) -> AppConfig {
    let mut config = AppConfig::default();
    config.cluster.node_id = "manager-test".to_string();
    config.cluster.advertise_address = "127.0.0.1".to_string();
    config.cluster.advertise_port = port as u32;
    config
}

#[tokio::test]
async fn test_health_and_status_endpoints() {
    let (listener, port) = local_listener().await;
    let mut config = config_for(port);
    config.security.api_token = "secret".to_string();

    let app = std::sync::Arc::new(Application::new(config).unwrap());
    let shutdown = ShutdownManager::new();
    let rx = shutdown.subscribe().await;
    let server = {
        let app = std::sync::Arc::clone(&app);
        tokio::spawn(async move { app.serve(listener, rx).await })
    };

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let mut health = None;
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{base}/health")).send().await {
            health = Some(resp);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let health = health.expect("control endpoint did not come up");
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["node_id"], "manager-test");

    let unauthorized = client.get(format!("{base}/status")).send().await.unwrap();
    assert_eq!(unauthorized.status(), 401);
    let body: Value = unauthorized.json().await.unwrap();
    assert_eq!(body["success"], false);

    let status = client
        .get(format!("{base}/status"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), 200);
    let body: Value = status.json().await.unwrap();
    assert_eq!(body["data"]["running"], true);
    assert_eq!(body["data"]["managers"], 1);

    shutdown.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap();
    assert!(result.unwrap().is_ok());
    assert!(!app.cluster().is_started().await);
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let (_occupied, port) = local_listener().await;
    let app = Application::new(config_for(port)).unwrap();
    let shutdown = ShutdownManager::new();

    let err = app.run(shutdown.subscribe().await).await.unwrap_err();
    assert!(err.to_string().contains("绑定控制端点地址失败"));
    assert!(!app.cluster().is_started().await);
}

#[test]
fn test_bundled_config_loads() {
    let config = AppConfig::load(Some("config/orchestrator.toml")).unwrap();
    assert_eq!(config.cluster.name, "orchestrator-cluster");
    assert_eq!(config.cluster.advertise_port, 2377);
    assert_eq!(config.task_manager.queue_capacity, 1000);
    assert_eq!(config.task_manager.queue_full_policy, QueueFullPolicy::Defer);
    assert_eq!(config.dispatcher.kind, DispatcherKind::Loopback);
}

#[test]
fn test_config_file_overrides() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[cluster]
name = "edge"

[task_manager]
queue_full_policy = "reject"

[dispatcher]
kind = "process"
"#
    )
    .unwrap();

    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.cluster.name, "edge");
    assert_eq!(config.task_manager.queue_full_policy, QueueFullPolicy::Reject);
    assert_eq!(config.dispatcher.kind, DispatcherKind::Process);
    assert_eq!(config.scheduler.interval_seconds, 5);
    assert!(Application::new(config).is_ok());
}
