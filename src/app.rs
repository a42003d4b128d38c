use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use orchestrator_core::config::DispatcherKind;
use orchestrator_core::models::ApiResponse;
use orchestrator_core::traits::TaskDispatcher;
use orchestrator_core::{AppConfig, OrchestratorError};
use orchestrator_dispatcher::{ClusterManager, CLUSTER_VERSION};
use orchestrator_infrastructure::{
    default_probes, LoopbackDispatcher, NodeUsageRegistry, ProcessDispatcher,
};

/// 通过已有集群加入时使用的参数
#[derive(Debug, Clone)]
pub struct JoinTarget {
    pub address: String,
    pub token: String,
}

/// 主应用程序
///
/// 持有集群管理器，并在节点通告地址上提供控制端点（`GET /health`、`GET /status`）。
pub struct Application {
    config: AppConfig,
    cluster: Arc<ClusterManager>,
    usage: NodeUsageRegistry,
    join: Option<JoinTarget>,
}

impl Application {
    /// 按配置选择分发实现与健康探测，创建应用实例
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序，集群: {}", config.cluster.name);

        let dispatcher: Arc<dyn TaskDispatcher> = match config.dispatcher.kind {
            DispatcherKind::Loopback => Arc::new(LoopbackDispatcher::new(Duration::from_millis(
                config.dispatcher.loopback_run_ms,
            ))),
            DispatcherKind::Process => Arc::new(ProcessDispatcher::new()),
        };
        info!("任务分发实现: {}", dispatcher.name());

        let usage = NodeUsageRegistry::new();
        let probes = default_probes(&config.health, &usage);
        let cluster = Arc::new(ClusterManager::new(config.clone(), dispatcher, probes));

        Ok(Self {
            config,
            cluster,
            usage,
            join: None,
        })
    }

    /// 启动时加入已有集群而不是新建
    pub fn with_join(mut self, address: impl Into<String>, token: impl Into<String>) -> Self {
        self.join = Some(JoinTarget {
            address: address.into(),
            token: token.into(),
        });
        self
    }

    pub fn cluster(&self) -> &Arc<ClusterManager> {
        &self.cluster
    }

    /// 节点资源使用率上报入口，供资源类探测读取
    pub fn usage(&self) -> &NodeUsageRegistry {
        &self.usage
    }

    pub fn bind_address(&self) -> String {
        format!(
            "{}:{}",
            self.config.cluster.advertise_address, self.config.cluster.advertise_port
        )
    }

    /// 在通告地址上监听并运行，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let bind_address = self.bind_address();
        let listener = TcpListener::bind(&bind_address)
            .await
            .with_context(|| format!("绑定控制端点地址失败: {bind_address}"))?;
        self.serve(listener, shutdown_rx).await
    }

    /// 使用已绑定的监听器运行
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        match &self.join {
            Some(target) => self
                .cluster
                .join_cluster(&target.address, &target.token)
                .await
                .with_context(|| format!("加入集群失败: {}", target.address))?,
            None => self.cluster.initialize().await.context("初始化集群失败")?,
        }

        let local_addr = listener.local_addr().context("读取监听地址失败")?;
        info!("控制端点启动在 http://{}", local_addr);

        let router = control_router(Arc::clone(&self.cluster));
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("控制端点收到关闭信号");
            })
            .await;
        if let Err(e) = &served {
            error!("控制端点运行失败: {}", e);
        }

        if let Err(e) = self.cluster.shutdown().await {
            warn!("关闭集群时出错: {}", e);
        }
        info!("应用程序已停止");
        served.context("控制端点运行失败")
    }
}

/// 节点控制端点路由
pub fn control_router(cluster: Arc<ClusterManager>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(cluster_status))
        .with_state(cluster)
}

async fn health_check(State(cluster): State<Arc<ClusterManager>>) -> Response {
    envelope(Ok(json!({
        "status": "ok",
        "node_id": cluster.local_node_id(),
        "version": CLUSTER_VERSION,
    })))
}

async fn cluster_status(
    State(cluster): State<Arc<ClusterManager>>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = cluster.authorize(bearer_token(&headers)) {
        return envelope::<()>(Err(e));
    }
    envelope(cluster.get_status().await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn envelope<T: Serialize>(result: Result<T, OrchestratorError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => {
            let (code, body) = ApiResponse::from_error(&e);
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(body)).into_response()
        }
    }
}
