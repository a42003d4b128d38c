use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use orchestrator_core::config::HealthConfig;
use orchestrator_core::models::{HealthStats, Node, NodeHealth, NodeStatus, ProbeResult};
use orchestrator_core::traits::{HealthProbe, NodeFailureHandler};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::lifecycle::{shutdown_requested, LoopLifecycle};
use crate::node_manager::NodeManager;

/// 节点健康快照表
///
/// 由健康检查器写入，节点管理器只读。
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    snapshots: Arc<RwLock<HashMap<String, NodeHealth>>>,
    check_interval_seconds: u64,
}

impl HealthRegistry {
    pub fn new(check_interval_seconds: u64) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            check_interval_seconds,
        }
    }

    pub async fn record(&self, health: NodeHealth) {
        self.snapshots
            .write()
            .await
            .insert(health.node_id.clone(), health);
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeHealth> {
        self.snapshots.read().await.get(node_id).cloned()
    }

    /// 所有快照，按节点ID排序
    pub async fn all(&self) -> Vec<NodeHealth> {
        let mut all: Vec<NodeHealth> = self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    pub async fn remove(&self, node_id: &str) {
        self.snapshots.write().await.remove(node_id);
    }

    pub async fn stats(&self) -> HealthStats {
        let snapshots = self.snapshots.read().await;
        let mut stats = HealthStats {
            total_nodes: snapshots.len(),
            check_interval_seconds: self.check_interval_seconds,
            ..Default::default()
        };
        let mut total_response = 0u64;
        for health in snapshots.values() {
            *stats.nodes_by_status.entry(health.status).or_insert(0) += 1;
            total_response += health.response_time_ms;
        }
        if !snapshots.is_empty() {
            stats.average_response_time_ms = total_response as f64 / snapshots.len() as f64;
        }
        stats
    }
}

/// 节点健康检查器
///
/// 周期性地对所有节点并发执行全部探测，汇总为节点状态：
/// 非down变为down时更新节点状态并触发故障处理，down恢复为ready时更新状态并清除故障标记，
/// unknown不改变节点状态。
pub struct HealthChecker {
    node_manager: Arc<NodeManager>,
    registry: HealthRegistry,
    probes: Vec<Arc<dyn HealthProbe>>,
    failure_handler: Arc<dyn NodeFailureHandler>,
    config: HealthConfig,
    fan_out: Arc<Semaphore>,
    lifecycle: LoopLifecycle,
}

impl HealthChecker {
    pub fn new(
        node_manager: Arc<NodeManager>,
        registry: HealthRegistry,
        probes: Vec<Arc<dyn HealthProbe>>,
        failure_handler: Arc<dyn NodeFailureHandler>,
        config: HealthConfig,
    ) -> Self {
        let fan_out = Arc::new(Semaphore::new(config.max_concurrent_checks.max(1)));
        Self {
            node_manager,
            registry,
            probes,
            failure_handler,
            config,
            fan_out,
            lifecycle: LoopLifecycle::new(),
        }
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    /// 启动周期检查
    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        let checker = Arc::clone(self);
        self.lifecycle
            .start("HealthChecker", move |mut shutdown_rx| {
                vec![tokio::spawn(async move {
                    info!("启动节点健康检查循环");
                    let mut interval =
                        tokio::time::interval(Duration::from_secs(checker.config.interval_seconds));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                checker.check_all_nodes().await;
                            }
                            _ = shutdown_requested(&mut shutdown_rx) => {
                                info!("收到停止信号，退出节点健康检查循环");
                                break;
                            }
                        }
                    }
                })]
            })
            .await
    }

    pub async fn stop(&self) {
        self.lifecycle.stop("HealthChecker").await;
    }

    /// 检查所有节点，返回本轮快照
    #[instrument(skip(self))]
    pub async fn check_all_nodes(&self) -> Vec<NodeHealth> {
        let nodes = match self.node_manager.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("获取节点列表失败，跳过本轮健康检查: {}", e);
                return Vec::new();
            }
        };

        let checks = nodes.into_iter().map(|node| async move {
            let _permit = self.fan_out.acquire().await.ok();
            let health = self.check_node(&node).await;
            self.apply_health(&node, &health).await;
            health
        });
        let results = join_all(checks).await;
        debug!("本轮健康检查完成，共 {} 个节点", results.len());
        results
    }

    /// 立即检查指定节点
    pub async fn force_check(&self, node_id: &str) -> OrchestratorResult<NodeHealth> {
        let node = self.node_manager.get_node(node_id).await?;
        let health = self.check_node(&node).await;
        self.apply_health(&node, &health).await;
        info!("节点 {} 强制健康检查完成: {}", node_id, health.status);
        Ok(health)
    }

    pub async fn get_node_health(&self, node_id: &str) -> OrchestratorResult<NodeHealth> {
        self.registry
            .get(node_id)
            .await
            .ok_or_else(|| OrchestratorError::HealthDataNotFound {
                id: node_id.to_string(),
            })
    }

    pub async fn get_stats(&self) -> HealthStats {
        self.registry.stats().await
    }

    /// 并发执行全部探测，单项探测有各自的超时，整体受节点期限约束
    async fn check_node(&self, node: &Node) -> NodeHealth {
        let start = Instant::now();
        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let deadline = Duration::from_secs(self.config.node_deadline_seconds);

        let probes = self.probes.iter().map(|probe| async move {
            let probe_start = Instant::now();
            match tokio::time::timeout(probe_timeout, probe.probe(node)).await {
                Ok(result) => result,
                Err(_) => ProbeResult::failed(probe.name(), "probe timed out")
                    .with_duration(probe_start.elapsed().as_millis() as u64),
            }
        });

        let checks = match tokio::time::timeout(deadline, join_all(probes)).await {
            Ok(checks) => checks,
            Err(_) => {
                warn!("节点 {} 健康检查超过期限 {:?}", node.id, deadline);
                vec![ProbeResult::failed("deadline", "node check deadline exceeded")
                    .with_duration(deadline.as_millis() as u64)]
            }
        };

        let elapsed = start.elapsed();
        histogram!("orchestrator_health_check_duration_seconds").record(elapsed.as_secs_f64());
        NodeHealth::from_checks(node.id.clone(), checks, elapsed.as_millis() as u64)
    }

    async fn apply_health(&self, node: &Node, health: &NodeHealth) {
        self.registry.record(health.clone()).await;

        match (node.status, health.status) {
            (previous, NodeStatus::Down) if previous != NodeStatus::Down => {
                warn!("节点 {} 不健康，状态 {} -> down", node.id, previous);
                counter!("orchestrator_node_failures_total").increment(1);
                if let Err(e) = self
                    .node_manager
                    .update_node_status(&node.id, NodeStatus::Down)
                    .await
                {
                    error!("更新节点 {} 状态失败: {}", node.id, e);
                }
                match self.failure_handler.handle_node_failure(&node.id).await {
                    Ok(report) => {
                        if !report.restarted.is_empty() {
                            info!(
                                "节点 {} 故障转移完成，重启了 {} 个任务",
                                node.id,
                                report.restarted.len()
                            );
                        }
                    }
                    Err(e) => error!("处理节点 {} 故障失败: {}", node.id, e),
                }
            }
            (NodeStatus::Down, NodeStatus::Ready) => {
                info!("节点 {} 已恢复", node.id);
                if let Err(e) = self
                    .node_manager
                    .update_node_status(&node.id, NodeStatus::Ready)
                    .await
                {
                    error!("更新节点 {} 状态失败: {}", node.id, e);
                }
                if let Err(e) = self.failure_handler.handle_node_recovery(&node.id).await {
                    error!("清除节点 {} 故障标记失败: {}", node.id, e);
                }
            }
            _ => {}
        }
    }
}
