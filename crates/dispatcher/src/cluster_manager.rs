use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use orchestrator_core::models::{
    ClusterInfo, ClusterStatus, FailoverReport, NetworkResources, Node, NodeRole, NodeStatus,
    Resources, ScaleReport, TaskStatus,
};
use orchestrator_core::traits::{
    HealthProbe, NodeFailureHandler, NodeRepository, TaskDispatcher, TaskRepository,
};
use orchestrator_core::{AppConfig, OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::{InMemoryNodeRepository, InMemoryTaskRepository};

use crate::discovery::DiscoveryService;
use crate::failover::FailoverCoordinator;
use crate::health_checker::{HealthChecker, HealthRegistry};
use crate::node_manager::NodeManager;
use crate::scheduler::TaskScheduler;
use crate::task_manager::TaskManager;

pub const CLUSTER_VERSION: &str = "1.0.0";
const JOIN_TOKEN_PREFIX: &str = "SWMTKN-1-";

struct ClusterState {
    started: bool,
    started_at: Option<DateTime<Utc>>,
    join_token: String,
    /// 通过join加入时额外的种子地址
    join_endpoints: Vec<String>,
    updated_at: DateTime<Utc>,
}

/// 集群管理器
///
/// 组装各组件并负责集群生命周期：初始化、关闭、加入与离开集群、节点故障处理和工作节点扩缩容。
/// 整个进程只构造一个实例，通过`Arc`共享。
pub struct ClusterManager {
    config: AppConfig,
    cluster_id: String,
    local_node_id: String,
    created_at: DateTime<Utc>,
    node_manager: Arc<NodeManager>,
    task_manager: Arc<TaskManager>,
    scheduler: Arc<TaskScheduler>,
    health_checker: Arc<HealthChecker>,
    failover: Arc<FailoverCoordinator>,
    discovery: Arc<DiscoveryService>,
    state: Mutex<ClusterState>,
}

impl ClusterManager {
    /// 使用内存注册表构造
    pub fn new(
        config: AppConfig,
        dispatcher: Arc<dyn TaskDispatcher>,
        probes: Vec<Arc<dyn HealthProbe>>,
    ) -> Self {
        Self::with_repositories(
            config,
            Arc::new(InMemoryNodeRepository::new()),
            Arc::new(InMemoryTaskRepository::new()),
            dispatcher,
            probes,
        )
    }

    pub fn with_repositories(
        config: AppConfig,
        node_repo: Arc<dyn NodeRepository>,
        task_repo: Arc<dyn TaskRepository>,
        dispatcher: Arc<dyn TaskDispatcher>,
        probes: Vec<Arc<dyn HealthProbe>>,
    ) -> Self {
        let local_node_id = if config.cluster.node_id.trim().is_empty() {
            format!("manager-{}", &Uuid::new_v4().simple().to_string()[..8])
        } else {
            config.cluster.node_id.clone()
        };

        let registry = HealthRegistry::new(config.health.interval_seconds);
        let node_manager = Arc::new(NodeManager::new(node_repo, registry.clone()));
        let task_manager = Arc::new(TaskManager::new(
            task_repo,
            Arc::clone(&node_manager),
            dispatcher,
            config.task_manager.clone(),
            Duration::from_secs(config.dispatcher.timeout_seconds),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&node_manager),
            Arc::clone(&task_manager),
            config.scheduler.clone(),
        ));
        let failover = Arc::new(FailoverCoordinator::new(
            Arc::clone(&node_manager),
            Arc::clone(&task_manager),
        ));
        let health_checker = Arc::new(HealthChecker::new(
            Arc::clone(&node_manager),
            registry,
            probes,
            Arc::clone(&failover) as Arc<dyn NodeFailureHandler>,
            config.health.clone(),
        ));
        let discovery = Arc::new(DiscoveryService::new(
            config.discovery.clone(),
            local_node_id.clone(),
            config.cluster.name.clone(),
        ));

        let now = Utc::now();
        let state = ClusterState {
            started: false,
            started_at: None,
            join_token: config.cluster.join_token.clone(),
            join_endpoints: Vec::new(),
            updated_at: now,
        };

        Self {
            config,
            cluster_id: Uuid::new_v4().to_string(),
            local_node_id,
            created_at: now,
            node_manager,
            task_manager,
            scheduler,
            health_checker,
            failover,
            discovery,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.node_manager
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.health_checker
    }

    pub fn failover(&self) -> &Arc<FailoverCoordinator> {
        &self.failover
    }

    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }

    /// 初始化集群：服务发现、注册本地管理节点、启动所有后台循环
    pub async fn initialize(&self) -> OrchestratorResult<()> {
        let mut state = self.state.lock().await;
        self.initialize_locked(&mut state).await
    }

    async fn initialize_locked(&self, state: &mut ClusterState) -> OrchestratorResult<()> {
        if state.started {
            return Err(OrchestratorError::Constraint("集群已经启动".to_string()));
        }
        info!("初始化集群: {} ({})", self.config.cluster.name, self.cluster_id);

        self.discovery.initialize(&state.join_endpoints).await?;
        self.register_local_node().await?;

        if let Err(e) = self.start_loops().await {
            error!("启动后台组件失败: {}", e);
            self.stop_loops().await;
            return Err(e);
        }

        if state.join_token.is_empty() {
            state.join_token = generate_join_token();
        }
        let now = Utc::now();
        state.started = true;
        state.started_at = Some(now);
        state.updated_at = now;
        info!("集群初始化完成，本地节点: {}", self.local_node_id);
        Ok(())
    }

    async fn start_loops(&self) -> OrchestratorResult<()> {
        self.task_manager.start().await?;
        self.scheduler.start().await?;
        self.health_checker.start().await?;
        self.discovery.start().await?;
        Ok(())
    }

    async fn stop_loops(&self) {
        self.discovery.stop().await;
        self.health_checker.stop().await;
        self.scheduler.stop().await;
        self.task_manager.stop().await;
    }

    /// 关闭集群，停止并等待所有后台循环退出
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(OrchestratorError::Constraint("集群尚未启动".to_string()));
        }
        info!("关闭集群: {}", self.config.cluster.name);
        self.stop_loops().await;
        state.started = false;
        state.started_at = None;
        state.updated_at = Utc::now();
        info!("集群已关闭");
        Ok(())
    }

    /// 通过已有集群的地址与加入令牌加入集群
    pub async fn join_cluster(&self, address: &str, token: &str) -> OrchestratorResult<()> {
        let mut state = self.state.lock().await;
        if state.started {
            return Err(OrchestratorError::Constraint(
                "集群已经启动，不能再加入其他集群".to_string(),
            ));
        }
        if token.trim().is_empty() {
            return Err(OrchestratorError::Validation("加入令牌不能为空".to_string()));
        }
        if address.trim().is_empty() {
            return Err(OrchestratorError::Validation("集群地址不能为空".to_string()));
        }

        info!("加入集群: {}", address);
        state.join_token = token.to_string();
        if !state.join_endpoints.iter().any(|e| e == address) {
            state.join_endpoints.push(address.to_string());
        }
        self.initialize_locked(&mut state).await
    }

    /// 离开集群
    ///
    /// 未强制时，若本节点是最后一个管理节点或仍有运行中的任务则拒绝。
    pub async fn leave_cluster(&self, force: bool) -> OrchestratorResult<()> {
        if !self.is_started().await {
            return Err(OrchestratorError::Constraint("集群尚未启动".to_string()));
        }

        if !force {
            let managers = self.node_manager.get_manager_nodes().await?.len();
            if managers <= 1 {
                return Err(OrchestratorError::Constraint(
                    "本节点是最后一个管理节点，需要强制离开".to_string(),
                ));
            }
            let running = self
                .task_manager
                .get_tasks_by_status(TaskStatus::Running)
                .await?
                .len();
            if running > 0 {
                return Err(OrchestratorError::Constraint(format!(
                    "仍有 {running} 个运行中的任务，需要强制离开"
                )));
            }
        } else {
            warn!("强制离开集群");
        }

        self.shutdown().await
    }

    /// 处理节点故障，重复调用同一故障为空操作
    pub async fn handle_node_failure(&self, node_id: &str) -> OrchestratorResult<FailoverReport> {
        self.failover.handle_node_failure(node_id).await
    }

    /// 将工作节点数量调整到目标值，至少保留一个
    ///
    /// 缩容时优先移除活跃任务最少的节点，相同时移除最近加入的节点；被移除节点上的任务会被故障转移。
    pub async fn scale_workers(&self, target: usize) -> OrchestratorResult<ScaleReport> {
        if !self.is_started().await {
            return Err(OrchestratorError::Constraint("集群尚未启动".to_string()));
        }
        let target = if target == 0 {
            warn!("工作节点数量不能低于1，目标调整为1");
            1
        } else {
            target
        };

        let workers = self.node_manager.get_worker_nodes().await?;
        let mut report = ScaleReport {
            previous: workers.len(),
            ..Default::default()
        };
        info!("调整工作节点数量: {} -> {}", workers.len(), target);

        if target > workers.len() {
            for _ in workers.len()..target {
                let node = self.register_template_worker().await?;
                report.added.push(node.id);
            }
        } else if target < workers.len() {
            for node in self.removal_order(workers).await?.into_iter().take(report.previous - target) {
                self.node_manager.drain_node(&node.id).await?;
                let evacuated = self.failover.evacuate_node(&node.id).await?;
                report.rescheduled_tasks.extend(evacuated.restarted);
                self.node_manager.unregister_node(&node.id).await?;
                report.removed.push(node.id);
            }
        }

        report.current = self.node_manager.get_worker_nodes().await?.len();
        info!(
            "工作节点调整完成: 新增 {}，移除 {}，迁移任务 {}",
            report.added.len(),
            report.removed.len(),
            report.rescheduled_tasks.len()
        );
        Ok(report)
    }

    async fn removal_order(&self, workers: Vec<Node>) -> OrchestratorResult<Vec<Node>> {
        let mut load: HashMap<String, usize> = HashMap::new();
        for task in self.task_manager.list_tasks().await? {
            if task.status.is_active() && !task.node_id.is_empty() {
                *load.entry(task.node_id).or_insert(0) += 1;
            }
        }

        let mut ordered = workers;
        ordered.sort_by_key(|n| {
            (
                load.get(&n.id).copied().unwrap_or(0),
                Reverse(n.created_at),
                Reverse(n.id.clone()),
            )
        });
        Ok(ordered)
    }

    async fn register_template_worker(&self) -> OrchestratorResult<Node> {
        let template = &self.config.scale;
        let id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut node = Node::new(
            id.clone(),
            id,
            template.worker_address.clone(),
            template.worker_port,
            NodeRole::Worker,
            Resources::new(template.worker_cpu, template.worker_memory, template.worker_disk),
        );
        node.capabilities.insert("worker".to_string(), true);
        node.version = CLUSTER_VERSION.to_string();
        self.node_manager.register_node(node).await
    }

    async fn register_local_node(&self) -> OrchestratorResult<Node> {
        let cluster = &self.config.cluster;
        let mut resources = Resources::new(cluster.local_cpu, cluster.local_memory, cluster.local_disk);
        resources.network = NetworkResources {
            interfaces: vec!["eth0".to_string(), "lo".to_string()],
            bandwidth: 1_000_000_000,
        };

        let mut node = Node::new(
            self.local_node_id.clone(),
            self.local_node_id.clone(),
            cluster.advertise_address.clone(),
            cluster.advertise_port,
            NodeRole::Manager,
            resources,
        );
        node.status = NodeStatus::Active;
        node.capabilities.insert("manager".to_string(), true);
        node.capabilities.insert("worker".to_string(), true);
        node.version = CLUSTER_VERSION.to_string();
        self.node_manager.register_node(node).await
    }

    pub async fn get_status(&self) -> OrchestratorResult<ClusterStatus> {
        let (running, started_at, updated_at) = {
            let state = self.state.lock().await;
            (state.started, state.started_at, state.updated_at)
        };
        let nodes = self.node_manager.list_nodes().await?;
        let tasks = self.task_manager.list_tasks().await?;

        Ok(ClusterStatus {
            id: self.cluster_id.clone(),
            name: self.config.cluster.name.clone(),
            running,
            nodes: nodes.len(),
            managers: nodes.iter().filter(|n| n.role == NodeRole::Manager).count(),
            workers: nodes.iter().filter(|n| n.role == NodeRole::Worker).count(),
            active_tasks: tasks.iter().filter(|t| t.status.is_active()).count(),
            completed_tasks: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Complete)
                .count(),
            uptime_seconds: started_at
                .map(|at| (Utc::now() - at).num_seconds())
                .unwrap_or(0),
            created_at: self.created_at,
            updated_at,
        })
    }

    pub async fn get_cluster_info(&self) -> OrchestratorResult<ClusterInfo> {
        Ok(ClusterInfo {
            id: self.cluster_id.clone(),
            name: self.config.cluster.name.clone(),
            version: CLUSTER_VERSION.to_string(),
            status: self.get_status().await?,
            nodes: self.node_manager.get_cluster_stats().await?,
            tasks: self.task_manager.get_stats().await?,
        })
    }

    pub async fn get_join_token(&self) -> OrchestratorResult<String> {
        let state = self.state.lock().await;
        if !state.started {
            return Err(OrchestratorError::Constraint("集群尚未启动".to_string()));
        }
        Ok(state.join_token.clone())
    }

    /// 生成新的加入令牌，旧令牌立即失效
    pub async fn rotate_join_token(&self) -> OrchestratorResult<String> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(OrchestratorError::Constraint("集群尚未启动".to_string()));
        }
        state.join_token = generate_join_token();
        state.updated_at = Utc::now();
        info!("加入令牌已轮换");
        Ok(state.join_token.clone())
    }

    /// 请求层的共享令牌校验，未配置令牌时放行
    pub fn authorize(&self, token: Option<&str>) -> OrchestratorResult<()> {
        let expected = self.config.security.api_token.as_str();
        if expected.is_empty() || token == Some(expected) {
            return Ok(());
        }
        Err(OrchestratorError::Unauthorized(
            "缺少或无效的访问令牌".to_string(),
        ))
    }
}

fn generate_join_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{JOIN_TOKEN_PREFIX}{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_token_format() {
        let token = generate_join_token();
        assert!(token.starts_with(JOIN_TOKEN_PREFIX));
        assert_eq!(token.len(), JOIN_TOKEN_PREFIX.len() + 32);
        assert_ne!(token, generate_join_token());
    }
}
