use std::collections::HashSet;
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use orchestrator_core::models::{
    ClusterStats, Node, NodeHealth, NodeRole, NodeStatus, Resources, Task,
};
use orchestrator_core::traits::NodeRepository;
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::health_checker::HealthRegistry;

/// 节点管理器
///
/// 维护节点注册表并负责按资源余量为任务选择节点。健康数据从健康检查器的快照表中读取。
pub struct NodeManager {
    repo: Arc<dyn NodeRepository>,
    health: HealthRegistry,
    /// 注册与注销串行化，保证管理节点数量检查与写入之间没有竞争
    membership_lock: Mutex<()>,
    /// 故障已处理的节点，节点离开down状态时清除
    failover_marks: Mutex<HashSet<String>>,
}

impl NodeManager {
    pub fn new(repo: Arc<dyn NodeRepository>, health: HealthRegistry) -> Self {
        Self {
            repo,
            health,
            membership_lock: Mutex::new(()),
            failover_marks: Mutex::new(HashSet::new()),
        }
    }

    /// 注册或更新节点
    pub async fn register_node(&self, node: Node) -> OrchestratorResult<Node> {
        node.validate()?;

        let _guard = self.membership_lock.lock().await;
        if let Some(existing) = self.repo.get(&node.id).await? {
            if existing.is_manager() && !node.is_manager() && self.manager_count().await? <= 1 {
                return Err(OrchestratorError::Constraint(format!(
                    "节点 {} 是唯一的管理节点，不能降级为 {}",
                    node.id, node.role
                )));
            }
        }

        let node = self.repo.upsert(node).await?;
        self.sync_failover_mark(&node.id, node.status).await;
        info!(
            "注册节点: id={}, role={}, address={}",
            node.id,
            node.role,
            node.endpoint()
        );
        self.record_node_gauge().await;
        Ok(node)
    }

    /// 注销节点，不会隐式排空
    pub async fn unregister_node(&self, id: &str) -> OrchestratorResult<Node> {
        let _guard = self.membership_lock.lock().await;
        let node = self.get_node(id).await?;
        if node.is_manager() && self.manager_count().await? <= 1 {
            return Err(OrchestratorError::Constraint(format!(
                "不能注销最后一个管理节点: {id}"
            )));
        }

        let removed = self
            .repo
            .remove(id)
            .await?
            .ok_or_else(|| OrchestratorError::NodeNotFound { id: id.to_string() })?;
        self.health.remove(id).await;
        self.failover_marks.lock().await.remove(id);
        info!("注销节点: {}", id);
        self.record_node_gauge().await;
        Ok(removed)
    }

    pub async fn get_node(&self, id: &str) -> OrchestratorResult<Node> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::NodeNotFound { id: id.to_string() })
    }

    /// 所有节点，按ID排序
    pub async fn list_nodes(&self) -> OrchestratorResult<Vec<Node>> {
        self.repo.list().await
    }

    pub async fn update_node_status(&self, id: &str, status: NodeStatus) -> OrchestratorResult<Node> {
        let node = self.repo.update_status(id, status).await?;
        self.sync_failover_mark(id, status).await;
        debug!("节点 {} 状态更新为 {}", id, status);
        Ok(node)
    }

    /// 为节点设置故障标记，返回`false`表示本次故障已被处理过
    pub async fn mark_failover(&self, id: &str) -> bool {
        self.failover_marks.lock().await.insert(id.to_string())
    }

    /// 清除故障标记，返回标记是否存在
    pub async fn clear_failover_mark(&self, id: &str) -> bool {
        self.failover_marks.lock().await.remove(id)
    }

    pub async fn has_failover_mark(&self, id: &str) -> bool {
        self.failover_marks.lock().await.contains(id)
    }

    async fn sync_failover_mark(&self, id: &str, status: NodeStatus) {
        if status != NodeStatus::Down && self.clear_failover_mark(id).await {
            debug!("节点 {} 离开down状态，清除故障标记", id);
        }
    }

    pub async fn update_node_resources(
        &self,
        id: &str,
        resources: Resources,
    ) -> OrchestratorResult<Node> {
        if resources.cpu <= 0 || resources.memory <= 0 || resources.disk <= 0 {
            return Err(OrchestratorError::Validation(
                "节点资源必须大于0".to_string(),
            ));
        }
        self.repo.update_resources(id, resources).await
    }

    /// 排空节点，不再接收新任务
    pub async fn drain_node(&self, id: &str) -> OrchestratorResult<Node> {
        let node = self.get_node(id).await?;
        if node.is_manager() {
            return Err(OrchestratorError::Constraint(format!(
                "不能排空管理节点: {id}"
            )));
        }
        info!("排空节点: {}", id);
        self.update_node_status(id, NodeStatus::Draining).await
    }

    pub async fn activate_node(&self, id: &str) -> OrchestratorResult<Node> {
        self.get_node(id).await?;
        info!("激活节点: {}", id);
        self.update_node_status(id, NodeStatus::Active).await
    }

    /// 为任务选择节点
    ///
    /// 候选节点需处于ready/active状态、满足放置约束且CPU、内存、磁盘均能容纳请求；
    /// 取CPU与内存剩余比例平均值最高者，得分相同时取ID最小者。
    pub async fn select_node_for_task(&self, task: &Task) -> OrchestratorResult<Node> {
        let nodes = self.repo.list().await?;

        let mut best: Option<(f64, Node)> = None;
        for node in nodes {
            if !node.is_schedulable()
                || !node.has_capacity_for(&task.resources)
                || !task.constraints_satisfied_by(&node)
            {
                continue;
            }
            let score = node.slack_score(&task.resources);
            let better = best
                .as_ref()
                .map_or(true, |(best_score, _)| score > *best_score);
            if better {
                best = Some((score, node));
            }
        }

        match best {
            Some((score, node)) => {
                debug!("任务 {} 选择节点 {} (score={:.4})", task.id, node.id, score);
                Ok(node)
            }
            None => {
                warn!(
                    "没有节点能容纳任务 {}: cpu={}, memory={}, disk={}",
                    task.id, task.resources.cpu, task.resources.memory, task.resources.disk
                );
                Err(OrchestratorError::NoCapacity(format!(
                    "任务 {} 请求 cpu={} memory={} disk={}",
                    task.id, task.resources.cpu, task.resources.memory, task.resources.disk
                )))
            }
        }
    }

    pub async fn get_nodes_by_role(&self, role: NodeRole) -> OrchestratorResult<Vec<Node>> {
        Ok(self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|n| n.role == role)
            .collect())
    }

    pub async fn get_manager_nodes(&self) -> OrchestratorResult<Vec<Node>> {
        self.get_nodes_by_role(NodeRole::Manager).await
    }

    pub async fn get_worker_nodes(&self) -> OrchestratorResult<Vec<Node>> {
        self.get_nodes_by_role(NodeRole::Worker).await
    }

    pub async fn get_ready_nodes(&self) -> OrchestratorResult<Vec<Node>> {
        Ok(self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|n| n.status == NodeStatus::Ready)
            .collect())
    }

    pub async fn get_node_health(&self, id: &str) -> OrchestratorResult<NodeHealth> {
        self.get_node(id).await?;
        self.health
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::HealthDataNotFound { id: id.to_string() })
    }

    pub async fn get_all_nodes_health(&self) -> Vec<NodeHealth> {
        self.health.all().await
    }

    /// 集群节点与资源统计
    pub async fn get_cluster_stats(&self) -> OrchestratorResult<ClusterStats> {
        let nodes = self.repo.list().await?;
        let mut stats = ClusterStats {
            total_nodes: nodes.len(),
            ..Default::default()
        };
        for node in &nodes {
            match node.role {
                NodeRole::Manager => stats.manager_nodes += 1,
                NodeRole::Worker => stats.worker_nodes += 1,
                NodeRole::Agent => {}
            }
            if node.status == NodeStatus::Ready {
                stats.ready_nodes += 1;
            }
            stats.total_resources.accumulate(&node.resources);
        }
        stats.health = self.health.stats().await;
        Ok(stats)
    }

    async fn manager_count(&self) -> OrchestratorResult<usize> {
        Ok(self
            .repo
            .list()
            .await?
            .iter()
            .filter(|n| n.is_manager())
            .count())
    }

    async fn record_node_gauge(&self) {
        if let Ok(nodes) = self.repo.list().await {
            gauge!("orchestrator_nodes").set(nodes.len() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_infrastructure::InMemoryNodeRepository;

    const GIB: i64 = 1024 * 1024 * 1024;

    fn manager() -> NodeManager {
        NodeManager::new(
            Arc::new(InMemoryNodeRepository::new()),
            HealthRegistry::new(10),
        )
    }

    fn node(id: &str, role: NodeRole, cpu: i64, memory: i64) -> Node {
        Node::new(id, id, "127.0.0.1", 2376, role, Resources::new(cpu, memory, 10 * GIB))
    }

    fn task(cpu: i64, memory: i64) -> Task {
        Task::new("t1", "t1", "busybox", Resources::new(cpu, memory, 0))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let nm = manager();
        let mut n = node("w1", NodeRole::Worker, 2000, 4 * GIB);
        n.address = "10.0.0.7".to_string();
        n.port = 2400;
        n.status = NodeStatus::Active;
        n.labels.insert("zone".to_string(), "east".to_string());
        n.capabilities.insert("worker".to_string(), true);
        n.version = "1.0.0".to_string();
        nm.register_node(n.clone()).await.unwrap();

        let mut stored = nm.get_node("w1").await.unwrap();
        stored.created_at = n.created_at;
        stored.updated_at = n.updated_at;
        stored.last_seen = n.last_seen;
        assert_eq!(stored, n);
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        nm.register_node(node("w-b", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();
        nm.register_node(node("w-a", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();

        let first = nm.list_nodes().await.unwrap();
        let second = nm.list_nodes().await.unwrap();
        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "w-a", "w-b"]);

        assert_eq!(nm.get_node("w-a").await.unwrap(), nm.get_node("w-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_failover_mark_follows_status() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        nm.register_node(node("w", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();

        assert!(nm.mark_failover("w").await);
        assert!(!nm.mark_failover("w").await);
        nm.update_node_status("w", NodeStatus::Down).await.unwrap();
        assert!(nm.has_failover_mark("w").await);

        nm.activate_node("w").await.unwrap();
        assert!(!nm.has_failover_mark("w").await);

        assert!(nm.mark_failover("w").await);
        nm.update_node_status("w", NodeStatus::Down).await.unwrap();
        nm.register_node(node("w", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();
        assert!(!nm.has_failover_mark("w").await);

        assert!(nm.mark_failover("w").await);
        nm.unregister_node("w").await.unwrap();
        assert!(!nm.has_failover_mark("w").await);
    }

    #[tokio::test]
    async fn test_register_rejects_zero_cpu() {
        let nm = manager();
        let err = nm
            .register_node(node("bad", NodeRole::Worker, 0, GIB))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(nm.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_manager_protected() {
        let nm = manager();
        nm.register_node(node("m1", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        nm.register_node(node("w1", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();

        let err = nm.unregister_node("m1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Constraint(_)));

        let err = nm
            .register_node(node("m1", NodeRole::Worker, 4000, 8 * GIB))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Constraint(_)));

        nm.register_node(node("m2", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        nm.unregister_node("m1").await.unwrap();
        assert_eq!(nm.get_manager_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_missing_node() {
        let nm = manager();
        let err = nm.unregister_node("ghost").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_select_prefers_higher_slack() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        nm.register_node(node("w", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();

        let selected = nm.select_node_for_task(&task(1000, GIB)).await.unwrap();
        assert_eq!(selected.id, "m");
    }

    #[tokio::test]
    async fn test_select_tie_breaks_on_lowest_id() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 1000, GIB)).await.unwrap();
        nm.register_node(node("w-b", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();
        nm.register_node(node("w-a", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();

        let selected = nm.select_node_for_task(&task(500, GIB)).await.unwrap();
        assert_eq!(selected.id, "w-a");
    }

    #[tokio::test]
    async fn test_select_skips_unschedulable_and_small_nodes() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 1000, GIB)).await.unwrap();
        nm.register_node(node("big", NodeRole::Worker, 16000, 32 * GIB)).await.unwrap();
        nm.drain_node("big").await.unwrap();

        let err = nm.select_node_for_task(&task(2000, GIB)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoCapacity(_)));

        nm.activate_node("big").await.unwrap();
        let selected = nm.select_node_for_task(&task(2000, GIB)).await.unwrap();
        assert_eq!(selected.id, "big");
    }

    #[tokio::test]
    async fn test_select_honours_constraints() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 8000, 8 * GIB)).await.unwrap();
        let mut east = node("east", NodeRole::Worker, 2000, 4 * GIB);
        east.labels.insert("zone".to_string(), "east".to_string());
        nm.register_node(east).await.unwrap();

        let mut t = task(500, GIB);
        t.constraints.push(orchestrator_core::models::Constraint::new(
            "node.labels.zone",
            "==",
            "east",
        ));
        assert_eq!(nm.select_node_for_task(&t).await.unwrap().id, "east");
    }

    #[tokio::test]
    async fn test_drain_manager_rejected() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        assert!(matches!(
            nm.drain_node("m").await.unwrap_err(),
            OrchestratorError::Constraint(_)
        ));
    }

    #[tokio::test]
    async fn test_health_read_through() {
        let registry = HealthRegistry::new(10);
        let nm = NodeManager::new(Arc::new(InMemoryNodeRepository::new()), registry.clone());
        nm.register_node(node("m", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();

        assert!(matches!(
            nm.get_node_health("m").await.unwrap_err(),
            OrchestratorError::HealthDataNotFound { .. }
        ));

        registry
            .record(NodeHealth::from_checks("m", Vec::new(), 3))
            .await;
        assert_eq!(nm.get_node_health("m").await.unwrap().status, NodeStatus::Ready);
        assert_eq!(nm.get_all_nodes_health().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cluster_stats() {
        let nm = manager();
        nm.register_node(node("m", NodeRole::Manager, 4000, 8 * GIB)).await.unwrap();
        nm.register_node(node("w", NodeRole::Worker, 2000, 4 * GIB)).await.unwrap();
        nm.register_node(node("a", NodeRole::Agent, 1000, GIB)).await.unwrap();
        nm.update_node_status("w", NodeStatus::Down).await.unwrap();

        let stats = nm.get_cluster_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.manager_nodes, 1);
        assert_eq!(stats.worker_nodes, 1);
        assert_eq!(stats.ready_nodes, 2);
        assert_eq!(stats.total_resources.cpu, 7000);
    }
}
