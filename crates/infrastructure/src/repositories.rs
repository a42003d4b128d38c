use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::models::{Node, NodeStatus, Resources, Task, TaskPatch, TaskStatus, TaskUpdate};
use orchestrator_core::traits::{NodeRepository, TaskRepository};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// 内存节点注册表
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeRepository {
    nodes: Arc<RwLock<HashMap<String, Node>>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn upsert(&self, mut node: Node) -> OrchestratorResult<Node> {
        let mut nodes = self.nodes.write().await;
        let now = Utc::now();
        if let Some(existing) = nodes.get(&node.id) {
            node.created_at = existing.created_at;
        } else {
            node.created_at = now;
        }
        node.updated_at = now;
        node.last_seen = now;
        nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn remove(&self, id: &str) -> OrchestratorResult<Option<Node>> {
        Ok(self.nodes.write().await.remove(id))
    }

    async fn update_status(&self, id: &str, status: NodeStatus) -> OrchestratorResult<Node> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound { id: id.to_string() })?;
        node.status = status;
        node.touch();
        Ok(node.clone())
    }

    async fn update_resources(&self, id: &str, resources: Resources) -> OrchestratorResult<Node> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound { id: id.to_string() })?;
        node.resources = resources;
        node.touch();
        Ok(node.clone())
    }
}

/// 内存任务注册表
///
/// 状态迁移在同一把写锁内完成比较与写入。
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: Task) -> OrchestratorResult<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(OrchestratorError::Validation(format!(
                "任务ID已存在: {}",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.read().await.values().cloned().collect();
        Ok(Self::sorted(tasks))
    }

    async fn find_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>> {
        let tasks = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(Self::sorted(tasks))
    }

    async fn find_by_node(&self, node_id: &str) -> OrchestratorResult<Vec<Task>> {
        let tasks = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.node_id == node_id)
            .cloned()
            .collect();
        Ok(Self::sorted(tasks))
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> OrchestratorResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.to_string() })?;
        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(desired_state) = update.desired_state {
            task.desired_state = desired_state;
        }
        if let Some(labels) = update.labels {
            task.labels = labels;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn transition(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        patch: TaskPatch,
    ) -> OrchestratorResult<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.to_string() })?;
        if task.status != from {
            debug!(
                "任务 {} 状态已变化，放弃迁移: 期望 {}，实际 {}",
                id, from, task.status
            );
            return Ok(None);
        }
        task.status = to;
        patch.apply(task);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn remove_unless(&self, id: &str, protected: &[TaskStatus]) -> OrchestratorResult<Task> {
        let mut tasks = self.tasks.write().await;
        let status = tasks
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.to_string() })?;
        if protected.contains(&status) {
            return Err(OrchestratorError::Constraint(format!(
                "任务 {id} 处于 {status} 状态，不能删除"
            )));
        }
        tasks
            .remove(id)
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.to_string() })
    }

    async fn count(&self) -> OrchestratorResult<usize> {
        Ok(self.tasks.read().await.len())
    }
}
