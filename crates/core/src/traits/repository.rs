//! 注册表存储接口
//!
//! 节点与任务注册表均通过注入的存储接口访问，组件自身只持有 `Arc<dyn ...>`：
//! - `NodeRepository` - 节点的注册、查询与状态维护
//! - `TaskRepository` - 任务的存取以及带条件的原子状态迁移
//!
//! 内存实现位于 infrastructure crate。

use async_trait::async_trait;

use crate::errors::OrchestratorResult;
use crate::models::{Node, NodeStatus, Resources, Task, TaskPatch, TaskStatus, TaskUpdate};

/// 节点存储接口
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 按ID插入或覆盖节点，已存在时保留created_at
    async fn upsert(&self, node: Node) -> OrchestratorResult<Node>;

    async fn get(&self, id: &str) -> OrchestratorResult<Option<Node>>;

    /// 所有节点，按ID排序
    async fn list(&self) -> OrchestratorResult<Vec<Node>>;

    async fn remove(&self, id: &str) -> OrchestratorResult<Option<Node>>;

    /// 更新节点状态，节点不存在时返回NodeNotFound
    async fn update_status(&self, id: &str, status: NodeStatus) -> OrchestratorResult<Node>;

    async fn update_resources(&self, id: &str, resources: Resources) -> OrchestratorResult<Node>;
}

/// 任务存储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入新任务，ID重复时返回Validation错误
    async fn insert(&self, task: Task) -> OrchestratorResult<Task>;

    async fn get(&self, id: &str) -> OrchestratorResult<Option<Task>>;

    /// 所有任务，按创建时间和ID排序
    async fn list(&self) -> OrchestratorResult<Vec<Task>>;

    async fn find_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>>;

    async fn find_by_node(&self, node_id: &str) -> OrchestratorResult<Vec<Task>>;

    /// 更新名称、期望状态和标签
    async fn update(&self, id: &str, update: TaskUpdate) -> OrchestratorResult<Task>;

    /// 条件状态迁移：仅当当前状态等于`from`时迁移到`to`并应用patch
    ///
    /// 状态不匹配返回`Ok(None)`，任务不存在返回TaskNotFound。
    async fn transition(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        patch: TaskPatch,
    ) -> OrchestratorResult<Option<Task>>;

    /// 删除任务，当前状态在`protected`中时返回Constraint错误
    async fn remove_unless(&self, id: &str, protected: &[TaskStatus]) -> OrchestratorResult<Task>;

    async fn count(&self) -> OrchestratorResult<usize>;
}
