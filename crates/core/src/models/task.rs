use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::models::node::{Node, Resources};

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Container,
    Service,
    Job,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    New,
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Ready,
    Starting,
    Running,
    Complete,
    Failed,
    Shutdown,
    Rejected,
    Orphaned,
    Remove,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 14] = [
        TaskStatus::New,
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::Accepted,
        TaskStatus::Preparing,
        TaskStatus::Ready,
        TaskStatus::Starting,
        TaskStatus::Running,
        TaskStatus::Complete,
        TaskStatus::Failed,
        TaskStatus::Shutdown,
        TaskStatus::Rejected,
        TaskStatus::Orphaned,
        TaskStatus::Remove,
    ];

    /// 在主链路 New..Running 上的位置，终态与管理状态返回None
    fn rank(self) -> Option<u8> {
        match self {
            TaskStatus::New => Some(0),
            TaskStatus::Pending => Some(1),
            TaskStatus::Assigned => Some(2),
            TaskStatus::Accepted => Some(3),
            TaskStatus::Preparing => Some(4),
            TaskStatus::Ready => Some(5),
            TaskStatus::Starting => Some(6),
            TaskStatus::Running => Some(7),
            _ => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Shutdown | TaskStatus::Rejected
        )
    }

    /// 是否处于主链路上（尚未结束）
    pub fn is_active(self) -> bool {
        self.rank().is_some()
    }

    /// 该状态下任务是否必须已经绑定节点
    pub fn requires_node(self) -> bool {
        matches!(
            self,
            TaskStatus::Assigned
                | TaskStatus::Accepted
                | TaskStatus::Preparing
                | TaskStatus::Ready
                | TaskStatus::Starting
                | TaskStatus::Running
                | TaskStatus::Complete
                | TaskStatus::Shutdown
        )
    }

    /// 状态机校验
    ///
    /// 主链路只能前进（允许跳过中间状态）；Failed/Shutdown可从任意未结束状态进入；
    /// Rejected只能在Accepted之前（含）进入；Complete要求至少已经Assigned；
    /// Orphaned可从任意未结束状态进入；Remove只能从终态或Orphaned进入。
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return false;
        }
        match next {
            TaskStatus::Remove => self.is_terminal() || self == TaskStatus::Orphaned,
            _ if !self.is_active() => false,
            TaskStatus::Orphaned | TaskStatus::Failed | TaskStatus::Shutdown => true,
            TaskStatus::Rejected => self.rank() <= TaskStatus::Accepted.rank(),
            TaskStatus::Complete => self.rank() >= TaskStatus::Assigned.rank(),
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::New => "new",
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Ready => "ready",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Shutdown => "shutdown",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Orphaned => "orphaned",
            TaskStatus::Remove => "remove",
        };
        write!(f, "{s}")
    }
}

/// 放置约束，例如 `node.labels.zone == east`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraint {
    pub operator: String,
    pub key: String,
    pub value: String,
}

impl Constraint {
    pub fn new(key: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// 判断节点是否满足约束，未知的键按不存在处理
    pub fn is_satisfied_by(&self, node: &Node) -> bool {
        let actual = match self.key.as_str() {
            "node.id" => Some(node.id.clone()),
            "node.name" => Some(node.name.clone()),
            "node.role" => Some(node.role.to_string()),
            key => {
                let label = key.strip_prefix("node.labels.").unwrap_or(key);
                node.labels.get(label).cloned()
            }
        };
        match self.operator.as_str() {
            "!=" => actual.as_deref() != Some(self.value.as_str()),
            _ => actual.as_deref() == Some(self.value.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preference {
    pub spread: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<Preference>,
    #[serde(default)]
    pub max_replicas: u32,
}

/// 重启策略
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartPolicy {
    /// none / on-failure / any
    pub condition: String,
    /// 重启间隔（秒）
    pub delay_seconds: u64,
    pub max_attempts: u32,
    /// 统计窗口（秒）
    pub window_seconds: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            condition: "any".to_string(),
            delay_seconds: 5,
            max_attempts: 0,
            window_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub target: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub mount_type: String,
    #[serde(default)]
    pub read_only: bool,
}

/// 编排任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub resources: Resources,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub status: TaskStatus,
    pub desired_state: TaskStatus,
    /// 未放置时为空
    #[serde(default)]
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub service_id: Option<String>,
    pub slot: Option<u32>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
        resources: Resources,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            task_type: TaskType::Container,
            image: image.into(),
            command: Vec::new(),
            env: Vec::new(),
            resources,
            constraints: Vec::new(),
            placement: Placement::default(),
            restart_policy: RestartPolicy::default(),
            networks: Vec::new(),
            volumes: Vec::new(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            status: TaskStatus::New,
            desired_state: TaskStatus::Running,
            node_id: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            service_id: None,
            slot: None,
        }
    }

    /// 校验提交参数
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.id.trim().is_empty() {
            return Err(OrchestratorError::Validation("任务ID不能为空".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("任务名称不能为空".to_string()));
        }
        if self.image.trim().is_empty() {
            return Err(OrchestratorError::Validation("任务镜像不能为空".to_string()));
        }
        if self.resources.cpu <= 0 {
            return Err(OrchestratorError::Validation(
                "任务CPU请求必须大于0".to_string(),
            ));
        }
        if self.resources.memory <= 0 {
            return Err(OrchestratorError::Validation(
                "任务内存请求必须大于0".to_string(),
            ));
        }
        if self.resources.disk < 0 {
            return Err(OrchestratorError::Validation(
                "任务磁盘请求不能为负数".to_string(),
            ));
        }
        Ok(())
    }

    /// 检查节点是否满足任务的全部放置约束
    pub fn constraints_satisfied_by(&self, node: &Node) -> bool {
        self.constraints.iter().all(|c| c.is_satisfied_by(node))
    }

    /// 节点ID与状态是否一致
    pub fn placement_consistent(&self) -> bool {
        match self.status {
            TaskStatus::New | TaskStatus::Pending => self.node_id.is_empty(),
            status if status.requires_node() => !self.node_id.is_empty(),
            _ => true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// 基于当前配置生成一个新的任务副本，用于重启和故障转移
    pub fn restart_clone(&self, new_id: impl Into<String>) -> Task {
        let now = Utc::now();
        Task {
            id: new_id.into(),
            status: TaskStatus::New,
            desired_state: TaskStatus::Running,
            node_id: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            ..self.clone()
        }
    }
}

/// 任务字段更新，仅允许修改名称、期望状态和标签
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub desired_state: Option<TaskStatus>,
    pub labels: Option<HashMap<String, String>>,
}

/// 状态迁移时一并写入的字段
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub node_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn assign(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Default::default()
        }
    }

    pub fn started() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// 应用到任务上，started_at只在尚未记录时写入
    pub fn apply(self, task: &mut Task) {
        if let Some(node_id) = self.node_id {
            task.node_id = node_id;
        }
        if let Some(started_at) = self.started_at {
            task.started_at.get_or_insert(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = Some(completed_at);
        }
    }
}
