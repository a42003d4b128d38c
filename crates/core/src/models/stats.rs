use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::health::HealthStats;
use crate::models::node::Resources;
use crate::models::task::TaskStatus;

/// 集群节点统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub manager_nodes: usize,
    pub worker_nodes: usize,
    pub ready_nodes: usize,
    pub total_resources: Resources,
    pub health: HealthStats,
}

/// 任务统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub tasks_by_status: HashMap<TaskStatus, usize>,
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub deferred_tasks: usize,
    pub workers: usize,
}

impl TaskStats {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// 集群运行状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatus {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub nodes: usize,
    pub managers: usize,
    pub workers: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub uptime_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 集群概要信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub status: ClusterStatus,
    pub nodes: ClusterStats,
    pub tasks: TaskStats,
}

/// 单次故障转移的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailoverReport {
    pub node_id: String,
    /// 同一故障已经处理过，本次为空操作
    pub already_handled: bool,
    pub restarted: Vec<String>,
    pub replacements: Vec<String>,
    pub errors: Vec<String>,
}

/// 扩缩容结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScaleReport {
    pub previous: usize,
    pub current: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub rescheduled_tasks: Vec<String>,
}
