use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::node::NodeStatus;

/// 单项探测结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Passed,
    Warning,
    Failed,
}

/// 单项探测结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ProbeResult {
    pub fn passed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, ProbeStatus::Passed, message)
    }

    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, ProbeStatus::Warning, message)
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, ProbeStatus::Failed, message)
    }

    fn with_status(name: impl Into<String>, status: ProbeStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            duration_ms: 0,
            message: message.into(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// 节点健康快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeHealth {
    pub node_id: String,
    pub status: NodeStatus,
    pub check_time: DateTime<Utc>,
    pub response_time_ms: u64,
    pub checks: Vec<ProbeResult>,
}

impl NodeHealth {
    /// 根据各项探测结果汇总节点状态：任一失败为down，任一警告为unknown，否则ready
    pub fn aggregate(checks: &[ProbeResult]) -> NodeStatus {
        if checks.iter().any(|c| c.status == ProbeStatus::Failed) {
            NodeStatus::Down
        } else if checks.iter().any(|c| c.status == ProbeStatus::Warning) {
            NodeStatus::Unknown
        } else {
            NodeStatus::Ready
        }
    }

    pub fn from_checks(node_id: impl Into<String>, checks: Vec<ProbeResult>, response_time_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            status: Self::aggregate(&checks),
            check_time: Utc::now(),
            response_time_ms,
            checks,
        }
    }
}

/// 节点上报的资源使用率（百分比）
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// 健康检查统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthStats {
    pub total_nodes: usize,
    pub check_interval_seconds: u64,
    pub nodes_by_status: HashMap<NodeStatus, usize>,
    pub average_response_time_ms: f64,
}
