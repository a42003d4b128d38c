use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, OrchestratorResult};

/// 节点角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Manager,
    Worker,
    Agent,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeRole::Manager => "manager",
            NodeRole::Worker => "worker",
            NodeRole::Agent => "agent",
        };
        write!(f, "{s}")
    }
}

/// 节点状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Ready,
    Active,
    Draining,
    Down,
    Unknown,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Ready => "ready",
            NodeStatus::Active => "active",
            NodeStatus::Draining => "draining",
            NodeStatus::Down => "down",
            NodeStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// 网络资源
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkResources {
    /// 网卡列表
    pub interfaces: Vec<String>,
    /// 带宽（bps）
    pub bandwidth: i64,
}

/// 资源描述，节点容量和任务请求共用
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    /// CPU（毫核）
    pub cpu: i64,
    /// 内存（字节）
    pub memory: i64,
    /// 磁盘（字节）
    pub disk: i64,
    pub gpu: i64,
    #[serde(default)]
    pub network: NetworkResources,
}

impl Resources {
    pub fn new(cpu: i64, memory: i64, disk: i64) -> Self {
        Self {
            cpu,
            memory,
            disk,
            ..Default::default()
        }
    }

    /// 是否能容纳给定的请求（CPU、内存、磁盘三个维度）
    pub fn can_fit(&self, request: &Resources) -> bool {
        self.cpu >= request.cpu && self.memory >= request.memory && self.disk >= request.disk
    }

    /// 资源累加，用于集群统计
    pub fn accumulate(&mut self, other: &Resources) {
        self.cpu += other.cpu;
        self.memory += other.memory;
        self.disk += other.disk;
        self.gpu += other.gpu;
        self.network.bandwidth += other.network.bandwidth;
    }
}

/// 集群节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u32,
    pub role: NodeRole,
    pub status: NodeStatus,
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub resources: Resources,
    #[serde(default)]
    pub version: String,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// 创建新的节点，状态默认为Ready
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u32,
        role: NodeRole,
        resources: Resources,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            role,
            status: NodeStatus::Ready,
            capabilities: HashMap::new(),
            labels: HashMap::new(),
            resources,
            version: String::new(),
            last_seen: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// 校验注册参数
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.id.trim().is_empty() {
            return Err(OrchestratorError::Validation("节点ID不能为空".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("节点名称不能为空".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(OrchestratorError::Validation("节点地址不能为空".to_string()));
        }
        if self.port == 0 || self.port > 65535 {
            return Err(OrchestratorError::Validation(format!(
                "无效的端口: {}",
                self.port
            )));
        }
        if self.resources.cpu <= 0 {
            return Err(OrchestratorError::Validation(
                "CPU资源必须大于0".to_string(),
            ));
        }
        if self.resources.memory <= 0 {
            return Err(OrchestratorError::Validation(
                "内存资源必须大于0".to_string(),
            ));
        }
        if self.resources.disk <= 0 {
            return Err(OrchestratorError::Validation(
                "磁盘资源必须大于0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_manager(&self) -> bool {
        self.role == NodeRole::Manager
    }

    /// 是否可以接收新的任务
    pub fn is_schedulable(&self) -> bool {
        matches!(self.status, NodeStatus::Ready | NodeStatus::Active)
    }

    /// 检查节点是否满足任务的资源请求
    pub fn has_capacity_for(&self, request: &Resources) -> bool {
        self.resources.can_fit(request)
    }

    /// 计算放置得分：CPU与内存剩余比例的平均值
    pub fn slack_score(&self, request: &Resources) -> f64 {
        let cpu_slack =
            (self.resources.cpu - request.cpu) as f64 / self.resources.cpu as f64;
        let memory_slack =
            (self.resources.memory - request.memory) as f64 / self.resources.memory as f64;
        (cpu_slack + memory_slack) / 2.0
    }

    /// 节点的控制端点地址
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_seen = now;
        self.updated_at = now;
    }
}
