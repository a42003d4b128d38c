use thiserror::Error;

/// 编排器错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("操作违反约束: {0}")]
    Constraint(String),

    #[error("没有满足资源需求的可用节点: {0}")]
    NoCapacity(String),

    #[error("调度队列已满: {0}")]
    Backpressure(String),

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("对等节点未找到: {id}")]
    PeerNotFound { id: String },

    #[error("节点健康数据不存在: {id}")]
    HealthDataNotFound { id: String },

    #[error("无效的任务状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("任务分发失败: {0}")]
    Dispatch(String),

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("尚未实现: {0}")]
    NotImplemented(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// 对应的HTTP状态码，供请求层统一映射
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::Validation(_)
            | OrchestratorError::Constraint(_)
            | OrchestratorError::InvalidTransition { .. } => 400,
            OrchestratorError::Unauthorized(_) => 401,
            OrchestratorError::NodeNotFound { .. }
            | OrchestratorError::TaskNotFound { .. }
            | OrchestratorError::PeerNotFound { .. }
            | OrchestratorError::HealthDataNotFound { .. } => 404,
            OrchestratorError::NotImplemented(_) => 501,
            _ => 500,
        }
    }

    /// 是否为调用方输入导致的错误（不应重试）
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
