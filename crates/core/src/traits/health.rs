use async_trait::async_trait;

use crate::errors::OrchestratorResult;
use crate::models::{FailoverReport, Node, ProbeResult};

/// 单项节点健康探测
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// 探测项名称，出现在健康快照中
    fn name(&self) -> &str;

    /// 执行探测，超时由调用方控制
    async fn probe(&self, node: &Node) -> ProbeResult;
}

/// 节点故障处理
#[async_trait]
pub trait NodeFailureHandler: Send + Sync {
    /// 节点被判定为down时调用，同一故障重复调用应为空操作
    async fn handle_node_failure(&self, node_id: &str) -> OrchestratorResult<FailoverReport>;

    /// 节点恢复时调用，清除故障标记
    async fn handle_node_recovery(&self, node_id: &str) -> OrchestratorResult<()>;
}
