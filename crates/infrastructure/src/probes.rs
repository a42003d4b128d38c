//! 节点健康探测实现
//!
//! - `ReachabilityProbe` - HTTP GET `/health`，2xx视为通过
//! - `ResourceHeadroomProbe` - CPU/内存/磁盘使用率阈值
//! - `DiskSpaceProbe` - 磁盘使用率分级
//! - `NetworkLatencyProbe` - TCP建连耗时分级
//!
//! 资源类探测读取 `NodeUsageRegistry` 中节点上报的使用率，未上报的节点视为通过。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::config::HealthConfig;
use orchestrator_core::models::{Node, NodeUsage, ProbeResult};
use orchestrator_core::traits::HealthProbe;

/// 节点资源使用率登记表
#[derive(Debug, Clone, Default)]
pub struct NodeUsageRegistry {
    usage: Arc<RwLock<HashMap<String, NodeUsage>>>,
}

impl NodeUsageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录节点上报的使用率
    pub async fn report(&self, node_id: &str, usage: NodeUsage) {
        self.usage.write().await.insert(node_id.to_string(), usage);
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeUsage> {
        self.usage.read().await.get(node_id).copied()
    }

    pub async fn forget(&self, node_id: &str) {
        self.usage.write().await.remove(node_id);
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// 控制端点连通性探测
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    client: reqwest::Client,
}

impl ReachabilityProbe {
    pub const NAME: &'static str = "api_connectivity";

    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for ReachabilityProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self, node: &Node) -> ProbeResult {
        let start = Instant::now();
        let url = format!("http://{}/health", node.endpoint());
        let result = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                ProbeResult::passed(Self::NAME, "API is responsive")
            }
            Ok(resp) => ProbeResult::failed(
                Self::NAME,
                format!("API returned status {}", resp.status().as_u16()),
            ),
            Err(e) => ProbeResult::failed(Self::NAME, format!("Request failed: {e}")),
        };
        result.with_duration(elapsed_ms(start))
    }
}

/// 资源余量探测
#[derive(Debug, Clone)]
pub struct ResourceHeadroomProbe {
    usage: NodeUsageRegistry,
    threshold_percent: f64,
}

impl ResourceHeadroomProbe {
    pub const NAME: &'static str = "resource_availability";

    pub fn new(usage: NodeUsageRegistry, threshold_percent: f64) -> Self {
        Self {
            usage,
            threshold_percent,
        }
    }

    pub fn classify(&self, usage: &NodeUsage) -> ProbeResult {
        let detail = format!(
            "CPU: {:.1}%, Memory: {:.1}%, Disk: {:.1}%",
            usage.cpu_percent, usage.memory_percent, usage.disk_percent
        );
        let limit = self.threshold_percent;
        if usage.cpu_percent < limit && usage.memory_percent < limit && usage.disk_percent < limit {
            ProbeResult::passed(Self::NAME, format!("Resources available ({detail})"))
        } else {
            ProbeResult::failed(Self::NAME, format!("Resource constraints exceeded ({detail})"))
        }
    }
}

#[async_trait]
impl HealthProbe for ResourceHeadroomProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self, node: &Node) -> ProbeResult {
        let start = Instant::now();
        let result = match self.usage.get(&node.id).await {
            Some(usage) => self.classify(&usage),
            None => ProbeResult::passed(Self::NAME, "no usage reported"),
        };
        result.with_duration(elapsed_ms(start))
    }
}

/// 磁盘空间探测
#[derive(Debug, Clone)]
pub struct DiskSpaceProbe {
    usage: NodeUsageRegistry,
    warning_percent: f64,
    failure_percent: f64,
}

impl DiskSpaceProbe {
    pub const NAME: &'static str = "disk_space";

    pub fn new(usage: NodeUsageRegistry, warning_percent: f64, failure_percent: f64) -> Self {
        Self {
            usage,
            warning_percent,
            failure_percent,
        }
    }

    pub fn classify(&self, disk_percent: f64) -> ProbeResult {
        if disk_percent < self.warning_percent {
            ProbeResult::passed(Self::NAME, format!("Disk space sufficient ({disk_percent:.1}% used)"))
        } else if disk_percent < self.failure_percent {
            ProbeResult::warning(Self::NAME, format!("Disk space low ({disk_percent:.1}% used)"))
        } else {
            ProbeResult::failed(Self::NAME, format!("Disk space critical ({disk_percent:.1}% used)"))
        }
    }
}

#[async_trait]
impl HealthProbe for DiskSpaceProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self, node: &Node) -> ProbeResult {
        let start = Instant::now();
        let result = match self.usage.get(&node.id).await {
            Some(usage) => self.classify(usage.disk_percent),
            None => ProbeResult::passed(Self::NAME, "no usage reported"),
        };
        result.with_duration(elapsed_ms(start))
    }
}

/// 网络延迟探测：测量到节点控制端口的TCP建连耗时
#[derive(Debug, Clone)]
pub struct NetworkLatencyProbe {
    connect_timeout: Duration,
    warning_ms: u64,
    failure_ms: u64,
}

impl NetworkLatencyProbe {
    pub const NAME: &'static str = "network_connectivity";

    pub fn new(connect_timeout: Duration, warning_ms: u64, failure_ms: u64) -> Self {
        Self {
            connect_timeout,
            warning_ms,
            failure_ms,
        }
    }

    pub fn classify(&self, latency_ms: u64) -> ProbeResult {
        if latency_ms < self.warning_ms {
            ProbeResult::passed(Self::NAME, format!("Network latency: {latency_ms}ms"))
        } else if latency_ms < self.failure_ms {
            ProbeResult::warning(Self::NAME, format!("Network latency high: {latency_ms}ms"))
        } else {
            ProbeResult::failed(Self::NAME, format!("Network connectivity issues: {latency_ms}ms"))
        }
    }
}

#[async_trait]
impl HealthProbe for NetworkLatencyProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self, node: &Node) -> ProbeResult {
        let start = Instant::now();
        let connect = tokio::time::timeout(self.connect_timeout, TcpStream::connect(node.endpoint()));
        let result = match connect.await {
            Ok(Ok(_stream)) => self.classify(elapsed_ms(start)),
            Ok(Err(e)) => {
                debug!("节点 {} TCP连接失败: {}", node.id, e);
                ProbeResult::failed(Self::NAME, format!("Connection failed: {e}"))
            }
            Err(_) => ProbeResult::failed(Self::NAME, "Connection timed out"),
        };
        result.with_duration(elapsed_ms(start))
    }
}

/// 按健康检查配置构建默认的四项探测
pub fn default_probes(config: &HealthConfig, usage: &NodeUsageRegistry) -> Vec<Arc<dyn HealthProbe>> {
    let probe_timeout = Duration::from_millis(config.probe_timeout_ms);
    vec![
        Arc::new(ReachabilityProbe::new(Duration::from_millis(
            config.reachability_timeout_ms,
        ))),
        Arc::new(ResourceHeadroomProbe::new(
            usage.clone(),
            config.resource_threshold_percent,
        )),
        Arc::new(DiskSpaceProbe::new(
            usage.clone(),
            config.disk_warning_percent,
            config.disk_failure_percent,
        )),
        Arc::new(NetworkLatencyProbe::new(
            probe_timeout,
            config.latency_warning_ms,
            config.latency_failure_ms,
        )),
    ]
}
