use serde::{Deserialize, Serialize};

const GIB: i64 = 1024 * 1024 * 1024;

/// 集群与本地管理节点配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    /// 本地节点ID，为空时使用主机名派生
    pub node_id: String,
    pub advertise_address: String,
    pub advertise_port: u32,
    /// 加入令牌，为空时启动时生成
    pub join_token: String,
    /// 本地管理节点CPU（毫核）
    pub local_cpu: i64,
    /// 本地管理节点内存（字节）
    pub local_memory: i64,
    /// 本地管理节点磁盘（字节）
    pub local_disk: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "orchestrator-cluster".to_string(),
            node_id: String::new(),
            advertise_address: "0.0.0.0".to_string(),
            advertise_port: 2377,
            join_token: String::new(),
            local_cpu: 4000,
            local_memory: 8 * GIB,
            local_disk: 100 * GIB,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("集群名称不能为空"));
        }
        if self.advertise_address.trim().is_empty() {
            return Err(anyhow::anyhow!("通告地址不能为空"));
        }
        if self.advertise_port == 0 || self.advertise_port > 65535 {
            return Err(anyhow::anyhow!("无效的通告端口: {}", self.advertise_port));
        }
        if self.local_cpu <= 0 || self.local_memory <= 0 || self.local_disk <= 0 {
            return Err(anyhow::anyhow!("本地节点资源必须大于0"));
        }
        Ok(())
    }
}

/// 队列已满时的处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// 任务保持New状态，由调度器补偿入队
    #[default]
    Defer,
    /// 删除任务并返回Backpressure错误
    Reject,
}

/// 任务管理器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// 分发工作协程数量
    pub worker_count: usize,
    /// 分发队列容量
    pub queue_capacity: usize,
    /// 队列满时的最长等待时间（毫秒），0表示不等待
    pub enqueue_timeout_ms: u64,
    pub queue_full_policy: QueueFullPolicy,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_capacity: 1000,
            enqueue_timeout_ms: 0,
            queue_full_policy: QueueFullPolicy::Defer,
        }
    }
}

impl TaskManagerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            return Err(anyhow::anyhow!("分发工作协程数量必须大于0"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("分发队列容量必须大于0"));
        }
        Ok(())
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 调度扫描间隔（秒）
    pub interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_seconds: 5 }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }
        Ok(())
    }
}

/// 健康检查配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// 检查间隔（秒）
    pub interval_seconds: u64,
    /// 单个节点检查的总期限（秒）
    pub node_deadline_seconds: u64,
    /// 连通性探测超时（毫秒）
    pub reachability_timeout_ms: u64,
    /// 其余探测的超时（毫秒）
    pub probe_timeout_ms: u64,
    /// 同时检查的节点数上限
    pub max_concurrent_checks: usize,
    /// 资源使用率阈值（百分比）
    pub resource_threshold_percent: f64,
    pub disk_warning_percent: f64,
    pub disk_failure_percent: f64,
    /// 网络延迟告警阈值（毫秒）
    pub latency_warning_ms: u64,
    /// 网络延迟失败阈值（毫秒）
    pub latency_failure_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            node_deadline_seconds: 5,
            reachability_timeout_ms: 3000,
            probe_timeout_ms: 3000,
            max_concurrent_checks: 16,
            resource_threshold_percent: 90.0,
            disk_warning_percent: 85.0,
            disk_failure_percent: 95.0,
            latency_warning_ms: 100,
            latency_failure_ms: 500,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }
        if self.node_deadline_seconds == 0 {
            return Err(anyhow::anyhow!("节点检查期限必须大于0"));
        }
        if self.max_concurrent_checks == 0 {
            return Err(anyhow::anyhow!("并发检查数必须大于0"));
        }
        if self.disk_warning_percent >= self.disk_failure_percent {
            return Err(anyhow::anyhow!("磁盘告警阈值必须小于失败阈值"));
        }
        if self.latency_warning_ms >= self.latency_failure_ms {
            return Err(anyhow::anyhow!("延迟告警阈值必须小于失败阈值"));
        }
        Ok(())
    }
}

/// 服务发现模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    #[default]
    Static,
    Dns,
    Token,
}

/// 服务发现配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,
    pub endpoints: Vec<String>,
    /// 心跳广播间隔（秒）
    pub heartbeat_interval_seconds: u64,
    /// 对等节点巡检间隔（秒）
    pub sweep_interval_seconds: u64,
    /// 超过该时间未收到心跳即标记为inactive（秒）
    pub stale_threshold_seconds: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Static,
            endpoints: Vec::new(),
            heartbeat_interval_seconds: 30,
            sweep_interval_seconds: 60,
            stale_threshold_seconds: 120,
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_seconds == 0 || self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("服务发现间隔必须大于0"));
        }
        if self.stale_threshold_seconds <= 0 {
            return Err(anyhow::anyhow!("对等节点过期阈值必须大于0"));
        }
        Ok(())
    }
}

/// 分发器类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherKind {
    /// 不执行任何进程，固定时长后回报成功
    #[default]
    Loopback,
    /// 在本机以子进程执行任务命令
    Process,
}

/// 分发器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub kind: DispatcherKind,
    /// 单次分发调用的超时（秒）
    pub timeout_seconds: u64,
    /// loopback模式下模拟的运行时长（毫秒）
    pub loopback_run_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            kind: DispatcherKind::Loopback,
            timeout_seconds: 30,
            loopback_run_ms: 100,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("分发超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 扩容时使用的Worker节点模板
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScaleConfig {
    pub worker_address: String,
    pub worker_port: u32,
    pub worker_cpu: i64,
    pub worker_memory: i64,
    pub worker_disk: i64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            worker_address: "127.0.0.1".to_string(),
            worker_port: 2376,
            worker_cpu: 2000,
            worker_memory: 4 * GIB,
            worker_disk: 50 * GIB,
        }
    }
}

impl ScaleConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_cpu <= 0 || self.worker_memory <= 0 || self.worker_disk <= 0 {
            return Err(anyhow::anyhow!("Worker模板资源必须大于0"));
        }
        Ok(())
    }
}

/// 安全配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// 请求层共享令牌，为空表示不校验
    pub api_token: String,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// json 或 pretty
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }
        if !["json", "pretty"].contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.log_format));
        }
        Ok(())
    }
}
