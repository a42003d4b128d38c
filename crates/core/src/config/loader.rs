use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::models::{
    ClusterConfig, DiscoveryConfig, DispatcherConfig, HealthConfig, ObservabilityConfig,
    ScaleConfig, SchedulerConfig, SecurityConfig, TaskManagerConfig,
};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub task_manager: TaskManagerConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    pub discovery: DiscoveryConfig,
    pub dispatcher: DispatcherConfig,
    pub scale: ScaleConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载配置：TOML文件 + `ORCHESTRATOR_` 前缀的环境变量
    ///
    /// 环境变量使用`__`分隔层级，例如 `ORCHESTRATOR_TASK_MANAGER__WORKER_COUNT=8`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.task_manager.validate()?;
        self.scheduler.validate()?;
        self.health.validate()?;
        self.discovery.validate()?;
        self.dispatcher.validate()?;
        self.scale.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{DiscoveryMode, QueueFullPolicy};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.advertise_port, 2377);
        assert_eq!(config.task_manager.worker_count, 5);
        assert_eq!(config.task_manager.queue_capacity, 1000);
        assert_eq!(config.scheduler.interval_seconds, 5);
        assert_eq!(config.health.interval_seconds, 10);
        assert_eq!(config.discovery.stale_threshold_seconds, 120);
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let toml_str = r#"
            [cluster]
            name = "edge"

            [task_manager]
            worker_count = 2
            queue_full_policy = "reject"

            [discovery]
            endpoints = ["10.0.0.2:2377"]
        "#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.cluster.name, "edge");
        assert_eq!(config.cluster.advertise_port, 2377);
        assert_eq!(config.task_manager.worker_count, 2);
        assert_eq!(config.task_manager.queue_full_policy, QueueFullPolicy::Reject);
        assert_eq!(config.discovery.mode, DiscoveryMode::Static);
        assert_eq!(config.discovery.endpoints, vec!["10.0.0.2:2377".to_string()]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AppConfig::default();
        config.task_manager.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.health.disk_warning_percent = 96.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[scheduler]\ninterval_seconds = 7\n\n[dispatcher]\nkind = \"process\"\n"
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.interval_seconds, 7);
        assert_eq!(
            config.dispatcher.kind,
            crate::config::models::DispatcherKind::Process
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/orchestrator.toml")).is_err());
    }
}
