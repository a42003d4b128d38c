#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use mockall::mock;

    use orchestrator_core::config::HealthConfig;
    use orchestrator_core::models::{FailoverReport, NodeStatus, ProbeStatus};
    use orchestrator_core::traits::{HealthProbe, NodeFailureHandler};
    use orchestrator_core::{OrchestratorError, OrchestratorResult};
    use orchestrator_dispatcher::health_checker::{HealthChecker, HealthRegistry};
    use orchestrator_dispatcher::node_manager::NodeManager;
    use orchestrator_infrastructure::InMemoryNodeRepository;
    use orchestrator_testing_utils::{NodeBuilder, RecordingFailureHandler, StaticProbe};

    mock! {
        pub FailureHandler {}

        #[async_trait]
        impl NodeFailureHandler for FailureHandler {
            async fn handle_node_failure(&self, node_id: &str) -> OrchestratorResult<FailoverReport>;
            async fn handle_node_recovery(&self, node_id: &str) -> OrchestratorResult<()>;
        }
    }

    async fn node_manager() -> (Arc<NodeManager>, HealthRegistry) {
        let registry = HealthRegistry::new(10);
        let nodes = Arc::new(NodeManager::new(
            Arc::new(InMemoryNodeRepository::new()),
            registry.clone(),
        ));
        nodes.register_node(NodeBuilder::manager("m").build()).await.unwrap();
        nodes.register_node(NodeBuilder::worker("w1").build()).await.unwrap();
        (nodes, registry)
    }

    fn checker(
        nodes: Arc<NodeManager>,
        registry: HealthRegistry,
        probes: Vec<Arc<dyn HealthProbe>>,
        handler: Arc<dyn NodeFailureHandler>,
        config: HealthConfig,
    ) -> HealthChecker {
        HealthChecker::new(nodes, registry, probes, handler, config)
    }

    #[tokio::test]
    async fn test_failed_probe_triggers_failover_once() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::passing("api_connectivity");
        probe.set_node_status("w1", ProbeStatus::Failed);

        let mut handler = MockFailureHandler::new();
        handler
            .expect_handle_node_failure()
            .withf(|node_id| node_id == "w1")
            .times(1)
            .returning(|node_id| {
                Ok(FailoverReport {
                    node_id: node_id.to_string(),
                    ..Default::default()
                })
            });
        handler.expect_handle_node_recovery().never();

        let checker = checker(
            Arc::clone(&nodes),
            registry,
            vec![Arc::new(probe)],
            Arc::new(handler),
            HealthConfig::default(),
        );

        let results = checker.check_all_nodes().await;
        assert_eq!(results.len(), 2);
        assert_eq!(nodes.get_node("w1").await.unwrap().status, NodeStatus::Down);
        assert_eq!(nodes.get_node("m").await.unwrap().status, NodeStatus::Ready);

        // 已经是down的节点不会再次触发故障处理
        checker.check_all_nodes().await;
        assert_eq!(checker.get_node_health("w1").await.unwrap().status, NodeStatus::Down);
    }

    #[tokio::test]
    async fn test_recovery_restores_ready() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::passing("api_connectivity");
        probe.set_node_status("w1", ProbeStatus::Failed);
        let handler = RecordingFailureHandler::new();

        let checker = checker(
            Arc::clone(&nodes),
            registry,
            vec![Arc::new(probe.clone())],
            Arc::new(handler.clone()),
            HealthConfig::default(),
        );

        checker.check_all_nodes().await;
        assert_eq!(handler.failures(), vec!["w1".to_string()]);

        probe.set_node_status("w1", ProbeStatus::Passed);
        checker.check_all_nodes().await;
        assert_eq!(nodes.get_node("w1").await.unwrap().status, NodeStatus::Ready);
        assert_eq!(handler.recoveries(), vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn test_warning_leaves_status_unchanged() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::new("disk_space", ProbeStatus::Warning);
        let handler = RecordingFailureHandler::new();

        let checker = checker(
            Arc::clone(&nodes),
            registry,
            vec![Arc::new(probe)],
            Arc::new(handler.clone()),
            HealthConfig::default(),
        );

        let health = checker.force_check("w1").await.unwrap();
        assert_eq!(health.status, NodeStatus::Unknown);
        assert_eq!(nodes.get_node("w1").await.unwrap().status, NodeStatus::Ready);
        assert!(handler.failures().is_empty());
    }

    #[tokio::test]
    async fn test_slow_probe_times_out_as_failure() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::passing("network_connectivity").with_delay(Duration::from_millis(300));
        let handler = RecordingFailureHandler::new();
        let config = HealthConfig {
            probe_timeout_ms: 50,
            ..Default::default()
        };

        let checker = checker(
            Arc::clone(&nodes),
            registry,
            vec![Arc::new(probe)],
            Arc::new(handler.clone()),
            config,
        );

        let health = checker.force_check("w1").await.unwrap();
        assert_eq!(health.status, NodeStatus::Down);
        assert_eq!(health.checks[0].message, "probe timed out");
        assert_eq!(handler.failures(), vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn test_node_deadline_bounds_whole_check() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::passing("api_connectivity").with_delay(Duration::from_millis(1500));
        let config = HealthConfig {
            probe_timeout_ms: 5000,
            node_deadline_seconds: 1,
            ..Default::default()
        };

        let checker = checker(
            nodes,
            registry,
            vec![Arc::new(probe)],
            Arc::new(RecordingFailureHandler::new()),
            config,
        );

        let health = checker.force_check("m").await.unwrap();
        assert_eq!(health.status, NodeStatus::Down);
        assert_eq!(health.checks.len(), 1);
        assert_eq!(health.checks[0].name, "deadline");
    }

    #[tokio::test]
    async fn test_health_lookup_and_stats() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::passing("api_connectivity");
        let checker = checker(
            Arc::clone(&nodes),
            registry,
            vec![Arc::new(probe.clone())],
            Arc::new(RecordingFailureHandler::new()),
            HealthConfig::default(),
        );

        assert!(matches!(
            checker.get_node_health("w1").await.unwrap_err(),
            OrchestratorError::HealthDataNotFound { .. }
        ));
        assert!(matches!(
            checker.force_check("ghost").await.unwrap_err(),
            OrchestratorError::NodeNotFound { .. }
        ));

        checker.check_all_nodes().await;
        assert_eq!(probe.calls(), 2);

        let stats = checker.get_stats().await;
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.check_interval_seconds, 10);
        assert_eq!(stats.nodes_by_status.get(&NodeStatus::Ready), Some(&2));
        assert_eq!(nodes.get_all_nodes_health().await.len(), 2);
    }

    #[tokio::test]
    async fn test_start_stop_loop() {
        let (nodes, registry) = node_manager().await;
        let probe = StaticProbe::passing("api_connectivity");
        let checker = Arc::new(checker(
            nodes,
            registry,
            vec![Arc::new(probe.clone())],
            Arc::new(RecordingFailureHandler::new()),
            HealthConfig::default(),
        ));

        checker.start().await.unwrap();
        assert!(checker.start().await.is_err());
        // 首次tick立即触发
        let checked = orchestrator_testing_utils::wait_until(Duration::from_secs(1), || async {
            probe.calls() >= 2
        })
        .await;
        assert!(checked);
        checker.stop().await;
    }
}
