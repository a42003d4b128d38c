#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use orchestrator_core::config::{HealthConfig, TaskManagerConfig};
    use orchestrator_core::models::{NodeStatus, ProbeStatus, TaskStatus};
    use orchestrator_core::traits::{NodeFailureHandler, TaskRepository};
    use orchestrator_core::OrchestratorError;
    use orchestrator_dispatcher::failover::FailoverCoordinator;
    use orchestrator_dispatcher::health_checker::{HealthChecker, HealthRegistry};
    use orchestrator_dispatcher::node_manager::NodeManager;
    use orchestrator_dispatcher::task_manager::TaskManager;
    use orchestrator_infrastructure::{InMemoryNodeRepository, InMemoryTaskRepository};
    use orchestrator_testing_utils::{MockDispatcher, NodeBuilder, StaticProbe, TaskBuilder};

    struct Cluster {
        registry: HealthRegistry,
        nodes: Arc<NodeManager>,
        tasks: Arc<TaskManager>,
        repo: InMemoryTaskRepository,
        failover: Arc<FailoverCoordinator>,
    }

    async fn cluster() -> Cluster {
        let registry = HealthRegistry::new(10);
        let nodes = Arc::new(NodeManager::new(
            Arc::new(InMemoryNodeRepository::new()),
            registry.clone(),
        ));
        nodes.register_node(NodeBuilder::manager("m").build()).await.unwrap();
        nodes.register_node(NodeBuilder::worker("w1").build()).await.unwrap();

        let repo = InMemoryTaskRepository::new();
        let tasks = Arc::new(TaskManager::new(
            Arc::new(repo.clone()),
            Arc::clone(&nodes),
            Arc::new(MockDispatcher::new()),
            TaskManagerConfig::default(),
            Duration::from_secs(5),
        ));
        let failover = Arc::new(FailoverCoordinator::new(
            Arc::clone(&nodes),
            Arc::clone(&tasks),
        ));
        Cluster {
            registry,
            nodes,
            tasks,
            repo,
            failover,
        }
    }

    async fn seed_running(c: &Cluster, id: &str, node_id: &str) {
        c.repo
            .insert(
                TaskBuilder::new()
                    .with_id(id)
                    .with_status(TaskStatus::Running)
                    .on_node(node_id)
                    .build(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_node_failure_restarts_running_tasks() {
        let c = cluster().await;
        seed_running(&c, "a", "w1").await;
        seed_running(&c, "b", "w1").await;
        seed_running(&c, "other", "m").await;

        let report = c.failover.handle_node_failure("w1").await.unwrap();
        assert!(!report.already_handled);
        assert_eq!(report.restarted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.replacements.len(), 2);
        assert!(report.errors.is_empty());

        assert_eq!(c.nodes.get_node("w1").await.unwrap().status, NodeStatus::Down);
        for id in ["a", "b"] {
            let original = c.tasks.get_task(id).await.unwrap();
            assert_eq!(original.desired_state, TaskStatus::Complete);
            assert_eq!(original.status, TaskStatus::Orphaned);
        }
        for id in &report.replacements {
            let replacement = c.tasks.get_task(id).await.unwrap();
            assert!(matches!(replacement.status, TaskStatus::New | TaskStatus::Pending));
            assert!(replacement.node_id.is_empty());
        }

        let untouched = c.tasks.get_task("other").await.unwrap();
        assert_eq!(untouched.status, TaskStatus::Running);
        assert_eq!(c.tasks.list_tasks().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_repeated_failure_is_noop_until_recovery() {
        let c = cluster().await;
        seed_running(&c, "a", "w1").await;

        let first = c.failover.handle_node_failure("w1").await.unwrap();
        assert_eq!(first.restarted.len(), 1);
        assert!(c.failover.is_marked("w1").await);

        let second = c.failover.handle_node_failure("w1").await.unwrap();
        assert!(second.already_handled);
        assert!(second.restarted.is_empty());
        assert_eq!(c.tasks.list_tasks().await.unwrap().len(), 2);

        c.failover.handle_node_recovery("w1").await.unwrap();
        assert!(!c.failover.is_marked("w1").await);

        seed_running(&c, "b", "w1").await;
        let third = c.failover.handle_node_failure("w1").await.unwrap();
        assert!(!third.already_handled);
        assert_eq!(third.restarted, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_manual_activation_rearms_failover() {
        let c = cluster().await;
        seed_running(&c, "a", "w1").await;

        let first = c.failover.handle_node_failure("w1").await.unwrap();
        assert_eq!(first.restarted, vec!["a".to_string()]);

        c.nodes.activate_node("w1").await.unwrap();
        assert!(!c.failover.is_marked("w1").await);

        seed_running(&c, "later", "w1").await;
        let second = c.failover.handle_node_failure("w1").await.unwrap();
        assert!(!second.already_handled);
        assert_eq!(second.restarted, vec!["later".to_string()]);

        let later = c.tasks.get_task("later").await.unwrap();
        assert_eq!(later.status, TaskStatus::Orphaned);
        assert_eq!(later.desired_state, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn test_reregistration_rearms_failover() {
        let c = cluster().await;
        c.failover.handle_node_failure("w1").await.unwrap();
        assert!(c.failover.is_marked("w1").await);

        c.nodes.register_node(NodeBuilder::worker("w1").build()).await.unwrap();
        assert!(!c.failover.is_marked("w1").await);

        seed_running(&c, "b", "w1").await;
        let report = c.failover.handle_node_failure("w1").await.unwrap();
        assert_eq!(report.restarted, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_tasks_stay_consistent_after_failover() {
        let c = cluster().await;
        seed_running(&c, "a", "w1").await;
        seed_running(&c, "b", "m").await;

        c.failover.handle_node_failure("w1").await.unwrap();
        for task in c.tasks.list_tasks().await.unwrap() {
            assert!(task.placement_consistent(), "task {} inconsistent", task.id);
        }
    }

    #[tokio::test]
    async fn test_failure_of_unknown_node() {
        let c = cluster().await;
        let err = c.failover.handle_node_failure("ghost").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NodeNotFound { .. }));
        assert!(!c.failover.is_marked("ghost").await);
    }

    #[tokio::test]
    async fn test_health_check_drives_failover() {
        let c = cluster().await;
        seed_running(&c, "a", "w1").await;

        let probe = StaticProbe::passing("api_connectivity");
        probe.set_node_status("w1", ProbeStatus::Failed);
        let checker = HealthChecker::new(
            Arc::clone(&c.nodes),
            c.registry.clone(),
            vec![Arc::new(probe.clone())],
            Arc::clone(&c.failover) as Arc<dyn NodeFailureHandler>,
            HealthConfig::default(),
        );

        checker.check_all_nodes().await;
        assert_eq!(c.tasks.get_task("a").await.unwrap().status, TaskStatus::Orphaned);
        assert!(c.failover.is_marked("w1").await);

        checker.check_all_nodes().await;
        assert_eq!(c.tasks.list_tasks().await.unwrap().len(), 2);

        probe.set_node_status("w1", ProbeStatus::Passed);
        checker.check_all_nodes().await;
        assert_eq!(c.nodes.get_node("w1").await.unwrap().status, NodeStatus::Ready);
        assert!(!c.failover.is_marked("w1").await);
    }
}
