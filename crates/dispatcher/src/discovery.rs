use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use orchestrator_core::config::{DiscoveryConfig, DiscoveryMode};
use orchestrator_core::models::{Heartbeat, Peer, PeerStatus};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::lifecycle::{shutdown_requested, LoopLifecycle};

/// 服务发现
///
/// 维护对等节点表：按模式初始化种子节点，周期广播心跳，并把长时间未收到心跳的节点标记为inactive。
/// 心跳消息发布在广播通道上，由传输层订阅后转发。
pub struct DiscoveryService {
    config: DiscoveryConfig,
    local_id: String,
    cluster_name: String,
    peers: Arc<RwLock<HashMap<String, Peer>>>,
    heartbeat_tx: broadcast::Sender<Heartbeat>,
    lifecycle: LoopLifecycle,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig, local_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        let (heartbeat_tx, _) = broadcast::channel(64);
        Self {
            config,
            local_id: local_id.into(),
            cluster_name: cluster_name.into(),
            peers: Arc::new(RwLock::new(HashMap::new())),
            heartbeat_tx,
            lifecycle: LoopLifecycle::new(),
        }
    }

    /// 按发现模式初始化对等节点表
    pub async fn initialize(&self, extra_endpoints: &[String]) -> OrchestratorResult<()> {
        match self.config.mode {
            DiscoveryMode::Static => {
                for endpoint in self.config.endpoints.iter().chain(extra_endpoints) {
                    self.add_peer(endpoint).await?;
                }
                info!("静态服务发现初始化完成，对等节点 {} 个", self.peers.read().await.len());
                Ok(())
            }
            DiscoveryMode::Dns => Err(OrchestratorError::NotImplemented(
                "DNS服务发现".to_string(),
            )),
            DiscoveryMode::Token => Err(OrchestratorError::NotImplemented(
                "令牌服务发现".to_string(),
            )),
        }
    }

    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        let heartbeat = Arc::clone(self);
        let sweeper = Arc::clone(self);
        self.lifecycle
            .start("DiscoveryService", move |shutdown_rx| {
                let mut heartbeat_shutdown = shutdown_rx.clone();
                let mut sweep_shutdown = shutdown_rx;
                vec![
                    tokio::spawn(async move {
                        let mut interval = tokio::time::interval(Duration::from_secs(
                            heartbeat.config.heartbeat_interval_seconds,
                        ));
                        loop {
                            tokio::select! {
                                _ = interval.tick() => {
                                    heartbeat.broadcast_heartbeat().await;
                                }
                                _ = shutdown_requested(&mut heartbeat_shutdown) => break,
                            }
                        }
                    }),
                    tokio::spawn(async move {
                        let mut interval = tokio::time::interval(Duration::from_secs(
                            sweeper.config.sweep_interval_seconds,
                        ));
                        loop {
                            tokio::select! {
                                _ = interval.tick() => {
                                    sweeper.sweep_stale_peers(Utc::now()).await;
                                }
                                _ = shutdown_requested(&mut sweep_shutdown) => break,
                            }
                        }
                    }),
                ]
            })
            .await
    }

    pub async fn stop(&self) {
        self.lifecycle.stop("DiscoveryService").await;
    }

    /// 添加对等节点，已存在时刷新心跳时间
    pub async fn add_peer(&self, address: &str) -> OrchestratorResult<Peer> {
        let address = address.trim();
        if address.is_empty() {
            return Err(OrchestratorError::Validation(
                "对等节点地址不能为空".to_string(),
            ));
        }
        let mut peers = self.peers.write().await;
        let peer = peers
            .entry(Peer::id_for(address))
            .and_modify(|p| {
                p.last_seen = Utc::now();
                p.status = PeerStatus::Active;
            })
            .or_insert_with(|| Peer::new(address))
            .clone();
        info!("添加对等节点: {} ({})", peer.id, peer.address);
        Ok(peer)
    }

    pub async fn remove_peer(&self, peer_id: &str) -> OrchestratorResult<Peer> {
        let removed = self
            .peers
            .write()
            .await
            .remove(peer_id)
            .ok_or_else(|| OrchestratorError::PeerNotFound {
                id: peer_id.to_string(),
            })?;
        info!("移除对等节点: {}", peer_id);
        Ok(removed)
    }

    /// 所有对等节点，按ID排序
    pub async fn list_peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().await.values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// 记录收到的心跳，重新激活对等节点
    pub async fn record_heartbeat(&self, peer_id: &str) -> OrchestratorResult<Peer> {
        let mut peers = self.peers.write().await;
        let peer = peers
            .get_mut(peer_id)
            .ok_or_else(|| OrchestratorError::PeerNotFound {
                id: peer_id.to_string(),
            })?;
        if peer.status == PeerStatus::Inactive {
            info!("对等节点 {} 重新活跃", peer_id);
        }
        peer.last_seen = Utc::now();
        peer.status = PeerStatus::Active;
        Ok(peer.clone())
    }

    pub fn subscribe_heartbeats(&self) -> broadcast::Receiver<Heartbeat> {
        self.heartbeat_tx.subscribe()
    }

    /// 广播一次心跳
    pub async fn broadcast_heartbeat(&self) -> Heartbeat {
        let heartbeat = Heartbeat {
            source: self.local_id.clone(),
            cluster_name: self.cluster_name.clone(),
            timestamp: Utc::now(),
            peer_count: self.peers.read().await.len(),
        };
        if self.heartbeat_tx.send(heartbeat.clone()).is_err() {
            debug!("没有心跳订阅者");
        }
        heartbeat
    }

    /// 将超过阈值未收到心跳的对等节点标记为inactive，返回本次新标记的ID
    pub async fn sweep_stale_peers(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut peers = self.peers.write().await;
        let mut newly_inactive = Vec::new();
        for peer in peers.values_mut() {
            if peer.status == PeerStatus::Active
                && peer.is_stale(now, self.config.stale_threshold_seconds)
            {
                warn!("对等节点 {} 超过 {} 秒未响应，标记为inactive", peer.id, self.config.stale_threshold_seconds);
                peer.status = PeerStatus::Inactive;
                newly_inactive.push(peer.id.clone());
            }
        }
        newly_inactive.sort();
        newly_inactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn service(mode: DiscoveryMode, endpoints: &[&str]) -> DiscoveryService {
        let config = DiscoveryConfig {
            mode,
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        DiscoveryService::new(config, "local", "test-cluster")
    }

    #[tokio::test]
    async fn test_static_seeding() {
        let discovery = service(DiscoveryMode::Static, &["10.0.0.2:2377", "10.0.0.3:2377"]);
        discovery
            .initialize(&["10.0.0.4:2377".to_string()])
            .await
            .unwrap();
        assert_eq!(discovery.list_peers().await.len(), 3);
    }

    #[tokio::test]
    async fn test_unimplemented_modes() {
        for mode in [DiscoveryMode::Dns, DiscoveryMode::Token] {
            let err = service(mode, &[]).initialize(&[]).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::NotImplemented(_)));
            assert_eq!(err.status_code(), 501);
        }
    }

    #[tokio::test]
    async fn test_add_remove_peer() {
        let discovery = service(DiscoveryMode::Static, &[]);
        let peer = discovery.add_peer("10.0.0.9:2377").await.unwrap();
        discovery.add_peer("10.0.0.9:2377").await.unwrap();
        assert_eq!(discovery.list_peers().await.len(), 1);

        discovery.remove_peer(&peer.id).await.unwrap();
        assert!(discovery.list_peers().await.is_empty());
        assert!(matches!(
            discovery.remove_peer(&peer.id).await.unwrap_err(),
            OrchestratorError::PeerNotFound { .. }
        ));
        assert!(discovery.add_peer("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_and_reactivate() {
        let discovery = service(DiscoveryMode::Static, &[]);
        let peer = discovery.add_peer("10.0.0.9:2377").await.unwrap();

        assert!(discovery.sweep_stale_peers(Utc::now()).await.is_empty());

        let later = Utc::now() + ChronoDuration::seconds(121);
        assert_eq!(discovery.sweep_stale_peers(later).await, vec![peer.id.clone()]);
        assert_eq!(discovery.list_peers().await[0].status, PeerStatus::Inactive);
        assert!(discovery.sweep_stale_peers(later).await.is_empty());

        discovery.record_heartbeat(&peer.id).await.unwrap();
        assert_eq!(discovery.list_peers().await[0].status, PeerStatus::Active);
    }

    #[tokio::test]
    async fn test_heartbeat_broadcast() {
        let discovery = service(DiscoveryMode::Static, &["10.0.0.2:2377"]);
        discovery.initialize(&[]).await.unwrap();
        let mut rx = discovery.subscribe_heartbeats();

        discovery.broadcast_heartbeat().await;
        let heartbeat = rx.recv().await.unwrap();
        assert_eq!(heartbeat.source, "local");
        assert_eq!(heartbeat.peer_count, 1);
    }
}
