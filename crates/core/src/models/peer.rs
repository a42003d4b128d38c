use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 对等节点状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Active,
    Inactive,
}

/// 服务发现中的对等节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Peer {
    pub id: String,
    pub address: String,
    pub last_seen: DateTime<Utc>,
    pub status: PeerStatus,
    #[serde(default)]
    pub version: String,
}

impl Peer {
    /// 以地址派生ID创建对等节点
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            id: Self::id_for(&address),
            address,
            last_seen: Utc::now(),
            status: PeerStatus::Active,
            version: String::new(),
        }
    }

    pub fn id_for(address: &str) -> String {
        format!("peer-{}", address.replace([':', '.', '/'], "-"))
    }

    /// 距离上次心跳是否已超过阈值
    pub fn is_stale(&self, now: DateTime<Utc>, threshold_seconds: i64) -> bool {
        (now - self.last_seen).num_seconds() > threshold_seconds
    }
}

/// 心跳消息，由传输层转发给各对等节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub source: String,
    pub cluster_name: String,
    pub timestamp: DateTime<Utc>,
    pub peer_count: usize,
}
