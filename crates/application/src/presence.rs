//! 在线注册表：用户身份到存活连接集合的并发安全映射。
//!
//! 同一个用户可以有多条并发连接（多设备），每条连接持有一个
//! 有界的出站通道。锁只保护映射本身，入队用 `try_send`，
//! 任何情况下都不会在持锁时阻塞在 I/O 上。

use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// 出站通道容量，对应每连接 256 帧的缓冲。
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// 一次成功注册的结果。
pub struct Registration {
    pub connection_id: ConnectionId,
    /// 该连接专属的出站帧接收端，由连接的写任务独占消费。
    pub receiver: mpsc::Receiver<String>,
    /// 这是不是该用户的第一条存活连接（离线→在线跃迁）。
    pub first_for_user: bool,
}

#[derive(Default)]
struct RegistryInner {
    /// 连接归属，unregister 只拿 ConnectionId 时靠它定位用户。
    owners: HashMap<ConnectionId, UserId>,
    /// 每个用户的存活连接集合。
    connections: HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<String>>>,
    /// 因逐出而离线、但还没有人广播过下线事件的用户。
    /// 被逐出连接的生命周期收尾通过 `claim_offline` 领取。
    pending_offline: HashSet<UserId>,
}

pub struct PresenceRegistry {
    inner: RwLock<RegistryInner>,
    capacity: usize,
}

impl PresenceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// 登记一条新连接，永不阻塞业务逻辑。
    pub async fn register(&self, user_id: UserId) -> Registration {
        let connection_id = ConnectionId::generate();
        let (sender, receiver) = mpsc::channel(self.capacity);

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        // 重连撤销尚未广播的离线跃迁
        inner.pending_offline.remove(&user_id);
        let user_connections = inner.connections.entry(user_id).or_default();
        let first_for_user = user_connections.is_empty();
        user_connections.insert(connection_id, sender);
        inner.owners.insert(connection_id, user_id);
        let total = user_connections.len();
        drop(guard);

        info!(%user_id, %connection_id, connections = total, "connection registered");
        Registration {
            connection_id,
            receiver,
            first_for_user,
        }
    }

    /// 移除恰好一条连接；重复调用是无害的空操作。
    /// 返回 true 表示该用户因此转为离线（最后一条连接消失）。
    pub async fn unregister(&self, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(user_id) = inner.owners.remove(&connection_id) else {
            return false;
        };
        let went_offline = match inner.connections.get_mut(&user_id) {
            Some(user_connections) => {
                user_connections.remove(&connection_id);
                if user_connections.is_empty() {
                    inner.connections.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };
        drop(inner);

        info!(%user_id, %connection_id, went_offline, "connection unregistered");
        went_offline
    }

    /// 给某个用户的每一条存活连接入队一帧。
    ///
    /// 没有连接时事件直接丢弃（离线用户靠历史查询补课）。
    /// 通道满或已关闭的连接被视为不可用，逐出注册表，
    /// 绝不为慢消费者阻塞对其他接收者的扇出。
    pub async fn send(&self, user_id: UserId, frame: &str) -> usize {
        let mut delivered = 0usize;
        let mut stale: Vec<ConnectionId> = Vec::new();

        {
            let inner = self.inner.read().await;
            let Some(user_connections) = inner.connections.get(&user_id) else {
                return 0;
            };
            for (connection_id, sender) in user_connections {
                match sender.try_send(frame.to_owned()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%user_id, %connection_id, "outbound channel full, evicting connection");
                        stale.push(*connection_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(%user_id, %connection_id, "outbound channel closed, evicting connection");
                        stale.push(*connection_id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            for connection_id in stale {
                let Some(owner) = inner.owners.remove(&connection_id) else {
                    continue;
                };
                if let Some(user_connections) = inner.connections.get_mut(&owner) {
                    user_connections.remove(&connection_id);
                    if user_connections.is_empty() {
                        inner.connections.remove(&owner);
                        // 最后一条连接被逐出也是一次离线跃迁，
                        // 记下来等生命周期收尾领取并广播
                        inner.pending_offline.insert(owner);
                        warn!(%owner, %connection_id, "evicted last connection, offline pending");
                    }
                }
            }
        }
        delivered
    }

    /// 领取一次因逐出产生的离线跃迁。对同一次跃迁恰好有
    /// 一个调用者拿到 true，其余拿到 false。
    pub async fn claim_offline(&self, user_id: UserId) -> bool {
        self.inner.write().await.pending_offline.remove(&user_id)
    }

    /// 用户当前是否至少有一条存活连接。
    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.connections.contains_key(&user_id)
    }

    /// 当前在线用户集合，用于状态广播。
    pub async fn snapshot(&self) -> Vec<UserId> {
        self.inner.read().await.connections.keys().copied().collect()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn uid() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    #[tokio::test]
    async fn user_stays_online_until_last_connection_gone() {
        let registry = PresenceRegistry::default();
        let user = uid();

        let first = registry.register(user).await;
        let second = registry.register(user).await;
        assert!(first.first_for_user);
        assert!(!second.first_for_user);
        assert!(registry.is_online(user).await);

        assert!(!registry.unregister(first.connection_id).await);
        assert!(registry.is_online(user).await);

        assert!(registry.unregister(second.connection_id).await);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = PresenceRegistry::default();
        let registration = registry.register(uid()).await;
        assert!(registry.unregister(registration.connection_id).await);
        assert!(!registry.unregister(registration.connection_id).await);
        assert!(!registry.unregister(ConnectionId::generate()).await);
    }

    #[tokio::test]
    async fn send_reaches_every_connection_of_the_user() {
        let registry = PresenceRegistry::default();
        let user = uid();
        let mut first = registry.register(user).await;
        let mut second = registry.register(user).await;

        assert_eq!(registry.send(user, "hello").await, 2);
        assert_eq!(first.receiver.recv().await.unwrap(), "hello");
        assert_eq!(second.receiver.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_to_offline_user_is_dropped() {
        let registry = PresenceRegistry::default();
        assert_eq!(registry.send(uid(), "gone").await, 0);
    }

    #[tokio::test]
    async fn full_channel_evicts_only_the_slow_connection() {
        let registry = PresenceRegistry::new(1);
        let user = uid();
        let slow = registry.register(user).await;
        let mut fast = registry.register(user).await;

        // slow 的通道容量 1，第一帧填满，第二帧触发逐出
        assert_eq!(registry.send(user, "one").await, 2);
        assert_eq!(fast.receiver.recv().await.unwrap(), "one");
        assert_eq!(registry.send(user, "two").await, 1);
        assert_eq!(fast.receiver.recv().await.unwrap(), "two");

        // slow 被逐出后用户依旧在线（fast 还活着），没有离线跃迁可领
        assert!(registry.is_online(user).await);
        assert!(!registry.claim_offline(user).await);
        assert!(!registry.unregister(slow.connection_id).await);
        assert!(registry.unregister(fast.connection_id).await);
    }

    #[tokio::test]
    async fn evicting_last_connection_leaves_claimable_offline_transition() {
        let registry = PresenceRegistry::new(1);
        let user = uid();
        let only = registry.register(user).await;

        assert_eq!(registry.send(user, "one").await, 1);
        // 通道已满，第二帧逐出最后一条连接
        assert_eq!(registry.send(user, "two").await, 0);
        assert!(!registry.is_online(user).await);

        // 注销已经扑空，离线跃迁改由领取机制交付，且只交付一次
        assert!(!registry.unregister(only.connection_id).await);
        assert!(registry.claim_offline(user).await);
        assert!(!registry.claim_offline(user).await);
    }

    #[tokio::test]
    async fn reconnect_cancels_pending_offline_claim() {
        let registry = PresenceRegistry::new(1);
        let user = uid();
        let _evicted = registry.register(user).await;
        registry.send(user, "one").await;
        registry.send(user, "two").await;

        let fresh = registry.register(user).await;
        assert!(fresh.first_for_user);
        // 用户已经重新上线，旧的离线跃迁作废
        assert!(!registry.claim_offline(user).await);
    }

    #[tokio::test]
    async fn frames_arrive_in_enqueue_order() {
        let registry = PresenceRegistry::default();
        let user = uid();
        let mut registration = registry.register(user).await;

        for i in 0..10 {
            registry.send(user, &format!("frame-{i}")).await;
        }
        for i in 0..10 {
            assert_eq!(registration.receiver.recv().await.unwrap(), format!("frame-{i}"));
        }
    }

    #[tokio::test]
    async fn snapshot_lists_distinct_online_users() {
        let registry = PresenceRegistry::default();
        let (a, b) = (uid(), uid());
        registry.register(a).await;
        registry.register(a).await;
        registry.register(b).await;

        let mut online = registry.snapshot().await;
        online.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(online, expected);
    }
}
