//! # 连接注册表
//!
//! ## 角色定位（Why）
//! - 以应用选定的键（通常是设备标识）索引连接，供下行推送按键查找，
//!   并在同一设备重连时识别旧连接；
//! - 注册表是唯一在多个任务间无外部加锁共享、可变的数据结构，
//!   因此直接建立在 `DashMap` 之上，读写与遍历都无需调用方持锁。
//!
//! ## 契约（What）
//! - 同一键同一时刻至多存放一条连接，`save` 覆盖旧值；
//! - 条目数由映射本身给出，不另设计数器；
//! - `is_override` 是“先读后判”，与随后的 `save` 不构成原子操作：两个任务并发登记
//!   同一键时可能都通过检查，导致其中一条旧连接未被驱逐。调用方只能把
//!   “驱逐后登记”视为尽力而为。
//!
//! ## 注意事项（Trade-offs）
//! - 任何方法都不会在持有分片锁时等待异步操作：遍历先取快照，清理先移除再关闭。

use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::conn::Connection;

/// 应用键到连接的并发目录。
#[derive(Debug, Default)]
pub struct Registry {
    conns: DashMap<String, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, key: &str) -> Option<Arc<Connection>> {
        self.conns.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 以 `key` 登记连接，覆盖旧值；空键被拒绝并返回 `false`。
    pub fn save(&self, key: impl Into<String>, conn: Arc<Connection>) -> bool {
        let key = key.into();
        if key.is_empty() {
            return false;
        }
        debug!(%key, sid = %conn.session_id(), "registry save");
        self.conns.insert(key, conn);
        true
    }

    pub fn delete(&self, key: &str) -> Option<Arc<Connection>> {
        self.conns.remove(key).map(|(_, conn)| conn)
    }

    /// 仅当 `key` 下存放的正是 `conn` 时删除，避免旧连接收尾时误删取代它的新连接。
    pub fn remove_if_same(&self, key: &str, conn: &Arc<Connection>) -> bool {
        self.conns
            .remove_if(key, |_, stored| Arc::ptr_eq(stored, conn))
            .is_some()
    }

    /// 依次访问每个条目，访问者返回 `false` 时提前结束。
    pub fn each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Arc<Connection>) -> bool,
    {
        let snapshot: Vec<(String, Arc<Connection>)> = self
            .conns
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        for (key, conn) in &snapshot {
            if !visit(key, conn) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// `key` 下已有条目且其会话标识与 `candidate` 不同时返回 `true`。
    pub fn is_override(&self, key: &str, candidate: &Connection) -> bool {
        match self.load(key) {
            Some(old) => old.session_id() != candidate.session_id(),
            None => false,
        }
    }

    /// 若 `key` 下是一条被 `candidate` 取代的旧连接，则移除并关闭它。
    ///
    /// 返回被驱逐的连接。与随后的 `save` 不是原子的。
    pub async fn evict_override(
        &self,
        key: &str,
        candidate: &Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        if !self.is_override(key, candidate) {
            return None;
        }
        let sid = candidate.session_id();
        let (_, stale) = self.conns.remove_if(key, |_, stored| {
            !Arc::ptr_eq(stored, candidate) && stored.session_id() != sid
        })?;
        info!(%key, stale = %stale.session_id(), fresh = %sid, "evicting overridden connection");
        if let Err(err) = stale.close().await {
            debug!(%key, error = %err, "close of overridden connection failed");
        }
        Some(stale)
    }

    /// 移除全部条目并对每条连接执行 `closer`，用于服务端停止。
    pub async fn cleanup<F, Fut>(&self, closer: F)
    where
        F: Fn(Arc<Connection>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let keys: Vec<String> = self.conns.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, conn)) = self.conns.remove(&key) {
                closer(conn).await;
            }
        }
    }

    /// 以 [`Connection::close`] 作为关闭动作执行 [`Registry::cleanup`]。
    pub async fn cleanup_default(&self) {
        self.cleanup(|conn| async move {
            if let Err(err) = conn.close().await {
                debug!(error = %err, "close during cleanup failed");
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::NetStream;
    use tokio::net::UdpSocket;

    async fn udp_conn() -> Arc<Connection> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        Arc::new(
            Connection::new(NetStream::Udp {
                socket,
                connected: false,
            })
            .expect("wrap"),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_saves_leave_one_of_the_writers() {
        let registry = Arc::new(Registry::new());
        let mut conns = Vec::new();
        for _ in 0..16 {
            conns.push(udp_conn().await);
        }
        let tasks: Vec<_> = conns
            .iter()
            .cloned()
            .map(|conn| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.save("dev-1", conn) })
            })
            .collect();
        for task in tasks {
            assert!(task.await.expect("join"));
        }
        let stored = registry.load("dev-1").expect("stored");
        assert!(conns.iter().any(|conn| Arc::ptr_eq(conn, &stored)));
        assert_eq!(registry.len(), 1);

        registry.delete("dev-1");
        assert!(registry.load("dev-1").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_key_is_refused() {
        let registry = Registry::new();
        assert!(!registry.save("", udp_conn().await));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn override_compares_session_ids() {
        let registry = Registry::new();
        let old = udp_conn().await;
        let fresh = udp_conn().await;
        assert!(!registry.is_override("dev", &fresh));

        registry.save("dev", Arc::clone(&old));
        assert!(registry.is_override("dev", &fresh));
        assert!(!registry.is_override("dev", &old));

        let evicted = registry.evict_override("dev", &fresh).await.expect("evicted");
        assert!(Arc::ptr_eq(&evicted, &old));
        assert!(!old.is_active());
        assert!(registry.load("dev").is_none());
        assert!(registry.evict_override("dev", &fresh).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_if_same_keeps_newer_owner() {
        let registry = Registry::new();
        let old = udp_conn().await;
        let fresh = udp_conn().await;
        registry.save("dev", Arc::clone(&fresh));
        assert!(!registry.remove_if_same("dev", &old));
        assert!(registry.remove_if_same("dev", &fresh));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn each_stops_early_and_cleanup_closes_all() {
        let registry = Registry::new();
        let mut conns = Vec::new();
        for i in 0..4 {
            let conn = udp_conn().await;
            registry.save(format!("k{i}"), Arc::clone(&conn));
            conns.push(conn);
        }
        let mut visited = 0;
        registry.each(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);

        registry.cleanup_default().await;
        assert!(registry.is_empty());
        assert!(conns.iter().all(|conn| !conn.is_active()));
    }
}
