//! # 会话（Session）
//!
//! ## 核心意图（Why）
//! - 每条连接在接受或拨号时获得一个进程内唯一、按创建时刻排序的标识，
//!   注册表据此判断同一业务键下的旧连接是否已被新连接取代（override）；
//! - 会话同时提供一个仅属于该连接的键值存储，供应用在钩子之间传递状态。
//!
//! ## 生命周期（What）
//! - 创建：随 [`Connection`](crate::Connection) 一起构造；
//! - 失效：连接关闭时调用 [`Session::clear`]，清空存储并把标识置空，之后永不复用。

use std::{any::Any, fmt, sync::Arc};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// 会话存储中的值。
pub type SessionValue = Arc<dyn Any + Send + Sync>;

static LAST_ID: Mutex<u128> = Mutex::new(0);

/// 生成全局唯一、按时间排序的 128 位标识。
///
/// 基于 UUIDv7（毫秒时间戳 + 随机位），以 32 位小写十六进制输出，
/// 字典序即创建顺序。同一进程内严格递增：若时钟回拨或同一毫秒内随机位
/// 未能保证递增，则取上一个标识加一。
pub fn new_session_id() -> String {
    let candidate = Uuid::now_v7().as_u128();
    let mut last = LAST_ID.lock();
    let next = if candidate > *last {
        candidate
    } else {
        last.wrapping_add(1)
    };
    *last = next;
    Uuid::from_u128(next).simple().to_string()
}

/// 单条连接的身份与键值存储。
pub struct Session {
    id: RwLock<String>,
    data: DashMap<String, SessionValue>,
}

impl Session {
    /// 创建带新标识的空会话。
    pub fn new() -> Self {
        Self {
            id: RwLock::new(new_session_id()),
            data: DashMap::new(),
        }
    }

    /// 当前标识；会话失效后返回空字符串。
    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    /// 会话是否仍然有效。
    pub fn is_valid(&self) -> bool {
        !self.id.read().is_empty()
    }

    /// 写入数据，覆盖同名键。
    pub fn put<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.data.insert(key.into(), Arc::new(value));
    }

    /// 读取数据，可能不存在。
    pub fn get(&self, key: &str) -> Option<SessionValue> {
        self.data.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 读取并按类型克隆数据；类型不符时返回 `None`。
    pub fn get_as<V>(&self, key: &str) -> Option<V>
    where
        V: Any + Clone,
    {
        self.get(key)
            .and_then(|value| value.downcast_ref::<V>().cloned())
    }

    /// 读取字符串数据，缺失或类型不符时返回空串。
    pub fn get_string(&self, key: &str) -> String {
        self.get_as::<String>(key)
            .or_else(|| self.get_as::<&'static str>(key).map(str::to_owned))
            .unwrap_or_default()
    }

    /// 存储的条目数。
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 存储是否为空。
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 清空存储并使标识失效。
    pub fn clear(&self) {
        self.id.write().clear();
        self.data.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &*self.id.read())
            .field("entries", &self.data.len())
            .finish()
    }
}
