#![doc = r#"
# relaynet-proxy

## 设计动机（Why）
- 在服务端执行模型之上组合出一个透明转发代理：每条入站连接由 [`Router`] 决定后端，
  代理拨号后把两条连接交给 [`RelayAction`]，默认动作 [`relay_data`] 原样双向复制字节。

## 核心契约（What）
- 路由返回 `None` 或后端拨号耗尽重试时，入站连接直接走正常的收尾流程关闭，
  不会打开任何出站连接；
- 出站连接在转发动作返回后一定被关闭；
- [`Proxy::run`] 只在应用没有设置任何数据钩子时安装默认转发。

## 实现策略（How）
- 后端客户端按目标类型选择 TCP/UDP/Unix 实现，强制重连最多 3 次；
- 默认转发中主任务复制“入站 → 出站”，以便客户端断开时立即察觉；
  后台任务复制“出站 → 入站”，后端结束时半关闭入站写方向。

## 风险与考量（Trade-offs）
- UDP 入站只有一个逻辑会话，代理在同一时刻只能转发一个对端。
"#]

mod proxy;
mod relay;
mod router;

pub use proxy::Proxy;
pub use relay::{RelayAction, RelayStats, relay_action, relay_data};
pub use router::{RELAY_DIAL_TIMEOUT_SECS, RelayTarget, Relayer, Router};
