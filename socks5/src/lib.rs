//! 最小化的 SOCKS5 代理：只支持无认证、CONNECT 命令和域名目标地址。
//!
//! 每个入站连接对应一个 [`ConnectionSession`]，依次执行握手、命令解析、
//! 拨号和双向转发；任何一步出错都直接关闭连接，不回失败应答。

pub mod command;
pub mod config;
pub mod dialer;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_util;

pub use config::Config;
pub use dialer::{Dialer, DirectDialer, ProxyStream};
pub use error::{Error, Result};
pub use protocol::Endpoint;
pub use relay::{Direction, Relay, RelayStats, TerminationSignal};
pub use server::Server;
pub use session::{ConnectionSession, SessionState, StageClock};
