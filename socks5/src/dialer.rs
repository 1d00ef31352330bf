use std::io;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// 可双向读写的字节流，目标连接统一装箱成这个类型
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ProxyStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// 出站拨号能力：给定 `host:port`，返回已连接的流或 IO 错误。
///
/// 同一个实例会被所有会话并发调用，实现里不能保存会话相关的状态。
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &str) -> io::Result<Box<dyn ProxyStream>>;
}

/// 默认实现：直接发起 TCP 连接
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, endpoint: &str) -> io::Result<Box<dyn ProxyStream>> {
        let stream = TcpStream::connect(endpoint).await?;
        debug!("直连 {} 成功, 本地地址 {:?}", endpoint, stream.local_addr());
        Ok(Box::new(stream))
    }
}
