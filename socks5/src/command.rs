use std::time::Instant;

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dialer::{Dialer, ProxyStream};
use crate::error::{Error, Result};
use crate::protocol::{self, Command, Endpoint, CONNECT_REPLY, RESERVED, SOCKS_VERSION};
use crate::session::StageClock;

/// 命令阶段成功后得到的目标连接
pub struct Connected {
    pub endpoint: Endpoint,
    pub target: Box<dyn ProxyStream>,
    /// 转发建立阶段（写成功应答、启动转发任务）的起点
    pub setup_started: Instant,
}

/// 读取命令头 `05 CMD 00` 并分发。
///
/// 头部格式错误、读不满 3 字节或命令不是 CONNECT 时返回 [`Error::Command`]，
/// 此时不会再读取任何地址字节。
pub async fn handle_command<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    dialer: &dyn Dialer,
    clock: &StageClock,
) -> Result<Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    buf.clear();
    buf.resize(3, 0);
    if stream.read_exact(&mut buf[..]).await.is_err()
        || buf[0] != SOCKS_VERSION
        || buf[2] != RESERVED
    {
        return Err(Error::Command);
    }

    match Command::try_from(buf[1])? {
        Command::Connect => connect(stream, buf, dialer, clock).await,
    }
}

async fn connect<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    dialer: &dyn Dialer,
    clock: &StageClock,
) -> Result<Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let endpoint = protocol::read_endpoint(stream, buf).await?;
    clock.finish("地址接收", started);
    info!("[{}] 目标地址: {}", clock.id(), endpoint);

    let started = Instant::now();
    let target = match dialer.dial(&endpoint.to_string()).await {
        Ok(target) => target,
        Err(e) => {
            warn!("[{}] 连接目标 {} 失败: {}", clock.id(), endpoint, e);
            return Err(e.into());
        }
    };
    clock.finish("连接目标", started);
    debug!("[{}] 已连接到 {}", clock.id(), endpoint);

    let setup_started = Instant::now();
    stream.write_all(&CONNECT_REPLY).await?;
    stream.flush().await?;

    Ok(Connected {
        endpoint,
        target,
        setup_started,
    })
}
