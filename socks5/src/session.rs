use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::command;
use crate::dialer::{Dialer, ProxyStream};
use crate::error::{Error, Result};
use crate::handshake;
use crate::protocol::{Endpoint, SCRATCH_CAPACITY};
use crate::relay::{Relay, RelayStats};

/// 会话状态机。`Failed` 可从任何未结束的状态到达
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Authenticated,
    CommandParsed,
    Relaying,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 记录各阶段耗时，超过阈值时打告警日志，不做任何超时处理
#[derive(Debug, Clone)]
pub struct StageClock {
    id: String,
    slow: Duration,
}

impl StageClock {
    pub fn new(id: impl Into<String>, slow: Duration) -> Self {
        Self {
            id: id.into(),
            slow,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn finish(&self, stage: &str, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        if elapsed > self.slow {
            warn!("[{}] {} 耗时 {:?}", self.id, stage, elapsed);
        }
        elapsed
    }
}

/// 单个入站连接的完整生命周期：握手 -> 命令 -> 转发 -> 关闭
pub struct ConnectionSession<S> {
    client: Option<S>,
    buf: BytesMut,
    endpoint: Option<Endpoint>,
    target: Option<Box<dyn ProxyStream>>,
    dialer: Arc<dyn Dialer>,
    state: SessionState,
    clock: StageClock,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(client: S, dialer: Arc<dyn Dialer>, slow_stage: Duration) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            client: Some(client),
            buf: BytesMut::with_capacity(SCRATCH_CAPACITY),
            endpoint: None,
            target: None,
            dialer,
            state: SessionState::Start,
            clock: StageClock::new(id, slow_stage),
        }
    }

    pub fn id(&self) -> &str {
        self.clock.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// 运行整个会话。无论成功还是失败，返回前两条连接都已关闭。
    pub async fn run(&mut self) -> Result<RelayStats> {
        let result = self.drive().await;
        self.state = match &result {
            Ok(_) => SessionState::Closed,
            Err(_) => SessionState::Failed,
        };
        self.close().await;
        debug!("[{}] 会话结束, 状态 {}", self.id(), self.state);
        result
    }

    async fn drive(&mut self) -> Result<RelayStats> {
        let client = self.client.as_mut().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotConnected, "session already closed"))
        })?;

        let started = Instant::now();
        handshake::negotiate(client, &mut self.buf).await?;
        self.clock.finish("协商", started);
        self.state = SessionState::Authenticated;
        debug!("[{}] 握手成功", self.clock.id());

        let connected =
            command::handle_command(client, &mut self.buf, self.dialer.as_ref(), &self.clock)
                .await?;
        let setup_started = connected.setup_started;
        self.endpoint = Some(connected.endpoint);
        self.target = Some(connected.target);
        self.state = SessionState::CommandParsed;

        let (Some(client), Some(target)) = (self.client.take(), self.target.take()) else {
            return Err(Error::Io(io::ErrorKind::NotConnected.into()));
        };

        self.state = SessionState::Relaying;
        info!(
            "[{}] 开始转发 {}",
            self.clock.id(),
            self.endpoint.as_ref().map(|e| e.to_string()).unwrap_or_default()
        );

        let relay = Relay::spawn(client, target);
        let setup = self.clock.finish("转发建立", setup_started);
        debug!("[{}] 转发建立用时 {:?}", self.clock.id(), setup);

        let started = Instant::now();
        let stats = relay.wait(self.clock.id()).await?;
        info!(
            "[{}] 转发结束, 上行 {} 字节, 下行 {} 字节, {} 方向先结束, 用时 {:?}",
            self.clock.id(),
            stats.client_to_target,
            stats.target_to_client,
            stats.first_finished,
            started.elapsed()
        );
        Ok(stats)
    }

    /// 关闭会话仍持有的连接。可重复调用，第二次起不做任何事
    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.shutdown().await {
                debug!("[{}] 关闭客户端连接: {}", self.clock.id(), e);
            }
        }
        if let Some(mut target) = self.target.take() {
            if let Err(e) = target.shutdown().await {
                debug!("[{}] 关闭目标连接: {}", self.clock.id(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CONNECT_REPLY;
    use crate::test_util::{FailingDialer, PipeDialer};
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::time::timeout;

    const SLOW: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn end_to_end_connect_and_relay() {
        let dialer = Arc::new(PipeDialer::new());
        let (mut client, server_side) = duplex(1024);
        let mut session = ConnectionSession::new(server_side, dialer.clone(), SLOW);
        let session = tokio::spawn(async move {
            let result = session.run().await;
            (result, session.state(), session.endpoint().cloned())
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        client
            .write_all(&[
                0x05, 0x01, 0x00, 0x03, 0x07, 0x65, 0x78, 0x61, 0x2e, 0x63, 0x6f, 0x6d, 0x00,
                0x50,
            ])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, CONNECT_REPLY);
        assert_eq!(dialer.dialed(), vec!["exa.com:80".to_string()]);

        let mut target = dialer.take_peer().unwrap();
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut got = [0u8; 18];
        target.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"GET / HTTP/1.0\r\n\r\n");

        target.write_all(b"HTTP/1.0 200 OK").await.unwrap();
        let mut got = [0u8; 15];
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"HTTP/1.0 200 OK");

        drop(target);
        let (result, state, endpoint) = timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        let stats = result.unwrap();
        assert_eq!(stats.client_to_target, 18);
        assert_eq!(stats.target_to_client, 15);
        assert_eq!(state, SessionState::Closed);
        assert_eq!(endpoint.unwrap().to_string(), "exa.com:80");

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn stage_clock_measures_from_start() {
        let clock = StageClock::new("test", Duration::ZERO);
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let elapsed = clock.finish("转发建立", started);
        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!(clock.id(), "test");
    }

    #[tokio::test]
    async fn bad_greeting_closes_without_reply() {
        let dialer = Arc::new(PipeDialer::new());
        let (mut client, server_side) = duplex(64);
        let mut session = ConnectionSession::new(server_side, dialer.clone(), SLOW);

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let result = session.run().await;

        assert!(matches!(result, Err(Error::Auth)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.endpoint().is_none());
        assert!(dialer.dialed().is_empty());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn unsupported_command_never_dials() {
        let dialer = Arc::new(PipeDialer::new());
        let (mut client, server_side) = duplex(64);
        let mut session = ConnectionSession::new(server_side, dialer.clone(), SLOW);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x05, 0x03, 0x00])
            .await
            .unwrap();
        let result = session.run().await;

        assert!(matches!(result, Err(Error::Command)));
        assert!(dialer.dialed().is_empty());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x05, 0x00]);
    }

    #[tokio::test]
    async fn ipv4_target_is_not_implemented() {
        let dialer = Arc::new(PipeDialer::new());
        let (mut client, server_side) = duplex(64);
        let mut session = ConnectionSession::new(server_side, dialer.clone(), SLOW);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0, 80])
            .await
            .unwrap();
        let result = session.run().await;

        assert!(matches!(result, Err(Error::NotImplemented(0x01))));
        assert!(dialer.dialed().is_empty());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x05, 0x00]);
    }

    #[tokio::test]
    async fn dial_failure_closes_session() {
        let dialer = Arc::new(FailingDialer(io::ErrorKind::TimedOut));
        let (mut client, server_side) = duplex(64);
        let mut session = ConnectionSession::new(server_side, dialer, SLOW);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x03, 0x01, b'x', 0x00, 0x50])
            .await
            .unwrap();
        let result = session.run().await;

        assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut));
        assert_eq!(session.state(), SessionState::Failed);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x05, 0x00]);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dialer = Arc::new(PipeDialer::new());
        let (client, server_side) = duplex(64);
        let mut session = ConnectionSession::new(server_side, dialer, SLOW);

        drop(client);
        assert!(session.run().await.is_err());
        session.close().await;
        session.close().await;

        // 已关闭的会话再次运行直接报错，不会 panic
        assert!(matches!(session.run().await, Err(Error::Io(_))));
    }
}
