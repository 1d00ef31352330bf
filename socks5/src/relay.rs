use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const RELAY_BUFFER_SIZE: usize = 8192;

/// 两个转发方向共享的一次性终止信号
#[derive(Debug, Default)]
pub struct TerminationSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发信号，只有第一次调用返回 `true`
    pub fn raise(&self) -> bool {
        let first = !self.raised.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// 等待信号被触发
    pub async fn raised(&self) {
        loop {
            // 先注册再检查标志，避免错过 notify_waiters
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToTarget => f.write_str("客户端->目标"),
            Direction::TargetToClient => f.write_str("目标->客户端"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
    /// 先结束、触发终止信号的方向
    pub first_finished: Direction,
}

struct PipeOutcome {
    copied: u64,
    /// 本方向的复制是否自行结束（而不是被信号中止）
    finished: bool,
    raised: bool,
    error: Option<io::Error>,
}

/// 已启动的双向转发
///
/// 每个方向运行在独立的任务里；先结束的方向触发终止信号，另一方向
/// 看到信号后放弃手上的读写并返回。两个任务都结束后，拆分出的读写半部
/// 全部被丢弃，两条连接随之关闭。
pub struct Relay {
    upstream: JoinHandle<PipeOutcome>,
    downstream: JoinHandle<PipeOutcome>,
}

impl Relay {
    pub fn spawn<C, T>(client: C, target: T) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let signal = Arc::new(TerminationSignal::new());

        let (client_read, client_write) = tokio::io::split(client);
        let (target_read, target_write) = tokio::io::split(target);

        Self {
            upstream: tokio::spawn(pipe(client_read, target_write, signal.clone())),
            downstream: tokio::spawn(pipe(target_read, client_write, signal)),
        }
    }

    /// 等待两个方向都结束
    pub async fn wait(self, id: &str) -> io::Result<RelayStats> {
        let (upstream, downstream) = tokio::join!(self.upstream, self.downstream);
        let upstream = upstream.map_err(io::Error::other)?;
        let downstream = downstream.map_err(io::Error::other)?;

        for (direction, outcome) in [
            (Direction::ClientToTarget, &upstream),
            (Direction::TargetToClient, &downstream),
        ] {
            match (&outcome.error, outcome.finished) {
                (Some(e), _) => debug!("[{}] {} 转发出错: {}", id, direction, e),
                (None, true) => debug!("[{}] {} 数据传输完成", id, direction),
                (None, false) => debug!("[{}] {} 被终止信号中止", id, direction),
            }
        }

        let first_finished = if upstream.raised {
            Direction::ClientToTarget
        } else {
            Direction::TargetToClient
        };

        Ok(RelayStats {
            client_to_target: upstream.copied,
            target_to_client: downstream.copied,
            first_finished,
        })
    }
}

/// 在客户端与目标之间双向转发，直到任一方向结束
pub async fn relay<C, T>(client: C, target: T, id: &str) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    Relay::spawn(client, target).wait(id).await
}

async fn pipe<R, W>(mut src: R, mut dst: W, signal: Arc<TerminationSignal>) -> PipeOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    let result = tokio::select! {
        result = copy(&mut src, &mut dst, &mut copied) => Some(result),
        _ = signal.raised() => None,
    };

    match result {
        Some(result) => PipeOutcome {
            copied,
            finished: true,
            raised: signal.raise(),
            error: result.err(),
        },
        None => PipeOutcome {
            copied,
            finished: false,
            raised: false,
            error: None,
        },
    }
}

async fn copy<R, W>(src: &mut R, dst: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return dst.shutdown().await;
        }
        // 目标可能带写缓冲，每次写完立即 flush，否则交互流量会卡住
        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
        *copied += n as u64;
    }
}
