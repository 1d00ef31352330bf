use std::io;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::dialer::{Dialer, DirectDialer};
use crate::error::Error;
use crate::session::ConnectionSession;

/// 监听端口，为每个入站连接启动一个独立的会话任务
pub struct Server {
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self::with_dialer(config, Arc::new(DirectDialer))
    }

    pub fn with_dialer(config: Config, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config: Arc::new(config),
            dialer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn listen_and_serve(&self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!("SOCKS5 代理服务器启动在 {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// 接收循环。单次 accept 失败只记日志，不会退出
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let slow_stage = self.config.slow_stage_threshold();
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    let mut session = ConnectionSession::new(socket, self.dialer.clone(), slow_stage);
                    info!("[{}] 新连接来自: {}", session.id(), addr);

                    tokio::spawn(async move {
                        match session.run().await {
                            Ok(_) => {}
                            Err(e @ Error::Io(_)) => {
                                error!("[{}] 处理连接时出错: {}", session.id(), e)
                            }
                            Err(e) => warn!("[{}] 处理连接时出错: {}", session.id(), e),
                        }
                    });
                }
                Err(e) => {
                    error!("接受连接时出错: {}", e);
                }
            }
        }
    }
}
