use std::io;

use thiserror::Error;

/// 会话内所有阶段共用的错误类型
///
/// 客户端看到的表现完全一致（连接被直接关闭，不回任何失败应答），
/// 区分原因只为日志。
#[derive(Error, Debug)]
pub enum Error {
    /// 握手报文不是 `05 01 00`，或读写不完整
    #[error("socks5 auth error")]
    Auth,

    /// 命令头格式错误或命令不受支持
    #[error("socks5 cmd error")]
    Command,

    /// 不支持的地址类型
    #[error("socks5 not impl error: atyp 0x{0:02x}")]
    NotImplemented(u8),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
