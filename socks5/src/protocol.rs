//! SOCKS5 线协议常量与目标地址解码

use std::fmt;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

pub const SOCKS_VERSION: u8 = 0x05;
pub const NO_AUTHENTICATION: u8 = 0x00;
pub const RESERVED: u8 = 0x00;

pub const CONNECT_COMMAND: u8 = 0x01;

pub const IPV4_ADDRESS: u8 = 0x01;
pub const DOMAIN_NAME: u8 = 0x03;

pub const REPLY_SUCCEEDED: u8 = 0x00;

/// 客户端唯一被接受的握手：版本 5，一个方法，无认证
pub static GREETING: [u8; 3] = [SOCKS_VERSION, 0x01, NO_AUTHENTICATION];

/// 握手应答：选择无认证
pub static GREETING_REPLY: [u8; 2] = [SOCKS_VERSION, NO_AUTHENTICATION];

/// CONNECT 成功应答，绑定地址固定报 0.0.0.0:0
pub static CONNECT_REPLY: [u8; 10] = [
    SOCKS_VERSION,
    REPLY_SUCCEEDED,
    RESERVED,
    IPV4_ADDRESS,
    0x00, 0x00, 0x00, 0x00, // 0.0.0.0
    0x00, 0x00,             // 端口 0
];

/// 会话暂存缓冲区容量，域名最长 255 字节加 2 字节端口也放得下
pub const SCRATCH_CAPACITY: usize = 1024;

/// 客户端命令。新增 BIND / UDP ASSOCIATE 时在这里扩展分支即可
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            CONNECT_COMMAND => Ok(Command::Connect),
            _ => Err(Error::Command),
        }
    }
}

/// 解码后的目标地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 从客户端流中读取 ATYP 及其后的地址字段。
///
/// 只支持域名类型 (0x03)，其余类型返回 [`Error::NotImplemented`]，
/// 且不会再多读任何字节。
pub async fn read_endpoint<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Endpoint>
where
    R: AsyncRead + Unpin,
{
    let atyp = reader.read_u8().await?;
    if atyp != DOMAIN_NAME {
        return Err(Error::NotImplemented(atyp));
    }

    let len = reader.read_u8().await? as usize;

    buf.clear();
    buf.resize(len + 2, 0);
    reader.read_exact(&mut buf[..]).await?;

    let host = String::from_utf8_lossy(&buf[..len]).into_owned();
    let port = (&buf[len..]).get_u16();

    Ok(Endpoint { host, port })
}
