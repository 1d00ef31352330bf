use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::{GREETING, GREETING_REPLY};

/// 认证协商，只接受 `05 01 00`，不尝试协商其他方法。
///
/// 读取恰好 3 字节；不匹配或读失败时什么都不写，直接返回 [`Error::Auth`]。
pub async fn negotiate<S>(stream: &mut S, buf: &mut BytesMut) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    buf.clear();
    buf.resize(GREETING.len(), 0);
    if stream.read_exact(&mut buf[..]).await.is_err() || buf[..] != GREETING[..] {
        return Err(Error::Auth);
    }

    stream
        .write_all(&GREETING_REPLY)
        .await
        .map_err(|_| Error::Auth)?;
    stream.flush().await.map_err(|_| Error::Auth)?;

    Ok(())
}
