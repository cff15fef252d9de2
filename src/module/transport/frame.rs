//! Кадры сокетного транспорта: `u32` big-endian длина + JSON события.

use bytes::{BufMut, BytesMut};
use indrajala_error::{IndraResult, ProtocolError, StackError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::event::Event;

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub fn encode_frame(ev: &Event) -> Result<BytesMut, ProtocolError> {
    let json = ev.to_json()?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(4 + json.len());
    buf.put_u32(json.len() as u32);
    buf.put_slice(json.as_bytes());
    Ok(buf)
}

pub async fn write_frame<W>(
    writer: &mut W,
    ev: &Event,
) -> IndraResult<()>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(ev)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Читает следующий кадр. `None` означает, что соединение закрыто на
/// границе кадра.
pub async fn read_frame<R>(reader: &mut R) -> IndraResult<Option<Event>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(StackError::new(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        }));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let ev = serde_json::from_slice(&payload).map_err(|e| ProtocolError::InvalidFrame {
        reason: e.to_string(),
    })?;
    Ok(Some(ev))
}
