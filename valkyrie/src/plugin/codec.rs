//! Length-prefixed frame codec for the plugin pipes.
//!
//! A frame is a little-endian `u32` body length followed by the `bincode`
//! encoded body.

use super::errors::SerializationError;
use bincode::config;
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size (4MB), checked before allocating.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Encode a frame body.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    let body = bincode::serde::encode_to_vec(value, config::standard())?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(SerializationError::FrameTooLarge {
            actual: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(body)
}

/// Decode a frame body. The whole body must be consumed.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, SerializationError> {
    let (value, read) = bincode::serde::decode_from_slice(body, config::standard())?;
    if read != body.len() {
        return Err(SerializationError::InvalidFormat(format!(
            "{} trailing bytes after frame body",
            body.len() - read
        )));
    }
    Ok(value)
}

fn invalid_data(error: SerializationError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Write one frame and flush it.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> io::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let body = encode(value).map_err(invalid_data)?;
    write_encoded(writer, &body).await
}

/// Write an already encoded frame body and flush it.
pub async fn write_encoded<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_SIZE {
        return Err(invalid_data(SerializationError::FrameTooLarge {
            actual: body.len(),
            max: MAX_FRAME_SIZE,
        }));
    }

    // Prefix and body go out in one write so a reader never sees a
    // prefix without its body.
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend((body.len() as u32).to_le_bytes());
    buf.extend(body);
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Read one frame, or `None` if the stream ended cleanly between frames.
pub async fn try_read_frame<T, R>(reader: &mut R) -> io::Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader.read(&mut len_bytes[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(invalid_data(SerializationError::FrameTooLarge {
            actual: len,
            max: MAX_FRAME_SIZE,
        }));
    }

    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    decode(&body).map(Some).map_err(invalid_data)
}

/// Read one frame. A stream that ends between frames is an
/// [`io::ErrorKind::UnexpectedEof`] error.
pub async fn read_frame<T, R>(reader: &mut R) -> io::Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    try_read_frame(reader)
        .await?
        .ok_or_else(|| io::ErrorKind::UnexpectedEof.into())
}
