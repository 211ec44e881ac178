//! Length-prefixed frame codec
//!
//! Wire format: [4-byte big-endian length][JSON payload], at most 1 MiB.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Frame;

pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

fn closed_on_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_on_eof)?;

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(Error::Protocol("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(closed_on_eof)?;

    Frame::from_bytes(&payload).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let payload = frame
        .to_bytes()
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "Frame too large: {} bytes (max {})",
                payload.len(),
                MAX_FRAME_SIZE
            ))
        })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Ping).await.unwrap();
        write_frame(
            &mut buf,
            &Frame::Rejected {
                reason: "bad token".into(),
            },
        )
        .await
        .unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), Frame::Ping);
        assert!(matches!(
            read_frame(&mut cursor).await.unwrap(),
            Frame::Rejected { reason } if reason == "bad token"
        ));
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_closed() {
        let mut raw = 10u32.to_be_bytes().to_vec();
        raw.extend_from_slice(b"{\"ty");
        let mut cursor = Cursor::new(raw);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
