//! Framing: length-prefix (4 bytes BE) + message bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a payload into a single frame: 4 bytes BE length + payload.
pub fn encode_frame(payload: &[u8]) -> std::result::Result<Vec<u8>, FrameEncodeError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Error encoding a payload into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large")]
    TooLarge,
}

/// Write one frame. The whole frame goes out in a single `write_all` so a
/// frame is never split around another writer's bytes.
pub async fn send<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload).map_err(|_| Error::FrameTooLarge(payload.len()))?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, looping over partial reads until the advertised length is
/// complete. A stream that closes early is a transport error.
pub async fn receive<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(Error::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream closed after {filled} of {len} bytes"),
            )));
        }
        filled += n;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_is_big_endian() {
        let frame = encode_frame(&[7u8; 258]).unwrap();
        assert_eq!(&frame[..4], &[0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn oversized_prefix_rejected_before_reading_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
        assert!(matches!(
            receive(&mut server).await,
            Err(Error::FrameTooLarge(n)) if n == MAX_FRAME_LEN as usize + 1
        ));
    }

    #[tokio::test]
    async fn oversized_payload_is_not_sent() {
        let (mut client, _server) = tokio::io::duplex(64);
        let payload = vec![0u8; MAX_FRAME_LEN as usize + 1];
        assert!(matches!(
            send(&mut client, &payload).await,
            Err(Error::FrameTooLarge(_))
        ));
    }

    async fn pipe(payload: Vec<u8>) -> Vec<u8> {
        // small pipe buffer so large payloads arrive in many partial reads
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            send(&mut client, &payload).await.unwrap();
        });
        let got = receive(&mut server).await.unwrap();
        writer.await.unwrap();
        got
    }

    #[tokio::test]
    async fn roundtrip_empty_single_and_large() {
        assert!(pipe(Vec::new()).await.is_empty());
        assert_eq!(pipe(vec![42]).await, vec![42]);
        let large: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(pipe(large.clone()).await, large);
    }

    #[tokio::test]
    async fn premature_close_is_transport_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut frame = encode_frame(b"truncated payload").unwrap();
        frame.truncate(8);
        client.write_all(&frame).await.unwrap();
        drop(client);
        assert!(matches!(
            receive(&mut server).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn close_before_prefix_is_transport_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(matches!(
            receive(&mut server).await,
            Err(Error::Transport(_))
        ));
    }
}
