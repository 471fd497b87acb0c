use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A frame could not be fully read or written.
#[derive(Debug, thiserror::Error)]
#[error("{what}: {source}")]
pub struct FrameError {
    what: String,
    #[source]
    source: std::io::Error,
}

impl FrameError {
    fn new(what: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            what: what.into(),
            source,
        }
    }

    /// True when the peer simply went away (clean close or reset) rather
    /// than sending a short frame mid-payload.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self.source.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        )
    }
}

/// Reads one frame, blocking until the full payload has arrived.
///
/// Returns the payload without its length prefix. There is no payload
/// size ceiling at this layer; peers are trusted.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| FrameError::new("failed to read 4 bytes for frame size", e))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| FrameError::new(format!("failed to read {len} bytes for frame payload"), e))?;

    Ok(payload)
}

/// Writes one frame: the payload's 4-byte big-endian length, then the
/// payload itself.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| FrameError::new("failed to write 4 bytes for frame size", e))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| {
            FrameError::new(format!("failed to write {len} bytes for frame payload"), e)
        })?;
    writer
        .flush()
        .await
        .map_err(|e| FrameError::new("failed to flush frame", e))?;
    Ok(())
}

/// Reads one frame and decodes its payload into a message.
pub async fn read_message<R, M>(reader: &mut R) -> crate::Result<M>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let payload = read_frame(reader).await?;
    Ok(M::decode(payload.as_slice())?)
}

/// Encodes a message and writes it as one frame.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    write_frame(writer, &message.encode_to_vec()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, RequestMetadata};

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let payload = b"hello frames".to_vec();

        write_frame(&mut client, &payload).await.unwrap();
        let read = read_frame(&mut server).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn empty_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &[]).await.unwrap();
        let read = read_frame(&mut server).await.unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn frames_are_position_independent() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        for i in 0..10u8 {
            write_frame(&mut client, &vec![i; i as usize]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(read_frame(&mut server).await.unwrap(), vec![i; i as usize]);
        }
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Advertise 100 bytes but deliver only 3, then hang up.
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn closed_stream_reports_disconnect() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn typed_message_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request {
            metadata: Some(RequestMetadata {
                service_name: Some("Hello".into()),
                method_name: Some("Say".into()),
                ..Default::default()
            }),
            request_pb: None,
        };

        write_message(&mut client, &request).await.unwrap();
        let decoded: Request = read_message(&mut server).await.unwrap();
        assert_eq!(decoded, request);
    }
}
