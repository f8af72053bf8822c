use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::QvmError;

/// Newline-delimited byte stream to a QMP server.
///
/// Generic over the stream so the protocol layer can run over an in-memory
/// pipe in tests; production code always uses [`UnixStream`].
pub(crate) struct Transport<S> {
    stream: BufReader<S>,
}

impl Transport<UnixStream> {
    /// Connect to a listening Unix-domain socket. No retry, no timeout.
    pub(crate) async fn connect(path: &Path) -> Result<Self, QvmError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| QvmError::QmpConnect {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "connected to QMP socket");
        Ok(Self::new(stream))
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one line with its terminator stripped. `None` at end of stream.
    pub(crate) async fn read_line(&mut self) -> Result<Option<String>, QvmError> {
        let mut line = String::new();
        let n = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(|source| QvmError::QmpIo {
                context: "reading reply".into(),
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    pub(crate) async fn write_line(&mut self, text: &str) -> Result<(), QvmError> {
        let io_err = |source| QvmError::QmpIo {
            context: "sending command".into(),
            source,
        };
        let stream = self.stream.get_mut();
        stream.write_all(text.as_bytes()).await.map_err(io_err)?;
        stream.write_all(b"\n").await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn lines_are_split_and_trimmed() {
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"first\r\nsecond\n").await.unwrap();
        drop(server);

        let mut t = Transport::new(client);
        assert_eq!(t.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(t.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(t.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut t = Transport::new(client);
        t.write_line("{\"execute\":\"cont\"}").await.unwrap();
        drop(t);

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "{\"execute\":\"cont\"}\n");
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Transport::connect(&dir.path().join("qmp-nothing")).await;
        assert!(matches!(result, Err(QvmError::QmpConnect { .. })));
    }
}
