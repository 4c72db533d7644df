//! Trait abstraction for the radio serial link to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Trait for line-oriented radio I/O
#[async_trait]
pub trait RadioPort: Send {
    /// Read bytes up to and including the next `\n`, appending them to `buf`
    ///
    /// Bytes already appended stay in `buf` if the future is dropped, so a
    /// timed-out read can be resumed with the same buffer.
    async fn read_line_into(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;

    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Buffered wrapper giving any async byte stream the [`RadioPort`] interface
pub struct StreamPort<T> {
    inner: BufReader<T>,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> StreamPort<T> {
    pub fn new(stream: T) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> RadioPort for StreamPort<T> {
    async fn read_line_into(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.inner.read_until(b'\n', buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::MockRadioPort;
    use super::*;

    #[tokio::test]
    async fn test_stream_port_reads_lines() {
        let stream = tokio_test::io::Builder::new()
            .read(b"$00:00:01,1,ASC")
            .read(b"ENT*\nCMD_ECHO:C\n")
            .build();
        let mut port = StreamPort::new(stream);

        let mut buf = Vec::new();
        port.read_line_into(&mut buf).await.unwrap();
        assert_eq!(buf, b"$00:00:01,1,ASCENT*\n", "Line split across reads is joined");

        buf.clear();
        port.read_line_into(&mut buf).await.unwrap();
        assert_eq!(buf, b"CMD_ECHO:C\n");
    }

    #[tokio::test]
    async fn test_stream_port_writes() {
        let stream = tokio_test::io::Builder::new().write(b"C\n").build();
        let mut port = StreamPort::new(stream);

        port.write_all(b"C\n").await.unwrap();
        port.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_write_records_data() {
        let mut mock = MockRadioPort::new();
        mock.write_all(b"D\n").await.unwrap();
        assert_eq!(mock.get_written_data(), vec![b"D\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_mock_write_error() {
        let mut mock = MockRadioPort::new();
        mock.set_write_error(io::ErrorKind::BrokenPipe);

        let result = mock.write_all(b"C\n").await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_mock_silence_times_out() {
        let mut mock = MockRadioPort::new();
        let mut buf = Vec::new();
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(20), mock.read_line_into(&mut buf)).await;
        assert!(result.is_err(), "Empty script never completes a read");
    }
}
