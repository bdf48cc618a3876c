use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::link::LinkEngine;
use crate::tracing::prelude::*;

/// Byte sink the link engine transmits through.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Write `buf` to the channel within a bounded time.
    ///
    /// Returns the number of bytes actually written, which is 0 when the
    /// channel failed before accepting anything. Failures are never
    /// escalated; retry and backpressure belong to the link engine.
    async fn send_bytes(&self, buf: &[u8]) -> usize;
}

/// Outbound half of the transport bridge.
///
/// The writer is shared behind an async mutex so the engine may call it
/// from whichever task produces output.
pub struct TransportWriter<W> {
    inner: Mutex<W>,
    write_timeout: Duration,
}

impl<W> TransportWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, write_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(writer),
            write_timeout,
        }
    }
}

#[async_trait]
impl<W> Outbound for TransportWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_bytes(&self, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let mut written = 0;
        // The lock wait counts against the same deadline as the write itself.
        let result = time::timeout(self.write_timeout, async {
            let mut writer = self.inner.lock().await;
            while written < buf.len() {
                let n = writer.write(&buf[written..]).await?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                written += n;
            }
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                trace!(bytes = written, "Wrote to serial transport");
            }
            Ok(Err(e)) => {
                warn!(error = %e, written, requested = buf.len(), "Serial write error");
            }
            Err(_) => {
                warn!(written, requested = buf.len(), "Serial write timed out");
            }
        }
        written
    }
}

/// Inbound half of the transport bridge.
///
/// Waits at most `read_timeout` for bytes, hands each chunk to the link
/// engine in receipt order, and loops. Returns when cancelled, or with an
/// error when the channel reaches end of stream.
pub async fn inbound_pump<R, E>(
    mut reader: R,
    engine: Arc<E>,
    read_timeout: Duration,
    chunk_size: usize,
    running: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    E: LinkEngine + ?Sized,
{
    trace!("Inbound pump started.");
    let mut buf = vec![0u8; chunk_size];

    loop {
        let read = tokio::select! {
            _ = running.cancelled() => break,
            read = time::timeout(read_timeout, reader.read(&mut buf)) => read,
        };

        match read {
            // Nothing arrived within the bounded wait.
            Err(_) => continue,
            Ok(Ok(0)) => {
                warn!("Serial transport closed");
                return Err(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }
            Ok(Ok(n)) => {
                trace!(bytes = n, "Read from serial transport");
                engine.input(&buf[..n]).await;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Serial read error");
                // Pause so a persistently failing port cannot spin the pump.
                tokio::select! {
                    _ = running.cancelled() => break,
                    _ = time::sleep(read_timeout) => {}
                }
            }
        }
    }

    trace!("Inbound pump stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use tokio::io::duplex;

    #[derive(Default)]
    struct RecordingEngine {
        received: SyncMutex<Vec<u8>>,
        chunks: SyncMutex<usize>,
    }

    #[async_trait]
    impl LinkEngine for RecordingEngine {
        async fn disconnect(&self) {}

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn input(&self, chunk: &[u8]) {
            self.received.lock().extend_from_slice(chunk);
            *self.chunks.lock() += 1;
        }
    }

    #[tokio::test]
    async fn test_inbound_delivers_bytes_in_order() {
        let (mut serial, bridge_side) = duplex(64);
        let engine = Arc::new(RecordingEngine::default());
        let running = CancellationToken::new();
        let pump = tokio::spawn(inbound_pump(
            bridge_side,
            engine.clone(),
            Duration::from_millis(20),
            8,
            running.clone(),
        ));

        serial.write_all(b"~\x7d\x23first").await.unwrap();
        serial.write_all(b"second~").await.unwrap();

        for _ in 0..100 {
            if engine.received.lock().len() == 15 {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.received.lock().as_slice(), b"~\x7d\x23firstsecond~");
        assert!(*engine.chunks.lock() >= 2, "chunks are bounded by the buffer size");

        running.cancel();
        pump.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_idles_on_timeout_until_cancelled() {
        let (_serial, bridge_side) = duplex(64);
        let engine = Arc::new(RecordingEngine::default());
        let running = CancellationToken::new();
        let pump = tokio::spawn(inbound_pump(
            bridge_side,
            engine.clone(),
            Duration::from_millis(100),
            64,
            running.clone(),
        ));

        time::sleep(Duration::from_secs(5)).await;
        assert!(!pump.is_finished());
        assert_eq!(*engine.chunks.lock(), 0);

        running.cancel();
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_inbound_reports_closed_channel() {
        let (serial, bridge_side) = duplex(64);
        drop(serial);
        let engine = Arc::new(RecordingEngine::default());
        let result = inbound_pump(
            bridge_side,
            engine,
            Duration::from_millis(100),
            64,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_outbound_returns_bytes_written() {
        let (writer_side, mut serial) = duplex(64);
        let writer = TransportWriter::new(writer_side, Duration::from_secs(1));

        assert_eq!(writer.send_bytes(b"hello").await, 5);
        let mut buf = [0u8; 5];
        serial.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_outbound_reports_zero_on_failure() {
        let (writer_side, serial) = duplex(64);
        drop(serial);
        let writer = TransportWriter::new(writer_side, Duration::from_secs(1));
        assert_eq!(writer.send_bytes(b"lost").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_bounded_when_channel_stalls() {
        // Nobody drains the peer, so only the buffer's worth gets through.
        let (writer_side, _serial) = duplex(4);
        let writer = TransportWriter::new(writer_side, Duration::from_millis(500));
        assert_eq!(writer.send_bytes(b"0123456789").await, 4);
    }
}
