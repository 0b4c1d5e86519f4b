//! Line-oriented TCP link to the FSD hub
//!
//! The stream is split once: the read half belongs to the dispatch loop, the
//! write half is shared by every task that sends. All sends go through one
//! mutex which also owns the outbound packet counter, so packet numbers are
//! unique and appear on the wire in increasing order.

use crate::errors::{DataServerError, Result};
use fsd::Record;
use log::{debug, info};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Longest accepted line, terminator included
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

/// Opens the hub connection and splits it into its two halves
pub async fn connect(host: &str, port: u16) -> Result<(FsdReader, FsdWriter)> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    info!("Connected to FSD hub at {}:{}", host, port);

    let (reader, writer) = stream.into_split();
    Ok((FsdReader::new(reader), FsdWriter::new(writer)))
}

pub struct FsdReader {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    buf: Vec<u8>,
}

impl FsdReader {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            inner: BufReader::new(Box::new(reader)),
            buf: Vec::with_capacity(512),
        }
    }

    /// Returns the next non-empty line without its terminator
    ///
    /// End of stream is reported as [`DataServerError::ConnectionClosed`].
    /// A line longer than [`MAX_LINE_LENGTH`] is an error; the stream can't be
    /// resynchronized after it. Bytes that are not valid UTF-8 are replaced
    /// rather than rejected.
    pub async fn read_line(&mut self) -> Result<String> {
        loop {
            self.buf.clear();
            let n = (&mut self.inner)
                .take(MAX_LINE_LENGTH as u64)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 {
                return Err(DataServerError::ConnectionClosed);
            }
            if n == MAX_LINE_LENGTH && self.buf.last() != Some(&b'\n') {
                return Err(DataServerError::LineTooLong(MAX_LINE_LENGTH));
            }

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            if !line.is_empty() {
                return Ok(line.to_string());
            }
        }
    }
}

struct WriteHalf {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    packets_sent: u64,
}

/// Shared sending half of the hub connection
#[derive(Clone)]
pub struct FsdWriter {
    inner: Arc<Mutex<WriteHalf>>,
}

impl FsdWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(WriteHalf {
                writer: Box::new(writer),
                packets_sent: 0,
            })),
        }
    }

    /// Stamps the next packet number on `record` and writes it as one line
    ///
    /// The counter only advances once the line has been flushed. Returns the
    /// line as sent, without terminator.
    pub async fn send(&self, mut record: Record) -> Result<String> {
        let mut half = self.inner.lock().await;

        record.base_mut().packet.number = half.packets_sent;
        let line = record.encode();

        half.writer.write_all(line.as_bytes()).await?;
        half.writer.write_all(b"\r\n").await?;
        half.writer.flush().await?;
        half.packets_sent += 1;

        debug!("> {}", line);
        Ok(line)
    }

    pub async fn packets_sent(&self) -> u64 {
        self.inner.lock().await.packets_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsd::{Base, PacketTag, Ping, Pong, RemoveClient};
    use tokio::io::AsyncReadExt;

    fn removal(callsign: &str) -> Record {
        Record::RemoveClient(RemoveClient {
            base: Base::outbound("*", "DSERVERNG", PacketTag::Broadcast),
            callsign: callsign.to_string(),
        })
    }

    #[tokio::test]
    async fn test_read_line_strips_terminators() {
        let mock = tokio_test::io::Builder::new()
            .read(b"PING:DSERVERNG:SERVER1:B5:1:12345\r\n")
            .read(b"RMCLIENT:*:SERVER1:B6:1:ABC123\n")
            .build();
        let mut reader = FsdReader::new(mock);

        assert_eq!(
            reader.read_line().await.unwrap(),
            "PING:DSERVERNG:SERVER1:B5:1:12345"
        );
        assert_eq!(
            reader.read_line().await.unwrap(),
            "RMCLIENT:*:SERVER1:B6:1:ABC123"
        );
        assert!(matches!(
            reader.read_line().await,
            Err(DataServerError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_line_skips_blank_lines() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\r\n\r\nSYNC:*:SERVER1:B1:1:\r\n")
            .build();
        let mut reader = FsdReader::new(mock);
        assert_eq!(reader.read_line().await.unwrap(), "SYNC:*:SERVER1:B1:1:");
    }

    #[tokio::test]
    async fn test_read_line_joins_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"RMCLIENT:*:SERV")
            .read(b"ER1:B6:1:ABC123\r\n")
            .build();
        let mut reader = FsdReader::new(mock);
        assert_eq!(
            reader.read_line().await.unwrap(),
            "RMCLIENT:*:SERVER1:B6:1:ABC123"
        );
    }

    #[tokio::test]
    async fn test_read_line_tolerates_invalid_utf8() {
        let mock = tokio_test::io::Builder::new()
            .read(b"PING:A:B:B1:1:\xff\r\n")
            .build();
        let mut reader = FsdReader::new(mock);
        assert!(reader.read_line().await.unwrap().starts_with("PING:A:B:B1:1:"));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let mut flood = vec![b'A'; MAX_LINE_LENGTH + 100];
        flood.extend_from_slice(b"\r\n");
        let mut reader = FsdReader::new(std::io::Cursor::new(flood));

        assert!(matches!(
            reader.read_line().await,
            Err(DataServerError::LineTooLong(MAX_LINE_LENGTH))
        ));
    }

    #[tokio::test]
    async fn test_longest_line_is_accepted() {
        let mut line = vec![b'A'; MAX_LINE_LENGTH - 2];
        line.extend_from_slice(b"\r\n");
        let mock = tokio_test::io::Builder::new().read(&line).build();
        let mut reader = FsdReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap().len(), MAX_LINE_LENGTH - 2);
    }

    #[tokio::test]
    async fn test_send_numbers_packets() {
        let (client, mut hub) = tokio::io::duplex(4096);
        let writer = FsdWriter::new(client);

        assert_eq!(
            writer.send(removal("ABC123")).await.unwrap(),
            "RMCLIENT:*:DSERVERNG:B0:1:ABC123"
        );
        assert_eq!(
            writer.send(removal("DEF456")).await.unwrap(),
            "RMCLIENT:*:DSERVERNG:B1:1:DEF456"
        );
        assert_eq!(writer.packets_sent().await, 2);
        drop(writer);

        let mut received = String::new();
        hub.read_to_string(&mut received).await.unwrap();
        assert_eq!(
            received,
            "RMCLIENT:*:DSERVERNG:B0:1:ABC123\r\nRMCLIENT:*:DSERVERNG:B1:1:DEF456\r\n"
        );
    }

    #[tokio::test]
    async fn test_pong_keeps_reply_tag() {
        let (client, _hub) = tokio::io::duplex(4096);
        let writer = FsdWriter::new(client);
        writer.send(removal("ABC123")).await.unwrap();

        let ping = Ping {
            base: Base::outbound("DSERVERNG", "SERVER1", PacketTag::Broadcast),
            data: "12345".to_string(),
        };
        let line = writer
            .send(Record::Pong(Pong::reply_to(&ping, "DSERVERNG")))
            .await
            .unwrap();
        assert_eq!(line, "PONG:SERVER1:DSERVERNG:U1:1:12345");
    }

    #[tokio::test]
    async fn test_failed_send_does_not_advance_counter() {
        let (client, hub) = tokio::io::duplex(64);
        drop(hub);
        let writer = FsdWriter::new(client);

        assert!(writer.send(removal("ABC123")).await.is_err());
        assert_eq!(writer.packets_sent().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_sends_get_unique_numbers() {
        let (client, mut hub) = tokio::io::duplex(64 * 1024);
        let writer = FsdWriter::new(client);

        let mut handles = Vec::new();
        for i in 0..20 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.send(removal(&format!("TEST{:02}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        drop(writer);

        let mut received = String::new();
        hub.read_to_string(&mut received).await.unwrap();
        let numbers: Vec<String> = received
            .lines()
            .map(|line| line.split(':').nth(3).unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..20).map(|n| format!("B{}", n)).collect();
        assert_eq!(numbers, expected);
    }
}
