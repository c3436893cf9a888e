//! Byte channels the remote protocol runs over.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::time::Duration;

/// A bidirectional byte stream with a configurable read timeout.
///
/// TCP and Unix sockets implement it directly; [`loopback`] provides an
/// in-process pair for tests.
pub trait ByteChannel: Read + Write + Send {
    /// Sets (or clears) the timeout applied to blocking reads.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ByteChannel for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        Self::set_read_timeout(self, timeout)
    }
}

impl ByteChannel for UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        Self::set_read_timeout(self, timeout)
    }
}

/// One end of an in-process channel pair.
pub struct LoopbackChannel {
    /// Outgoing chunks.
    tx: Sender<Vec<u8>>,
    /// Incoming chunks.
    rx: Receiver<Vec<u8>>,
    /// Bytes received but not yet read.
    pending: VecDeque<u8>,
    /// Read timeout; `None` blocks indefinitely.
    timeout: Option<Duration>,
}

/// Creates a connected pair of in-process channels.
pub fn loopback() -> (LoopbackChannel, LoopbackChannel) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    let make = |tx, rx| LoopbackChannel {
        tx,
        rx,
        pending: VecDeque::new(),
        timeout: None,
    };
    (make(a_tx, a_rx), make(b_tx, b_rx))
}

impl Read for LoopbackChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let chunk = match self.timeout {
                Some(timeout) => self.rx.recv_timeout(timeout).map_err(|err| match err {
                    RecvTimeoutError::Timeout => {
                        io::Error::new(io::ErrorKind::TimedOut, "loopback read timed out")
                    }
                    RecvTimeoutError::Disconnected => {
                        io::Error::new(io::ErrorKind::UnexpectedEof, "loopback peer closed")
                    }
                })?,
                None => self.rx.recv().map_err(|_| {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "loopback peer closed")
                })?,
            };
            self.pending.extend(chunk);
            // Drain whatever else already arrived.
            loop {
                match self.rx.try_recv() {
                    Ok(chunk) => self.pending.extend(chunk),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
        }
        let count = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(count) {
            *slot = self.pending.pop_front().unwrap_or_default();
        }
        Ok(count)
    }
}

impl Write for LoopbackChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.send(buf.to_vec()).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer closed")
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteChannel for LoopbackChannel {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

/// A channel whose reads and writes always fail.
///
/// Stands in for a shard whose transport collapsed; useful when
/// exercising the partial-failure paths.
#[derive(Debug, Default)]
pub struct BrokenChannel;

impl Read for BrokenChannel {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "transport failed",
        ))
    }
}

impl Write for BrokenChannel {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "transport failed",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteChannel for BrokenChannel {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trips_bytes() {
        let (mut client, mut server) = loopback();
        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn loopback_times_out() {
        let (mut client, _server) = loopback();
        client
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let mut buf = [0u8; 1];
        let err = client.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
