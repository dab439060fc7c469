//! NUL-framed duplex transport to the instrument.
//!
//! Every outbound message is followed by a single `\0`, and every reply ends with
//! one. The transport owns exactly one stream and knows nothing about commands.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::debug;

use crate::error::{CallboxError, Result};

/// Frame terminator used in both directions.
pub const TERMINATOR: u8 = b'\0';

/// A strictly synchronous request/reply channel.
pub trait Transport {
    /// Writes `message` plus the terminator.
    fn send(&mut self, message: &str) -> Result<()>;

    /// Reads one reply and returns it with the terminator stripped.
    fn receive(&mut self, timeout: Duration) -> Result<String>;

    /// Releases the stream. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    fn send_and_receive(&mut self, message: &str, timeout: Duration) -> Result<String> {
        self.send(message)?;
        self.receive(timeout)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, message: &str) -> Result<()> {
        (**self).send(message)
    }

    fn receive(&mut self, timeout: Duration) -> Result<String> {
        (**self).receive(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// A byte stream whose read wait can be bounded.
pub trait DuplexStream: Read + Write {
    fn set_reply_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn close_stream(&mut self) -> io::Result<()>;
}

impl DuplexStream for TcpStream {
    fn set_reply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))
    }

    fn close_stream(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

impl DuplexStream for Box<dyn SerialPort> {
    fn set_reply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }

    fn close_stream(&mut self) -> io::Result<()> {
        // The port is released when dropped.
        Ok(())
    }
}

/// Framing over any [`DuplexStream`].
pub struct StreamTransport<S: DuplexStream> {
    stream: Option<S>,
    peer: String,
    // Bytes read past the last terminator.
    pending: Vec<u8>,
}

/// The MD8475A remote-control port.
pub type TcpTransport = StreamTransport<TcpStream>;

/// RS-232 control through a serial adapter.
pub type SerialTransport = StreamTransport<Box<dyn SerialPort>>;

impl<S: DuplexStream> StreamTransport<S> {
    /// Wraps an already-open stream.
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
            pending: Vec::new(),
        }
    }

    /// The address or device path this transport talks to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn take_frame(&mut self) -> Result<Option<String>> {
        let Some(end) = self.pending.iter().position(|&b| b == TERMINATOR) else {
            return Ok(None);
        };
        let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
        frame.pop();
        decode_reply(frame).map(Some)
    }
}

/// Rejects messages that would not travel as exactly one frame.
pub(crate) fn check_frame(message: &str) -> Result<()> {
    if message.as_bytes().contains(&TERMINATOR) {
        return Err(CallboxError::invalid(format!(
            "message contains the frame terminator: {message:?}"
        )));
    }
    Ok(())
}

// Replies are passed through as-is, so bytes that are not UTF-8 are an error.
fn decode_reply(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        CallboxError::Transport(io::Error::new(io::ErrorKind::InvalidData, e))
    })
}

impl TcpTransport {
    /// Opens a TCP stream with a bounded connect wait.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let address = format!("{host}:{port}");
        let connection_error = |reason: String| CallboxError::Connection {
            address: address.clone(),
            reason,
        };

        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|e| connection_error(e.to_string()))?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(timeout))?;
                    debug!(peer = %address, "connected");
                    return Ok(Self::new(stream, address.clone()));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(connection_error(
            last_error.map_or_else(|| "address resolved to nothing".to_string(), |e| e.to_string()),
        ))
    }
}

impl SerialTransport {
    /// Opens a serial device at the given baud rate.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| CallboxError::Connection {
                address: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(port, path))
    }
}

impl<S: DuplexStream> Transport for StreamTransport<S> {
    fn send(&mut self, message: &str) -> Result<()> {
        check_frame(message)?;
        let stream = self.stream.as_mut().ok_or(CallboxError::SessionClosed)?;
        debug!(peer = %self.peer, "-> {message}");

        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(TERMINATOR);

        stream.write_all(&frame)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 512];

        loop {
            if let Some(reply) = self.take_frame()? {
                debug!(peer = %self.peer, "<- {reply}");
                return Ok(reply);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CallboxError::Timeout(timeout));
            }

            let stream = self.stream.as_mut().ok_or(CallboxError::SessionClosed)?;
            stream.set_reply_timeout(remaining)?;

            match stream.read(&mut buf) {
                Ok(0) if self.pending.is_empty() => {
                    return Err(CallboxError::Connection {
                        address: self.peer.clone(),
                        reason: "connection closed by peer".to_string(),
                    });
                }
                Ok(0) => {
                    // Peer closed mid-frame; hand back what arrived.
                    let reply = decode_reply(std::mem::take(&mut self.pending))?;
                    debug!(peer = %self.peer, "<- {reply} (closed)");
                    return Ok(reply);
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Err(CallboxError::Timeout(timeout));
                }
                Err(e) => return Err(CallboxError::Transport(e)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!(peer = %self.peer, "closing");
            self.pending.clear();
            stream.close_stream()?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // In-memory stream: reads come from scripted chunks, writes are captured.
    #[derive(Default)]
    struct ScriptedStream {
        chunks: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        closed: bool,
    }

    impl ScriptedStream {
        fn with_chunks(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
                ..Default::default()
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl DuplexStream for ScriptedStream {
        fn set_reply_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn close_stream(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn send_appends_terminator() {
        let mut transport = StreamTransport::new(ScriptedStream::default(), "test");
        transport.send("*IDN?").unwrap();
        let stream = transport.stream.as_ref().unwrap();
        assert_eq!(stream.written, b"*IDN?\0");
    }

    #[test]
    fn receive_strips_only_the_terminator() {
        let stream = ScriptedStream::with_chunks(&[b" IDLE,COMMUNICATION \0"]);
        let mut transport = StreamTransport::new(stream, "test");
        assert_eq!(transport.receive(WAIT).unwrap(), " IDLE,COMMUNICATION ");
    }

    #[test]
    fn receive_joins_split_reads() {
        let stream = ScriptedStream::with_chunks(&[b"ANRITSU,MD", b"8475A\0"]);
        let mut transport = StreamTransport::new(stream, "test");
        assert_eq!(transport.receive(WAIT).unwrap(), "ANRITSU,MD8475A");
    }

    #[test]
    fn receive_keeps_bytes_past_the_terminator() {
        let stream = ScriptedStream::with_chunks(&[b"0\01\0"]);
        let mut transport = StreamTransport::new(stream, "test");
        assert_eq!(transport.receive(WAIT).unwrap(), "0");
        assert_eq!(transport.receive(WAIT).unwrap(), "1");
    }

    #[test]
    fn embedded_terminator_is_refused_before_writing() {
        let mut transport = StreamTransport::new(ScriptedStream::default(), "test");
        assert!(matches!(
            transport.send("SAVESEQLOG \"a\0*IDN?\""),
            Err(CallboxError::InvalidValue(_))
        ));
        assert!(transport.stream.as_ref().unwrap().written.is_empty());
    }

    #[test]
    fn non_utf8_reply_is_an_error_and_stream_stays_in_step() {
        let stream = ScriptedStream::with_chunks(&[b"\xff\xfe\01\0"]);
        let mut transport = StreamTransport::new(stream, "test");
        assert!(matches!(
            transport.receive(WAIT),
            Err(CallboxError::Transport(ref e)) if e.kind() == io::ErrorKind::InvalidData
        ));
        assert_eq!(transport.receive(WAIT).unwrap(), "1");
    }

    #[test]
    fn peer_close_mid_frame_returns_partial_payload() {
        let stream = ScriptedStream::with_chunks(&[b"NOTRUN"]);
        let mut transport = StreamTransport::new(stream, "test");
        assert_eq!(transport.receive(WAIT).unwrap(), "NOTRUN");
    }

    #[test]
    fn peer_close_without_data_is_a_connection_error() {
        let mut transport = StreamTransport::new(ScriptedStream::default(), "test");
        assert!(matches!(
            transport.receive(WAIT),
            Err(CallboxError::Connection { .. })
        ));
    }

    #[test]
    fn read_timeout_maps_to_timeout() {
        let mut stream = ScriptedStream::default();
        stream
            .chunks
            .push_back(Err(io::Error::new(io::ErrorKind::WouldBlock, "no data")));
        let mut transport = StreamTransport::new(stream, "test");
        assert!(matches!(
            transport.receive(WAIT),
            Err(CallboxError::Timeout(d)) if d == WAIT
        ));
    }

    #[test]
    fn reset_maps_to_transport_error() {
        let mut stream = ScriptedStream::default();
        stream
            .chunks
            .push_back(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        let mut transport = StreamTransport::new(stream, "test");
        assert!(matches!(
            transport.receive(WAIT),
            Err(CallboxError::Transport(_))
        ));
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_use() {
        let mut transport = StreamTransport::new(ScriptedStream::default(), "test");
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(!transport.is_open());
        assert!(matches!(transport.send("STAT?"), Err(CallboxError::SessionClosed)));
        assert!(matches!(
            transport.receive(WAIT),
            Err(CallboxError::SessionClosed)
        ));
    }
}
