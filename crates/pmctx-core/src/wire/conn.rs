//! Framed request/response over a byte stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};
use tracing::trace;

use super::attr::{NameChecker, valid_container_name};
use super::frame::{HEADER_LEN, parse_header};
use super::messages::Pdu;
use crate::error::{ErrorKind, PmError};

/// Byte stream able to bound how long a read may block.
pub trait Transport: Read + Write {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Aborts the stream; any blocked peer read sees end of file.
    fn close(&mut self) {}
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

pub struct Connection<S: Transport = TcpStream> {
    stream: S,
    max_frame_len: usize,
    from: u32,
    checker: NameChecker,
}

impl<S: Transport> Connection<S> {
    /// `from` is stamped into the header of every frame sent.
    pub fn new(stream: S, max_frame_len: usize, from: u32) -> Self {
        Self {
            stream,
            max_frame_len,
            from,
            checker: valid_container_name,
        }
    }

    pub fn with_name_checker(mut self, checker: NameChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn set_from(&mut self, from: u32) {
        self.from = from;
    }

    pub fn send(&mut self, pdu: &Pdu) -> Result<(), PmError> {
        let frame = pdu.encode(self.from)?;
        trace!(frame_type = ?pdu.frame_type(), len = frame.len(), "send frame");
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads one frame. `None` waits forever.
    ///
    /// A timeout bounds the whole frame, not each read: a peer trickling
    /// bytes still yields `Timeout` once the deadline passes. The header is
    /// validated against the frame ceiling before any payload byte is read.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Pdu, PmError> {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);
        if deadline.is_none() {
            self.stream.set_read_timeout(None)?;
        }

        let mut header = [0u8; HEADER_LEN];
        self.read_full(&mut header, deadline)?;
        let parsed = parse_header(&header, self.max_frame_len)?;

        let mut frame = vec![0u8; parsed.len];
        frame[..HEADER_LEN].copy_from_slice(&header);
        self.read_full(&mut frame[HEADER_LEN..], deadline)?;
        trace!(frame_type = ?parsed.frame_type, len = parsed.len, "recv frame");

        Pdu::decode_with(&frame, self.checker)
    }

    fn read_full(
        &mut self,
        mut buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<(), PmError> {
        while !buf.is_empty() {
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(PmError::new(
                        ErrorKind::Timeout,
                        "frame not complete before deadline",
                    ));
                }
                self.stream.set_read_timeout(Some(remaining))?;
            }
            match self.stream.read(buf) {
                Ok(0) => {
                    return Err(PmError::new(
                        ErrorKind::ConnectionFailed,
                        "peer closed connection mid-frame",
                    ));
                }
                Ok(n) => buf = &mut std::mem::take(&mut buf)[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Sends a request and waits for the reply.
    pub fn request(&mut self, pdu: &Pdu, timeout: Option<Duration>) -> Result<Pdu, PmError> {
        self.send(pdu)?;
        self.recv(timeout)
    }

    pub fn close(&mut self) {
        self.stream.close();
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pmid;
    use std::io::Cursor;
    use std::net::TcpListener;

    struct Pipe {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Pipe {
        fn set_read_timeout(&mut self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn pipe(input: Vec<u8>) -> Connection<Pipe> {
        Connection::new(
            Pipe {
                input: Cursor::new(input),
                output: Vec::new(),
            },
            4096,
            0,
        )
    }

    #[test]
    fn test_oversized_frame_rejected_before_payload() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(1u32 << 20).to_be_bytes());
        bytes.extend_from_slice(&0x7001u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        let mut conn = pipe(bytes);
        let err = conn.recv(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(conn.get_ref().input.position(), HEADER_LEN as u64);
    }

    #[test]
    fn test_eof_is_connection_failure() {
        let frame = Pdu::Error { code: 0 }.encode(0).unwrap();
        let mut conn = pipe(frame[..6].to_vec());
        assert_eq!(conn.recv(None).unwrap_err().kind(), ErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_tcp_request_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut conn = Connection::new(stream, 4096, 0);
            match conn.recv(None).unwrap() {
                Pdu::DescReq { pmid } => assert_eq!(pmid, Pmid::new(1, 2, 3)),
                other => panic!("unexpected {other:?}"),
            }
            conn.send(&Pdu::Error { code: -12358 }).unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut conn = Connection::new(stream, 4096, 1);
        let reply = conn
            .request(
                &Pdu::DescReq {
                    pmid: Pmid::new(1, 2, 3),
                },
                Some(Duration::from_secs(5)),
            )
            .unwrap();
        assert_eq!(reply, Pdu::Error { code: -12358 });
        server.join().unwrap();
    }

    #[test]
    fn test_trickling_peer_times_out_within_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let frame = Pdu::Error { code: 0 }.encode(0).unwrap();
            for byte in frame {
                if stream.write_all(&[byte]).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(150));
            }
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut conn = Connection::new(stream, 4096, 1);
        let started = Instant::now();
        let err = conn.recv(Some(Duration::from_millis(200))).unwrap_err();
        let elapsed = started.elapsed();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(elapsed < Duration::from_millis(800), "took {elapsed:?}");
        conn.close();
        server.join().unwrap();
    }

    #[test]
    fn test_peer_stalling_mid_frame_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let (mut held, _) = listener.accept().unwrap();
        let frame = Pdu::Error { code: 0 }.encode(0).unwrap();
        held.write_all(&frame[..HEADER_LEN + 1]).unwrap();

        let mut conn = Connection::new(stream, 4096, 1);
        let started = Instant::now();
        let err = conn.recv(Some(Duration::from_millis(100))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[test]
    fn test_silent_peer_timeout_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let (_held, _) = listener.accept().unwrap();

        let mut conn = Connection::new(stream, 4096, 1);
        let started = Instant::now();
        let err = conn.recv(Some(Duration::from_millis(100))).unwrap_err();
        let elapsed = started.elapsed();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(elapsed >= Duration::from_millis(90), "took {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }
}
