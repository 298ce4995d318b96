//! Length-prefixed framing over blocking sockets.
//!
//! Bulk payloads travel as `[u64 total_len]` followed by `total_len /
//! chunk_size` full chunks and one short chunk for the remainder. Before any
//! bulk payload the server writes `[u64 chunk_size]`; on uploads an
//! announcement of 0 tells the client the destination could not be
//! allocated and nothing must be sent.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use rcl_protocol::wire::SIZE_PREFIX_LEN;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Result of polling the socket for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePoll {
    /// Nothing arrived within the poll interval.
    Idle,
    /// At least one byte of the next frame is waiting.
    Ready,
    /// The peer closed the connection.
    Closed,
}

/// One accepted client socket.
pub struct Channel {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl Channel {
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(None)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Peek for the next frame, waiting at most `timeout`.
    pub fn poll_frame(&self, timeout: Duration) -> Result<FramePoll, TransportError> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        let mut byte = [0u8; 1];
        let peeked = self.stream.peek(&mut byte);
        self.stream.set_read_timeout(None)?;

        match peeked {
            Ok(0) => Ok(FramePoll::Closed),
            Ok(_) => Ok(FramePoll::Ready),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(FramePoll::Idle)
            }
            Err(e) => Err(TransportError::from_read(e)),
        }
    }

    /// Read one message frame and return its payload (command id + args).
    pub fn read_frame(&mut self, max_message_size: u64) -> Result<Vec<u8>, TransportError> {
        let len = read_u64(self)?;
        if len == 0 {
            return Err(TransportError::EmptyFrame);
        }
        if len > max_message_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: max_message_size,
            });
        }
        let mut payload = try_alloc(len).ok_or(TransportError::OutOfMemory { requested: len })?;
        recv_exact(self, &mut payload)?;
        trace!(len, "frame received");
        Ok(payload)
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("socket shutdown: {}", e);
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Zeroed buffer of `len` bytes, or `None` when the allocation fails.
pub fn try_alloc(len: u64) -> Option<Vec<u8>> {
    let len = usize::try_from(len).ok()?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

pub fn send_all<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> Result<(), TransportError> {
    w.write_all(buf).map_err(|e| match e.kind() {
        io::ErrorKind::WriteZero | io::ErrorKind::BrokenPipe => TransportError::Closed,
        _ => TransportError::Io(e),
    })
}

pub fn recv_exact<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    r.read_exact(buf).map_err(TransportError::from_read)
}

pub fn read_u64<R: Read + ?Sized>(r: &mut R) -> Result<u64, TransportError> {
    let mut b = [0u8; SIZE_PREFIX_LEN];
    recv_exact(r, &mut b)?;
    Ok(u64::from_le_bytes(b))
}

pub fn read_u32<R: Read + ?Sized>(r: &mut R) -> Result<u32, TransportError> {
    let mut b = [0u8; 4];
    recv_exact(r, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> Result<i32, TransportError> {
    let mut b = [0u8; 4];
    recv_exact(r, &mut b)?;
    Ok(i32::from_le_bytes(b))
}

/// Write a bulk frame using `chunk_size` chunks.
pub fn send_bulk<W: Write + ?Sized>(
    w: &mut W,
    data: &[u8],
    chunk_size: u64,
) -> Result<(), TransportError> {
    send_all(w, &(data.len() as u64).to_le_bytes())?;
    for chunk in data.chunks(chunk_len(chunk_size)) {
        send_all(w, chunk)?;
    }
    Ok(())
}

/// Fill `buf` with bulk data read in `chunk_size` chunks.
fn recv_chunks<R: Read + ?Sized>(
    r: &mut R,
    buf: &mut [u8],
    chunk_size: u64,
) -> Result<(), TransportError> {
    for chunk in buf.chunks_mut(chunk_len(chunk_size)) {
        recv_exact(r, chunk)?;
    }
    Ok(())
}

/// Read and discard `len` bytes of bulk data.
pub fn drain<R: Read + ?Sized>(r: &mut R, len: u64, chunk_size: u64) -> Result<(), TransportError> {
    let mut scratch = vec![0u8; chunk_len(chunk_size)];
    let mut left = len;
    while left > 0 {
        let n = left.min(scratch.len() as u64) as usize;
        recv_exact(r, &mut scratch[..n])?;
        left -= n as u64;
    }
    Ok(())
}

/// Read a bulk frame. Returns `None` when the destination buffer could not
/// be allocated; the frame is drained in that case.
pub fn recv_bulk<R: Read + ?Sized>(
    r: &mut R,
    chunk_size: u64,
    max_bulk_size: u64,
) -> Result<Option<Vec<u8>>, TransportError> {
    let len = read_u64(r)?;
    if len > max_bulk_size {
        return Err(TransportError::BulkTooLarge {
            size: len,
            limit: max_bulk_size,
        });
    }
    match try_alloc(len) {
        Some(mut buf) => {
            recv_chunks(r, &mut buf, chunk_size)?;
            Ok(Some(buf))
        }
        None => {
            debug!(len, "bulk allocation failed, draining");
            drain(r, len, chunk_size)?;
            Ok(None)
        }
    }
}

/// Server side of an upload of unknown length: announce, then receive.
pub fn recv_upload<S: Read + Write + ?Sized>(
    s: &mut S,
    chunk_size: u64,
    max_bulk_size: u64,
) -> Result<Option<Vec<u8>>, TransportError> {
    send_all(s, &chunk_size.to_le_bytes())?;
    recv_bulk(s, chunk_size, max_bulk_size)
}

/// Server side of an upload whose length is already known from the request.
/// When the buffer cannot be allocated a 0 chunk size is announced and no
/// data is read.
pub fn recv_upload_sized<S: Read + Write + ?Sized>(
    s: &mut S,
    expected: u64,
    chunk_size: u64,
    max_bulk_size: u64,
) -> Result<Option<Vec<u8>>, TransportError> {
    if expected > max_bulk_size {
        return Err(TransportError::BulkTooLarge {
            size: expected,
            limit: max_bulk_size,
        });
    }
    let Some(mut buf) = try_alloc(expected) else {
        debug!(expected, "upload allocation failed, refusing transfer");
        send_all(s, &0u64.to_le_bytes())?;
        return Ok(None);
    };
    send_all(s, &chunk_size.to_le_bytes())?;
    let len = read_u64(s)?;
    if len != expected {
        return Err(TransportError::LengthMismatch { expected, got: len });
    }
    recv_chunks(s, &mut buf, chunk_size)?;
    Ok(Some(buf))
}

/// Server side of a download: announce the chunk size, then send.
pub fn send_download<W: Write + ?Sized>(
    w: &mut W,
    data: &[u8],
    chunk_size: u64,
) -> Result<(), TransportError> {
    send_all(w, &chunk_size.to_le_bytes())?;
    send_bulk(w, data, chunk_size)
}

/// Client side of an upload. Returns `false` when the server refused it.
pub fn send_upload<S: Read + Write + ?Sized>(
    s: &mut S,
    data: &[u8],
) -> Result<bool, TransportError> {
    let chunk_size = read_u64(s)?;
    if chunk_size == 0 {
        return Ok(false);
    }
    send_bulk(s, data, chunk_size)?;
    Ok(true)
}

/// Client side of a download.
pub fn recv_download<R: Read + ?Sized>(
    r: &mut R,
    max_bulk_size: u64,
) -> Result<Vec<u8>, TransportError> {
    let chunk_size = read_u64(r)?;
    let len = read_u64(r)?;
    if len > max_bulk_size {
        return Err(TransportError::BulkTooLarge {
            size: len,
            limit: max_bulk_size,
        });
    }
    let mut buf = try_alloc(len).ok_or(TransportError::OutOfMemory { requested: len })?;
    recv_chunks(r, &mut buf, chunk_size)?;
    Ok(buf)
}

fn chunk_len(chunk_size: u64) -> usize {
    usize::try_from(chunk_size).unwrap_or(usize::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    const CHUNK: u64 = 1024;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn bulk_round_trip_at_chunk_boundaries() {
        let c = CHUNK as usize;
        for len in [0, 1, c - 1, c, c + 1, c * 64 + 17] {
            let data = pattern(len);
            let mut wire = Vec::new();
            send_bulk(&mut wire, &data, CHUNK).unwrap();
            assert_eq!(wire.len(), 8 + len);

            let got = recv_bulk(&mut Cursor::new(wire), CHUNK, u64::MAX).unwrap();
            assert_eq!(got.as_deref(), Some(data.as_slice()), "len {}", len);
        }
    }

    #[test]
    fn bulk_over_limit_is_rejected() {
        let mut wire = Vec::new();
        send_bulk(&mut wire, &pattern(100), CHUNK).unwrap();
        match recv_bulk(&mut Cursor::new(wire), CHUNK, 99) {
            Err(TransportError::BulkTooLarge { size: 100, limit: 99 }) => {}
            other => panic!("expected BulkTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn short_stream_reports_closed() {
        let mut wire = Vec::new();
        send_bulk(&mut wire, &pattern(10), CHUNK).unwrap();
        wire.truncate(12);
        match recv_bulk(&mut Cursor::new(wire), CHUNK, u64::MAX) {
            Err(TransportError::Closed) => {}
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[test]
    fn drain_consumes_exact_length() {
        let mut wire = pattern(3000);
        wire.extend_from_slice(&[0xAA, 0xBB]);
        let mut cur = Cursor::new(wire);
        drain(&mut cur, 3000, CHUNK).unwrap();
        let mut tail = [0u8; 2];
        recv_exact(&mut cur, &mut tail).unwrap();
        assert_eq!(tail, [0xAA, 0xBB]);
    }

    #[test]
    fn download_carries_announcement() {
        let data = pattern(2500);
        let mut wire = Vec::new();
        send_download(&mut wire, &data, 512).unwrap();
        assert_eq!(&wire[..8], &512u64.to_le_bytes());
        let got = recv_download(&mut Cursor::new(wire), u64::MAX).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn sized_upload_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let data = pattern(4097);
        let expected = data.clone();

        let client = std::thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            assert!(send_upload(&mut s, &data).unwrap());
        });

        let (stream, _) = listener.accept().unwrap();
        let mut ch = Channel::new(stream).unwrap();
        let got = recv_upload_sized(&mut ch, 4097, CHUNK, u64::MAX).unwrap();
        assert_eq!(got, Some(expected));
        client.join().unwrap();
    }

    #[test]
    fn unallocatable_upload_is_refused_with_zero_chunk() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            assert!(!send_upload(&mut s, &pattern(16)).unwrap());
            // Nothing of the upload was sent; the next bytes are a new message.
            s.write_all(&0xC0DEu32.to_le_bytes()).unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        let mut ch = Channel::new(stream).unwrap();
        let got = recv_upload_sized(&mut ch, u64::MAX, CHUNK, u64::MAX).unwrap();
        assert_eq!(got, None);
        assert_eq!(read_u32(&mut ch).unwrap(), 0xC0DE);
        client.join().unwrap();
    }

    #[test]
    fn poll_frame_sees_idle_ready_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let mut ch = Channel::new(stream).unwrap();

        assert_eq!(ch.poll_frame(Duration::from_millis(20)).unwrap(), FramePoll::Idle);

        let frame = rcl_protocol::Request::new(rcl_protocol::Command::GetPlatformIDs)
            .u32(0)
            .finish();
        client.write_all(&frame).unwrap();
        assert_eq!(ch.poll_frame(Duration::from_secs(5)).unwrap(), FramePoll::Ready);
        let payload = ch.read_frame(1024).unwrap();
        assert_eq!(payload.len(), 8);

        drop(client);
        assert_eq!(ch.poll_frame(Duration::from_secs(5)).unwrap(), FramePoll::Closed);
    }

    #[test]
    fn oversized_and_empty_frames_are_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let mut ch = Channel::new(stream).unwrap();

        client.write_all(&0u64.to_le_bytes()).unwrap();
        assert!(matches!(ch.read_frame(64), Err(TransportError::EmptyFrame)));

        client.write_all(&65u64.to_le_bytes()).unwrap();
        assert!(matches!(
            ch.read_frame(64),
            Err(TransportError::FrameTooLarge { size: 65, limit: 64 })
        ));
    }
}
