//! Fixed little-endian argument encoding.
//!
//! A message frame is `[u64 length][u32 command][args]`, where `length`
//! counts the command id and the args. Handles travel as `u64`, `size_t`
//! as `u64`, `cl_uint` and enums as `u32`, `cl_int` as `i32`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::handle::Handle;
use crate::status::Status;

/// Size of the frame length prefix.
pub const SIZE_PREFIX_LEN: usize = 8;

/// Size of the command id that opens every payload.
pub const COMMAND_ID_LEN: usize = 4;

/// Chunk size used for bulk transfers unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024;

/// Default limit on a single message frame: 256 MB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 256 * 1024 * 1024;

/// Default limit on a single bulk frame: 4 GB.
pub const DEFAULT_MAX_BULK_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated arguments: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("element count {count} exceeds the remaining payload")]
    CountTooLarge { count: u64 },
}

/// Event wait list carried by every enqueue-style request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitList {
    pub events: Vec<Handle>,
    /// Whether the client wants an event handle back.
    pub want_event: bool,
}

/// Cursor over the arguments of one message.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), WireError> {
        if self.buf.remaining() < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32(&mut self) -> Result<i32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn bool(&mut self) -> Result<bool, WireError> {
        Ok(self.u32()? != 0)
    }

    pub fn handle(&mut self) -> Result<Handle, WireError> {
        self.u64().map(Handle)
    }

    /// Three `u64` values: an origin or a region.
    pub fn triple(&mut self) -> Result<[u64; 3], WireError> {
        Ok([self.u64()?, self.u64()?, self.u64()?])
    }

    /// `count` handles. The count is checked against the remaining bytes
    /// before anything is allocated.
    pub fn handles(&mut self, count: u64) -> Result<Vec<Handle>, WireError> {
        self.u64_array(count).map(|v| v.into_iter().map(Handle).collect())
    }

    pub fn u64_array(&mut self, count: u64) -> Result<Vec<u64>, WireError> {
        let bytes = count
            .checked_mul(8)
            .filter(|b| *b <= self.buf.remaining() as u64)
            .ok_or(WireError::CountTooLarge { count })?;
        let mut out = Vec::with_capacity(bytes as usize / 8);
        for _ in 0..count {
            out.push(self.buf.get_u64_le());
        }
        Ok(out)
    }

    /// Raw bytes borrowed from the payload.
    pub fn bytes(&mut self, len: u64) -> Result<&'a [u8], WireError> {
        if len > self.buf.remaining() as u64 {
            return Err(WireError::CountTooLarge { count: len });
        }
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len as usize);
        self.buf = tail;
        Ok(head)
    }

    /// `[u32 n][u64 event x n][u32 want_event]`.
    pub fn wait_list(&mut self) -> Result<WaitList, WireError> {
        let n = self.u32()?;
        let events = self.handles(n as u64)?;
        let want_event = self.bool()?;
        Ok(WaitList { events, want_event })
    }
}

/// Reply payload builder. Replies carry no frame prefix.
#[derive(Debug, Default)]
pub struct Reply {
    buf: BytesMut,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(status: Status) -> Self {
        let mut r = Self::new();
        r.put_i32(status);
        r
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn put_handle(&mut self, h: Handle) -> &mut Self {
        self.put_u64(h.raw())
    }

    pub fn put_bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.put_slice(b);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Request builder used by clients: produces a complete message frame.
#[derive(Debug)]
pub struct Request {
    buf: BytesMut,
}

impl Request {
    pub fn new(cmd: Command) -> Self {
        Self::with_id(cmd.id())
    }

    /// A request with an arbitrary id, including ids outside the table.
    pub fn with_id(id: u32) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u64_le(0);
        buf.put_u32_le(id);
        Self { buf }
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn handle(self, h: Handle) -> Self {
        self.u64(h.raw())
    }

    pub fn bytes(mut self, b: &[u8]) -> Self {
        self.buf.put_slice(b);
        self
    }

    pub fn wait_list(mut self, events: &[Handle], want_event: bool) -> Self {
        self.buf.put_u32_le(events.len() as u32);
        for e in events {
            self.buf.put_u64_le(e.raw());
        }
        self.buf.put_u32_le(want_event as u32);
        self
    }

    /// Patch the length prefix and return the frame.
    pub fn finish(mut self) -> Vec<u8> {
        let len = (self.buf.len() - SIZE_PREFIX_LEN) as u64;
        self.buf[..SIZE_PREFIX_LEN].copy_from_slice(&len.to_le_bytes());
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_layout() {
        let frame = Request::new(Command::GetPlatformInfo)
            .handle(Handle(0xdead))
            .u32(0x0902)
            .u64(64)
            .finish();
        assert_eq!(frame.len(), 8 + 4 + 8 + 4 + 8);
        assert_eq!(u64::from_le_bytes(frame[..8].try_into().unwrap()), 24);
        assert_eq!(u32::from_le_bytes(frame[8..12].try_into().unwrap()), 1);

        let mut r = PayloadReader::new(&frame[12..]);
        assert_eq!(r.handle().unwrap(), Handle(0xdead));
        assert_eq!(r.u32().unwrap(), 0x0902);
        assert_eq!(r.u64().unwrap(), 64);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_reports_sizes() {
        let mut r = PayloadReader::new(&[1, 2, 3]);
        match r.u32() {
            Err(WireError::Truncated { needed: 4, remaining: 3 }) => {}
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn oversized_count_does_not_allocate() {
        let payload = 0u64.to_le_bytes();
        let mut r = PayloadReader::new(&payload);
        assert!(matches!(
            r.handles(u64::MAX),
            Err(WireError::CountTooLarge { .. })
        ));
        assert!(matches!(r.handles(2), Err(WireError::CountTooLarge { count: 2 })));
        assert_eq!(r.handles(1).unwrap(), vec![Handle::null()]);
    }

    #[test]
    fn wait_list_decodes() {
        let frame = Request::new(Command::EnqueueMarkerWithWaitList)
            .wait_list(&[Handle(1), Handle(2)], true)
            .finish();
        let mut r = PayloadReader::new(&frame[12..]);
        let wl = r.wait_list().unwrap();
        assert_eq!(wl.events, vec![Handle(1), Handle(2)]);
        assert!(wl.want_event);
    }

    #[test]
    fn reply_is_little_endian() {
        let mut reply = Reply::status(-32);
        reply.put_u64(7);
        let bytes = reply.freeze();
        assert_eq!(&bytes[..4], &(-32i32).to_le_bytes());
        assert_eq!(&bytes[4..], &7u64.to_le_bytes());
    }
}
