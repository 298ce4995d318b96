//! One handler per remote operation.
//!
//! Every handler decodes its arguments in wire order, drains any uploads
//! before validating, validates each handle against the connection's
//! registry and only then calls the driver. Validation and driver
//! failures are ordinary replies; an `Err` ends the connection.

pub mod context;
pub mod enqueue;
pub mod event;
pub mod kernel;
pub mod memory;
pub mod platform;
pub mod program;

use rcl_protocol::status::{CL_INVALID_VALUE, CL_SUCCESS};
use rcl_protocol::{Handle, Reply, ResourceKind, Status};

use crate::driver::DriverResult;
use crate::error::ConnectionError;
use crate::session::Session;

pub type HandlerResult = Result<(), ConnectionError>;

/// Apply the client's `value_size` to a complete info value.
fn sized_value(value: DriverResult<Vec<u8>>, value_size: u64) -> DriverResult<Vec<u8>> {
    let value = value?;
    if value_size > 0 && value_size < value.len() as u64 {
        return Err(CL_INVALID_VALUE);
    }
    Ok(value)
}

/// The value an info reply hands to the client, if it carries one.
pub(crate) fn delivered(value: &DriverResult<Vec<u8>>, value_size: u64) -> Option<&[u8]> {
    match value {
        Ok(v) if value_size > 0 && value_size >= v.len() as u64 => Some(v.as_slice()),
        _ => None,
    }
}

/// `[i32 status][u64 size_ret][value]`, value only on success with a
/// non-zero `value_size`.
pub(crate) fn info_reply(value: DriverResult<Vec<u8>>, value_size: u64) -> Reply {
    match sized_value(value, value_size) {
        Ok(v) => {
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_u64(v.len() as u64);
            if value_size > 0 {
                reply.put_bytes(&v);
            }
            reply
        }
        Err(status) => {
            let mut reply = Reply::status(status);
            reply.put_u64(0);
            reply
        }
    }
}

/// Info reply whose value travels as a bulk frame after the fixed part.
pub(crate) fn send_bulk_info(
    s: &mut Session,
    value: DriverResult<Vec<u8>>,
    value_size: u64,
) -> HandlerResult {
    match sized_value(value, value_size) {
        Ok(v) => {
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_u64(v.len() as u64);
            s.send(reply)?;
            if value_size > 0 {
                s.download(&v)?;
            }
            Ok(())
        }
        Err(status) => {
            let mut reply = Reply::status(status);
            reply.put_u64(0);
            s.send(reply)
        }
    }
}

/// `[i32 status][u64 handle]`, registering the handle on success.
pub(crate) fn send_created(
    s: &mut Session,
    kind: ResourceKind,
    result: DriverResult<Handle>,
) -> HandlerResult {
    let reply = match result {
        Ok(handle) => {
            s.track(kind, handle);
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_handle(handle);
            reply
        }
        Err(status) => {
            let mut reply = Reply::status(status);
            reply.put_handle(Handle::null());
            reply
        }
    };
    s.send(reply)
}

pub(crate) fn send_status(s: &mut Session, status: Status) -> HandlerResult {
    s.send(Reply::status(status))
}

pub(crate) fn status_of(result: DriverResult<()>) -> Status {
    result.err().unwrap_or(CL_SUCCESS)
}

/// Retain/release handler pairs for kinds whose wire handle is the driver
/// handle.
macro_rules! refcount_handlers {
    ($($retain:ident, $release:ident => $kind:expr;)+) => {
        $(
            pub fn $retain(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
                let handle = r.handle()?;
                let status = s.retain($kind, handle);
                crate::handlers::send_status(s, status)
            }

            pub fn $release(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
                let handle = r.handle()?;
                let status = s.release($kind, handle);
                crate::handlers::send_status(s, status)
            }
        )+
    };
}

/// `object, u32 param, u64 value_size` info handlers forwarded as-is.
macro_rules! info_handlers {
    ($($name:ident => $kind:expr;)+) => {
        $(
            pub fn $name(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
                let object = r.handle()?;
                let param = r.u32()?;
                let value_size = r.u64()?;
                let value = s
                    .check($kind, object)
                    .and_then(|()| s.driver().info($kind, object, param));
                s.send(crate::handlers::info_reply(value, value_size))
            }
        )+
    };
}

pub(crate) use info_handlers;
pub(crate) use refcount_handlers;

#[cfg(test)]
mod tests {
    use super::*;
    use rcl_protocol::PayloadReader;

    fn decode(reply: Reply) -> (i32, u64, Vec<u8>) {
        let bytes = reply.freeze();
        let mut r = PayloadReader::new(&bytes);
        let status = r.i32().unwrap();
        let size = r.u64().unwrap();
        let rest = r.bytes(r.remaining() as u64).unwrap().to_vec();
        (status, size, rest)
    }

    #[test]
    fn info_reply_applies_value_size() {
        let value = || Ok(b"abcd".to_vec());
        assert_eq!(decode(info_reply(value(), 0)), (CL_SUCCESS, 4, vec![]));
        assert_eq!(decode(info_reply(value(), 16)), (CL_SUCCESS, 4, b"abcd".to_vec()));
        assert_eq!(decode(info_reply(value(), 2)), (CL_INVALID_VALUE, 0, vec![]));
    }

    #[test]
    fn only_sent_values_are_delivered() {
        let value = Ok(vec![0u8; 16]);
        assert_eq!(delivered(&value, 0), None);
        assert_eq!(delivered(&value, 8), None);
        assert_eq!(delivered(&value, 16), Some(&[0u8; 16][..]));
        assert_eq!(delivered(&Err(-33), 16), None);
    }

    #[test]
    fn failed_info_keeps_shape() {
        assert_eq!(decode(info_reply(Err(-33), 8)), (-33, 0, vec![]));
    }
}
