//! Events. The client only ever sees wrapper handles; the native event
//! stays on the server.

use std::sync::Arc;

use rcl_protocol::cl::CL_EVENT_COMMAND_EXECUTION_STATUS;
use rcl_protocol::status::{
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST, CL_INVALID_EVENT, CL_INVALID_VALUE,
};
use rcl_protocol::{Handle, PayloadReader, ResourceKind, Status};

use super::{info_reply, send_created, send_status, status_of, HandlerResult};
use crate::driver::DriverResult;
use crate::event::ServerEvent;
use crate::session::Session;

/// Store a wrapper and register its wire handle on the connection.
pub(crate) fn register_event(s: &mut Session, event: Arc<ServerEvent>) -> Handle {
    let handle = s.events.insert(event);
    s.track(ResourceKind::Event, handle);
    handle
}

/// Validate a wire event handle and return its wrapper.
fn wrapper(s: &Session, event: Handle) -> Result<Arc<ServerEvent>, Status> {
    s.check(ResourceKind::Event, event)?;
    s.events.get(event).ok_or(CL_INVALID_EVENT)
}

fn native(s: &Session, event: Handle) -> Result<Handle, Status> {
    wrapper(s, event)?.native_handle().ok_or(CL_INVALID_EVENT)
}

pub fn wait_for_events(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let count = r.u32()?;
    let events = r.handles(count as u64)?;

    let session: &Session = s;
    let result = (|| -> DriverResult<()> {
        if events.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        let wrappers = events
            .iter()
            .map(|e| wrapper(session, *e))
            .collect::<Result<Vec<_>, _>>()?;
        // Pending transfers first; the driver knows nothing about them.
        for w in &wrappers {
            if w.wait() < 0 {
                return Err(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
            }
        }
        let natives = session.events.natives(&events);
        if natives.is_empty() {
            return Ok(());
        }
        session.driver().wait_for_events(&natives)
    })();
    send_status(s, status_of(result))
}

pub fn get_event_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let event = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = wrapper(s, event).and_then(|w| {
        if param == CL_EVENT_COMMAND_EXECUTION_STATUS && w.overrides_driver() {
            return Ok(w.status().to_le_bytes().to_vec());
        }
        let native = w.native_handle().ok_or(CL_INVALID_EVENT)?;
        s.driver().info(ResourceKind::Event, native, param)
    });
    s.send(info_reply(value, value_size))
}

pub fn get_event_profiling_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let event = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = native(s, event).and_then(|n| s.driver().event_profiling_info(n, param));
    s.send(info_reply(value, value_size))
}

pub fn retain_event(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let event = r.handle()?;
    let result = native(s, event).and_then(|n| s.driver().retain(ResourceKind::Event, n));
    if result.is_ok() {
        let _ = s.registry.retain(ResourceKind::Event, event);
    }
    send_status(s, status_of(result))
}

pub fn release_event(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let event = r.handle()?;
    let status = match native(s, event) {
        Ok(n) => {
            let status = status_of(s.driver().release(ResourceKind::Event, n));
            if s.drop_reference(ResourceKind::Event, event) {
                s.events.remove(event);
            }
            status
        }
        Err(status) => status,
    };
    send_status(s, status)
}

pub fn create_user_event(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let created = s
        .check(ResourceKind::Context, context)
        .and_then(|()| s.driver().create_user_event(context));
    let result = created.map(|native| register_event(s, ServerEvent::native(native)));
    send_created(s, ResourceKind::Event, result)
}

pub fn set_user_event_status(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let event = r.handle()?;
    let execution_status = r.i32()?;
    let result =
        native(s, event).and_then(|n| s.driver().set_user_event_status(n, execution_status));
    send_status(s, status_of(result))
}
