//! Contexts and command queues.

use rcl_protocol::cl::{CL_CONTEXT_DEVICES, CL_CONTEXT_PLATFORM};
use rcl_protocol::{PayloadReader, ResourceKind, Status};

use super::{
    delivered, info_handlers, info_reply, refcount_handlers, send_created, send_status, status_of,
    HandlerResult,
};
use crate::driver::handles_from_info;
use crate::session::Session;

/// Validate the platform named in a zero-terminated property list.
fn check_properties(s: &Session, properties: &[u64]) -> Result<(), Status> {
    for pair in properties.chunks(2) {
        match pair {
            [0, ..] => break,
            [CL_CONTEXT_PLATFORM, platform] => {
                s.check(ResourceKind::Platform, (*platform).into())?
            }
            _ => {}
        }
    }
    Ok(())
}

pub fn create_context(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let num_properties = r.u64()?;
    let properties = r.u64_array(num_properties)?;
    let num_devices = r.u32()?;
    let devices = r.handles(num_devices as u64)?;

    let result = check_properties(s, &properties)
        .and_then(|()| s.check_all(ResourceKind::Device, &devices))
        .and_then(|()| s.driver().create_context(&properties, &devices));
    send_created(s, ResourceKind::Context, result)
}

pub fn create_context_from_type(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let num_properties = r.u64()?;
    let properties = r.u64_array(num_properties)?;
    let device_type = r.u64()?;

    let result = check_properties(s, &properties)
        .and_then(|()| s.driver().create_context_from_type(&properties, device_type));
    send_created(s, ResourceKind::Context, result)
}

pub fn get_context_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = s
        .check(ResourceKind::Context, context)
        .and_then(|()| s.driver().info(ResourceKind::Context, context, param));
    // Devices of a context created from a type were never enumerated here.
    if param == CL_CONTEXT_DEVICES {
        if let Some(v) = delivered(&value, value_size) {
            for device in handles_from_info(v) {
                s.track(ResourceKind::Device, device);
            }
        }
    }
    s.send(info_reply(value, value_size))
}

pub fn create_command_queue(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let device = r.handle()?;
    let properties = r.u64()?;

    let result = s
        .check(ResourceKind::Context, context)
        .and_then(|()| s.check(ResourceKind::Device, device))
        .and_then(|()| s.driver().create_command_queue(context, device, properties));
    send_created(s, ResourceKind::Queue, result)
}

pub fn flush(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let result = s.check(ResourceKind::Queue, queue).and_then(|()| s.driver().flush(queue));
    send_status(s, status_of(result))
}

pub fn finish(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let result = s.check(ResourceKind::Queue, queue).and_then(|()| s.driver().finish(queue));
    send_status(s, status_of(result))
}

info_handlers! {
    get_command_queue_info => ResourceKind::Queue;
}

refcount_handlers! {
    retain_context, release_context => ResourceKind::Context;
    retain_command_queue, release_command_queue => ResourceKind::Queue;
}
