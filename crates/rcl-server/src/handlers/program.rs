//! Programs: creation from source or binaries, builds and queries.

use rcl_protocol::cl::CL_PROGRAM_DEVICES;
use rcl_protocol::status::{CL_OUT_OF_HOST_MEMORY, CL_SUCCESS};
use rcl_protocol::{Handle, PayloadReader, Reply, ResourceKind};

use super::{
    delivered, refcount_handlers, send_bulk_info, send_created, send_status, status_of,
    HandlerResult,
};
use crate::driver::handles_from_info;
use crate::error::ConnectionError;
use crate::session::Session;

/// Receive `count` uploads. `None` when any of them could not be stored;
/// every upload is drained regardless.
fn receive_all(s: &mut Session, count: u32) -> Result<Option<Vec<Vec<u8>>>, ConnectionError> {
    let mut parts = Vec::new();
    let mut complete = true;
    for _ in 0..count {
        match s.upload()? {
            Some(part) if complete => parts.push(part),
            Some(_) => {}
            None => complete = false,
        }
    }
    Ok(complete.then_some(parts))
}

pub fn create_program_with_source(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let count = r.u32()?;
    let sources = receive_all(s, count)?;

    let result = sources.ok_or(CL_OUT_OF_HOST_MEMORY).and_then(|sources| {
        s.check(ResourceKind::Context, context)?;
        s.driver().create_program_with_source(context, &sources)
    });
    send_created(s, ResourceKind::Program, result)
}

pub fn create_program_with_binary(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let num_devices = r.u32()?;
    let devices = r.handles(num_devices as u64)?;
    let binaries = receive_all(s, num_devices)?;

    let checked = binaries.ok_or(CL_OUT_OF_HOST_MEMORY).and_then(|binaries| {
        s.check(ResourceKind::Context, context)?;
        s.check_all(ResourceKind::Device, &devices)?;
        Ok(binaries)
    });
    let (result, statuses) = match checked {
        Ok(binaries) => s.driver().create_program_with_binary(context, &devices, &binaries),
        Err(status) => (Err(status), vec![status; devices.len()]),
    };

    let mut reply = match result {
        Ok(program) => {
            s.track(ResourceKind::Program, program);
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_handle(program);
            reply
        }
        Err(status) => {
            let mut reply = Reply::status(status);
            reply.put_handle(Handle::null());
            reply
        }
    };
    for i in 0..devices.len() {
        reply.put_i32(statuses.get(i).copied().unwrap_or(CL_SUCCESS));
    }
    s.send(reply)
}

pub fn build_program(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let program = r.handle()?;
    let num_devices = r.u32()?;
    let devices = r.handles(num_devices as u64)?;
    let options = s.upload()?;

    let result = options.ok_or(CL_OUT_OF_HOST_MEMORY).and_then(|options| {
        s.check(ResourceKind::Program, program)?;
        s.check_all(ResourceKind::Device, &devices)?;
        s.driver().build_program(program, &devices, &options)
    });
    send_status(s, status_of(result))
}

pub fn get_program_build_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let program = r.handle()?;
    let device = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = s
        .check(ResourceKind::Program, program)
        .and_then(|()| s.check(ResourceKind::Device, device))
        .and_then(|()| s.driver().program_build_info(program, device, param));
    send_bulk_info(s, value, value_size)
}

pub fn get_program_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let program = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = s
        .check(ResourceKind::Program, program)
        .and_then(|()| s.driver().info(ResourceKind::Program, program, param));
    if param == CL_PROGRAM_DEVICES {
        if let Some(v) = delivered(&value, value_size) {
            for device in handles_from_info(v) {
                s.track(ResourceKind::Device, device);
            }
        }
    }
    send_bulk_info(s, value, value_size)
}

refcount_handlers! {
    retain_program, release_program => ResourceKind::Program;
}
