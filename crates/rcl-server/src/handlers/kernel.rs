//! Kernels: creation, arguments and queries.

use rcl_protocol::status::{CL_INVALID_ARG_VALUE, CL_INVALID_VALUE, CL_SUCCESS};
use rcl_protocol::{Handle, PayloadReader, Reply, ResourceKind};
use tracing::{debug, warn};

use super::{
    info_handlers, info_reply, refcount_handlers, send_created, send_status, status_of,
    HandlerResult,
};
use crate::session::Session;

pub fn create_kernel(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let program = r.handle()?;
    let len = r.u64()?;
    let name = r.bytes(len)?;

    let result = s
        .check(ResourceKind::Program, program)
        .and_then(|()| s.driver().create_kernel(program, name));
    send_created(s, ResourceKind::Kernel, result)
}

pub fn create_kernels_in_program(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let program = r.handle()?;
    let num_kernels = r.u32()?;

    let driver = s.driver();
    let created = s
        .check(ResourceKind::Program, program)
        .and_then(|()| driver.create_kernels_in_program(program));

    let reply = match created {
        // A count query, or too little room: nothing is handed out.
        Ok(kernels) if num_kernels == 0 || (num_kernels as usize) < kernels.len() => {
            for k in &kernels {
                if let Err(status) = driver.release(ResourceKind::Kernel, *k) {
                    warn!(kernel = %k, status, "failed to release unreturned kernel");
                }
            }
            let status = if num_kernels == 0 { CL_SUCCESS } else { CL_INVALID_VALUE };
            let mut reply = Reply::status(status);
            reply.put_u32(if status == CL_SUCCESS { kernels.len() as u32 } else { 0 });
            reply
        }
        Ok(kernels) => {
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_u32(kernels.len() as u32);
            for k in kernels {
                s.track(ResourceKind::Kernel, k);
                reply.put_handle(k);
            }
            reply
        }
        Err(status) => {
            let mut reply = Reply::status(status);
            reply.put_u32(0);
            reply
        }
    };
    s.send(reply)
}

pub fn set_kernel_arg(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let kernel = r.handle()?;
    let index = r.u32()?;
    let size = r.u64()?;
    let has_value = r.bool()?;
    let value = if has_value { Some(r.bytes(size)?) } else { None };

    let result = s.check(ResourceKind::Kernel, kernel).and_then(|()| {
        // A pointer-sized value naming another client's object would give
        // this client access to it.
        if let Some(bytes) = value.filter(|v| v.len() == 8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            let candidate = Handle(u64::from_le_bytes(raw));
            if s.owned_elsewhere(candidate) {
                debug!(
                    conn = %s.id(), %kernel, index, handle = %candidate,
                    "argument names a foreign object"
                );
                return Err(CL_INVALID_ARG_VALUE);
            }
        }
        s.driver().set_kernel_arg(kernel, index, size, value)
    });
    send_status(s, status_of(result))
}

pub fn get_kernel_work_group_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let kernel = r.handle()?;
    let device = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = s
        .check(ResourceKind::Kernel, kernel)
        .and_then(|()| s.check_optional(ResourceKind::Device, device))
        .and_then(|()| s.driver().kernel_work_group_info(kernel, device, param));
    s.send(info_reply(value, value_size))
}

pub fn get_kernel_arg_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let kernel = r.handle()?;
    let index = r.u32()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let value = s
        .check(ResourceKind::Kernel, kernel)
        .and_then(|()| s.driver().kernel_arg_info(kernel, index, param));
    s.send(info_reply(value, value_size))
}

info_handlers! {
    get_kernel_info => ResourceKind::Kernel;
}

refcount_handlers! {
    retain_kernel, release_kernel => ResourceKind::Kernel;
}
