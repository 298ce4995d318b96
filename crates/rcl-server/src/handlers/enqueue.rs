//! Enqueue operations.
//!
//! Every driver call here is blocking: the server owns the staging memory.
//! For reads, the `blocking` flag only selects how the data travels back.
//! A blocking read streams it on this connection right after the reply; a
//! non-blocking read hands it to a side-channel transfer and reports the
//! event as `CL_SUBMITTED` until the client has received everything.

use rcl_protocol::cl::CL_IMAGE_ELEMENT_SIZE;
use rcl_protocol::status::{
    CL_COMPLETE, CL_INVALID_VALUE, CL_OUT_OF_HOST_MEMORY, CL_OUT_OF_RESOURCES, CL_SUCCESS,
};
use rcl_protocol::{Handle, PayloadReader, Reply, ResourceKind, Status, WireError};
use rcl_transport::framing::try_alloc;
use rcl_transport::TransferJob;
use tracing::debug;

use super::event::register_event;
use super::HandlerResult;
use crate::driver::{DriverResult, ImageRegion};
use crate::event::ServerEvent;
use crate::session::Session;

/// `[i32 status]` plus `[u64 event]` when the call succeeded and an event
/// was requested.
fn send_enqueued(
    s: &mut Session,
    result: DriverResult<Option<Handle>>,
    want_event: bool,
) -> HandlerResult {
    let reply = match result {
        Ok(native) => {
            let mut reply = Reply::status(CL_SUCCESS);
            if want_event {
                let event =
                    native.map_or(Handle::null(), |n| register_event(s, ServerEvent::native(n)));
                reply.put_handle(event);
            }
            reply
        }
        Err(status) => Reply::status(status),
    };
    s.send(reply)
}

/// Deliver data a driver read produced, on this connection or on a side
/// channel.
fn send_read(
    s: &mut Session,
    result: DriverResult<(Vec<u8>, Option<Handle>)>,
    blocking: bool,
    want_event: bool,
) -> HandlerResult {
    let (data, native) = match result {
        Ok(read) => read,
        Err(status) => return s.send(Reply::status(status)),
    };

    if blocking {
        send_enqueued(s, Ok(native), want_event)?;
        return s.download(&data);
    }

    let event = ServerEvent::pending(native);
    let mut reply = Reply::status(CL_SUCCESS);
    if want_event {
        reply.put_handle(register_event(s, event.clone()));
    }
    s.send(reply)?;

    let job = TransferJob::new(
        data,
        s.config().chunk_size,
        Box::new(move |result| {
            event.set_status(if result.is_ok() { CL_COMPLETE } else { CL_OUT_OF_RESOURCES });
        }),
    );
    let port = s.start_transfer(job)?;
    debug!(conn = %s.id(), port, "non-blocking read handed to side channel");
    Ok(())
}

/// Zeroed host memory for a read of `len` bytes. Sizes past the bulk limit
/// are refused before anything is allocated.
fn staging(s: &Session, len: u64) -> Result<Vec<u8>, Status> {
    if len > s.config().max_bulk_size {
        return Err(CL_INVALID_VALUE);
    }
    try_alloc(len).ok_or(CL_OUT_OF_HOST_MEMORY)
}

pub fn enqueue_read_buffer(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let buffer = r.handle()?;
    let blocking = r.bool()?;
    let offset = r.u64()?;
    let size = r.u64()?;
    let wait = r.wait_list()?;

    let result = (|| -> DriverResult<(Vec<u8>, Option<Handle>)> {
        s.check(ResourceKind::Queue, queue)?;
        s.check(ResourceKind::Buffer, buffer)?;
        let natives = s.resolve_wait_list(&wait)?;
        let mut dst = staging(s, size)?;
        let event = s
            .driver()
            .enqueue_read_buffer(queue, buffer, offset, &mut dst, &natives, wait.want_event)?;
        Ok((dst, event))
    })();
    send_read(s, result, blocking, wait.want_event)
}

pub fn enqueue_write_buffer(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let buffer = r.handle()?;
    let _blocking = r.bool()?;
    let offset = r.u64()?;
    let size = r.u64()?;
    let wait = r.wait_list()?;
    let data = s.upload_sized(size)?;

    let result = (|| -> DriverResult<Option<Handle>> {
        let data = data.ok_or(CL_OUT_OF_HOST_MEMORY)?;
        s.check(ResourceKind::Queue, queue)?;
        s.check(ResourceKind::Buffer, buffer)?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver()
            .enqueue_write_buffer(queue, buffer, offset, &data, &natives, wait.want_event)
    })();
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_copy_buffer(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let src = r.handle()?;
    let dst = r.handle()?;
    let src_offset = r.u64()?;
    let dst_offset = r.u64()?;
    let size = r.u64()?;
    let wait = r.wait_list()?;

    let result = (|| -> DriverResult<Option<Handle>> {
        s.check(ResourceKind::Queue, queue)?;
        s.check_all(ResourceKind::Buffer, &[src, dst])?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_copy_buffer(
            queue,
            src,
            dst,
            src_offset,
            dst_offset,
            size,
            &natives,
            wait.want_event,
        )
    })();
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_copy_image(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let src = r.handle()?;
    let dst = r.handle()?;
    let src_origin = r.triple()?;
    let dst_origin = r.triple()?;
    let region = r.triple()?;
    let wait = r.wait_list()?;

    let result = (|| -> DriverResult<Option<Handle>> {
        s.check(ResourceKind::Queue, queue)?;
        s.check_all(ResourceKind::Buffer, &[src, dst])?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_copy_image(
            queue,
            src,
            dst,
            src_origin,
            dst_origin,
            region,
            &natives,
            wait.want_event,
        )
    })();
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_copy_image_to_buffer(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let image = r.handle()?;
    let buffer = r.handle()?;
    let origin = r.triple()?;
    let region = r.triple()?;
    let dst_offset = r.u64()?;
    let wait = r.wait_list()?;

    let result = (|| -> DriverResult<Option<Handle>> {
        s.check(ResourceKind::Queue, queue)?;
        s.check_all(ResourceKind::Buffer, &[image, buffer])?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_copy_image_to_buffer(
            queue,
            image,
            buffer,
            origin,
            region,
            dst_offset,
            &natives,
            wait.want_event,
        )
    })();
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_copy_buffer_to_image(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let buffer = r.handle()?;
    let image = r.handle()?;
    let src_offset = r.u64()?;
    let origin = r.triple()?;
    let region = r.triple()?;
    let wait = r.wait_list()?;

    let result = (|| -> DriverResult<Option<Handle>> {
        s.check(ResourceKind::Queue, queue)?;
        s.check_all(ResourceKind::Buffer, &[buffer, image])?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_copy_buffer_to_image(
            queue,
            buffer,
            image,
            src_offset,
            origin,
            region,
            &natives,
            wait.want_event,
        )
    })();
    send_enqueued(s, result, wait.want_event)
}

/// Host bytes an image region occupies, from the image's element size.
fn image_host_size(s: &Session, image: Handle, layout: &ImageRegion) -> Result<u64, Status> {
    s.check(ResourceKind::Buffer, image)?;
    let info = s.driver().image_info(image, CL_IMAGE_ELEMENT_SIZE)?;
    let element_size = info
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or(CL_INVALID_VALUE)?;
    layout.host_size(element_size).ok_or(CL_INVALID_VALUE)
}

fn read_layout(r: &mut PayloadReader<'_>) -> Result<ImageRegion, WireError> {
    Ok(ImageRegion {
        origin: r.triple()?,
        region: r.triple()?,
        row_pitch: r.u64()?,
        slice_pitch: r.u64()?,
    })
}

pub fn enqueue_read_image(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let image = r.handle()?;
    let blocking = r.bool()?;
    let layout = read_layout(r)?;
    let wait = r.wait_list()?;

    let session: &Session = s;
    let result = (|| -> DriverResult<(Vec<u8>, Option<Handle>)> {
        session.check(ResourceKind::Queue, queue)?;
        let size = image_host_size(session, image, &layout)?;
        let natives = session.resolve_wait_list(&wait)?;
        let mut dst = staging(session, size)?;
        let event = session
            .driver()
            .enqueue_read_image(queue, image, &layout, &mut dst, &natives, wait.want_event)?;
        Ok((dst, event))
    })();
    send_read(s, result, blocking, wait.want_event)
}

pub fn enqueue_write_image(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let image = r.handle()?;
    let _blocking = r.bool()?;
    let layout = read_layout(r)?;
    let wait = r.wait_list()?;

    // The upload is drained whatever happens; its size needs the image.
    let size = image_host_size(s, image, &layout);
    let data = match size {
        Ok(size) => s.upload_sized(size)?.ok_or(CL_OUT_OF_HOST_MEMORY),
        Err(status) => s.upload()?.map_or(Err(CL_OUT_OF_HOST_MEMORY), |_| Err(status)),
    };

    let result = (|| -> DriverResult<Option<Handle>> {
        let data = data?;
        s.check(ResourceKind::Queue, queue)?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver()
            .enqueue_write_image(queue, image, &layout, &data, &natives, wait.want_event)
    })();
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_nd_range_kernel(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let kernel = r.handle()?;
    let dim = r.u32()? as u64;
    let global_offset = if r.bool()? { Some(r.u64_array(dim)?) } else { None };
    let global_size = r.u64_array(dim)?;
    let local_size = if r.bool()? { Some(r.u64_array(dim)?) } else { None };
    let wait = r.wait_list()?;

    let result = (|| -> DriverResult<Option<Handle>> {
        s.check(ResourceKind::Queue, queue)?;
        s.check(ResourceKind::Kernel, kernel)?;
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_nd_range_kernel(
            queue,
            kernel,
            global_offset.as_deref(),
            &global_size,
            local_size.as_deref(),
            &natives,
            wait.want_event,
        )
    })();
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_marker_with_wait_list(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let wait = r.wait_list()?;
    let result = s.check(ResourceKind::Queue, queue).and_then(|()| {
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_marker_with_wait_list(queue, &natives, wait.want_event)
    });
    send_enqueued(s, result, wait.want_event)
}

pub fn enqueue_barrier_with_wait_list(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let queue = r.handle()?;
    let wait = r.wait_list()?;
    let result = s.check(ResourceKind::Queue, queue).and_then(|()| {
        let natives = s.resolve_wait_list(&wait)?;
        s.driver().enqueue_barrier_with_wait_list(queue, &natives, wait.want_event)
    });
    send_enqueued(s, result, wait.want_event)
}
