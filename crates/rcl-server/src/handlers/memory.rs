//! Buffers, images and samplers.

use rcl_protocol::cl::{MemFlags, CL_MEM_OBJECT_IMAGE2D, CL_MEM_OBJECT_IMAGE3D};
use rcl_protocol::status::{
    CL_INVALID_IMAGE_DESCRIPTOR, CL_INVALID_IMAGE_FORMAT_DESCRIPTOR, CL_OUT_OF_HOST_MEMORY,
    CL_SUCCESS,
};
use rcl_protocol::{Handle, PayloadReader, Reply, ResourceKind, Status, WireError};

use super::{info_handlers, info_reply, refcount_handlers, send_created, HandlerResult};
use crate::driver::{ImageDesc, ImageFormat};
use crate::error::ConnectionError;
use crate::session::Session;

/// Data a new memory object is initialized from.
enum HostData {
    Absent,
    Received(Vec<u8>),
    OutOfMemory,
    /// Drained, but its expected size could not be derived. Carries the
    /// status that explains why.
    Unsized(Status),
}

impl HostData {
    /// Receive the initial contents when `flags` carries `COPY_HOST_PTR`.
    /// `len` is the size the request implies, or why it has none.
    fn receive(
        s: &mut Session,
        flags: u64,
        len: Result<u64, Status>,
    ) -> Result<Self, ConnectionError> {
        if !MemFlags::from_bits_truncate(flags).contains(MemFlags::COPY_HOST_PTR) {
            return Ok(HostData::Absent);
        }
        Ok(match len {
            Ok(len) => match s.upload_sized(len)? {
                Some(data) => HostData::Received(data),
                None => HostData::OutOfMemory,
            },
            Err(status) => match s.upload()? {
                Some(_) => HostData::Unsized(status),
                None => HostData::OutOfMemory,
            },
        })
    }

    fn get(&self) -> Result<Option<&[u8]>, Status> {
        match self {
            HostData::Absent => Ok(None),
            HostData::Received(data) => Ok(Some(data.as_slice())),
            HostData::OutOfMemory => Err(CL_OUT_OF_HOST_MEMORY),
            HostData::Unsized(status) => Err(*status),
        }
    }
}

pub fn create_buffer(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let flags = r.u64()?;
    let size = r.u64()?;
    let host = HostData::receive(s, flags, Ok(size))?;

    let result = host.get().and_then(|data| {
        s.check(ResourceKind::Context, context)?;
        s.driver().create_buffer(context, flags, size, data)
    });
    send_created(s, ResourceKind::Buffer, result)
}

pub fn create_sub_buffer(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let buffer = r.handle()?;
    let flags = r.u64()?;
    let create_type = r.u32()?;
    let origin = r.u64()?;
    let size = r.u64()?;

    let result = s
        .check(ResourceKind::Buffer, buffer)
        .and_then(|()| s.driver().create_sub_buffer(buffer, flags, create_type, origin, size));
    send_created(s, ResourceKind::Buffer, result)
}

fn read_format(r: &mut PayloadReader<'_>) -> Result<ImageFormat, WireError> {
    Ok(ImageFormat {
        channel_order: r.u32()?,
        channel_data_type: r.u32()?,
    })
}

/// Host bytes a new image is initialized from.
fn image_len(format: &ImageFormat, desc: &ImageDesc) -> Result<u64, Status> {
    let element_size = format
        .element_size()
        .ok_or(CL_INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
    desc.host_size(element_size).ok_or(CL_INVALID_IMAGE_DESCRIPTOR)
}

/// Shared tail of the three image constructors.
fn create_image_from(
    s: &mut Session,
    context: Handle,
    flags: u64,
    format: ImageFormat,
    desc: ImageDesc,
) -> HandlerResult {
    let len = image_len(&format, &desc);
    let host = HostData::receive(s, flags, len)?;

    let result = host.get().and_then(|data| {
        s.check(ResourceKind::Context, context)?;
        s.check_optional(ResourceKind::Buffer, desc.buffer)?;
        s.driver().create_image(context, flags, format, &desc, data)
    });
    send_created(s, ResourceKind::Buffer, result)
}

pub fn create_image(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let flags = r.u64()?;
    let format = read_format(r)?;
    let desc = ImageDesc {
        image_type: r.u32()?,
        width: r.u64()?,
        height: r.u64()?,
        depth: r.u64()?,
        array_size: r.u64()?,
        row_pitch: r.u64()?,
        slice_pitch: r.u64()?,
        num_mip_levels: r.u32()?,
        num_samples: r.u32()?,
        buffer: r.handle()?,
    };
    create_image_from(s, context, flags, format, desc)
}

pub fn create_image_2d(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let flags = r.u64()?;
    let format = read_format(r)?;
    let desc = ImageDesc {
        image_type: CL_MEM_OBJECT_IMAGE2D,
        width: r.u64()?,
        height: r.u64()?,
        row_pitch: r.u64()?,
        ..Default::default()
    };
    create_image_from(s, context, flags, format, desc)
}

pub fn create_image_3d(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let flags = r.u64()?;
    let format = read_format(r)?;
    let desc = ImageDesc {
        image_type: CL_MEM_OBJECT_IMAGE3D,
        width: r.u64()?,
        height: r.u64()?,
        depth: r.u64()?,
        row_pitch: r.u64()?,
        slice_pitch: r.u64()?,
        ..Default::default()
    };
    create_image_from(s, context, flags, format, desc)
}

pub fn get_supported_image_formats(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let flags = r.u64()?;
    let image_type = r.u32()?;
    let num_entries = r.u32()?;

    let found = s
        .check(ResourceKind::Context, context)
        .and_then(|()| s.driver().supported_image_formats(context, flags, image_type));
    let reply = match found {
        Ok(formats) => {
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_u32(formats.len() as u32);
            for f in formats.iter().take(num_entries as usize) {
                reply.put_u32(f.channel_order).put_u32(f.channel_data_type);
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

pub fn get_image_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let image = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;
    let value = s
        .check(ResourceKind::Buffer, image)
        .and_then(|()| s.driver().image_info(image, param));
    s.send(info_reply(value, value_size))
}

pub fn create_sampler(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let context = r.handle()?;
    let normalized = r.bool()?;
    let addressing = r.u32()?;
    let filter = r.u32()?;

    let result = s
        .check(ResourceKind::Context, context)
        .and_then(|()| s.driver().create_sampler(context, normalized, addressing, filter));
    send_created(s, ResourceKind::Sampler, result)
}

info_handlers! {
    get_mem_object_info => ResourceKind::Buffer;
    get_sampler_info => ResourceKind::Sampler;
}

refcount_handlers! {
    retain_mem_object, release_mem_object => ResourceKind::Buffer;
    retain_sampler, release_sampler => ResourceKind::Sampler;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcl_protocol::cl::{CL_FLOAT, CL_RGBA};

    const RGBA_FLOAT: ImageFormat = ImageFormat {
        channel_order: CL_RGBA,
        channel_data_type: CL_FLOAT,
    };

    #[test]
    fn image_len_names_the_bad_half() {
        let desc = ImageDesc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            width: 4,
            height: 2,
            ..Default::default()
        };
        assert_eq!(image_len(&RGBA_FLOAT, &desc), Ok(4 * 2 * 16));

        let unknown_type = ImageDesc { image_type: 0x7777, ..desc };
        assert_eq!(image_len(&RGBA_FLOAT, &unknown_type), Err(CL_INVALID_IMAGE_DESCRIPTOR));

        let unknown_format = ImageFormat {
            channel_order: 0x7777,
            channel_data_type: CL_FLOAT,
        };
        assert_eq!(image_len(&unknown_format, &desc), Err(CL_INVALID_IMAGE_FORMAT_DESCRIPTOR));
    }
}
