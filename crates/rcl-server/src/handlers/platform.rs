//! Platform and device enumeration and queries.

use rcl_protocol::cl::{CL_PLATFORM_ICD_SUFFIX_KHR, CL_PLATFORM_NAME, CL_PLATFORM_VENDOR};
use rcl_protocol::status::{CL_DEVICE_NOT_FOUND, CL_SUCCESS};
use rcl_protocol::{Handle, PayloadReader, Reply, ResourceKind};

use super::{info_handlers, info_reply, refcount_handlers, send_status, status_of, HandlerResult};
use crate::driver::DriverResult;
use crate::session::Session;

/// `[i32][u32 total][min(total, num_entries) x u64]`; registers what is
/// handed out.
fn send_enumeration(
    s: &mut Session,
    kind: ResourceKind,
    found: DriverResult<Vec<Handle>>,
    num_entries: u32,
) -> HandlerResult {
    let mut reply = match found {
        Ok(handles) => {
            let sent = &handles[..handles.len().min(num_entries as usize)];
            for h in sent {
                s.track(kind, *h);
            }
            let mut reply = Reply::status(CL_SUCCESS);
            reply.put_u32(handles.len() as u32);
            for h in sent {
                reply.put_handle(*h);
            }
            return s.send(reply);
        }
        // Nothing found is an empty list, not a failure.
        Err(CL_DEVICE_NOT_FOUND) => Reply::status(CL_SUCCESS),
        Err(status) => Reply::status(status),
    };
    reply.put_u32(0);
    s.send(reply)
}

pub fn get_platform_ids(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let num_entries = r.u32()?;
    let found = s.driver().platform_ids();
    send_enumeration(s, ResourceKind::Platform, found, num_entries)
}

/// Prefix a NUL-terminated string value with `rcl(<addr>) `.
fn tag_value(value: Vec<u8>, addr: &str) -> Vec<u8> {
    let text = value.strip_suffix(&[0]).unwrap_or(&value);
    let mut tagged = format!("rcl({}) ", addr).into_bytes();
    tagged.extend_from_slice(text);
    tagged.push(0);
    tagged
}

pub fn get_platform_info(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let platform = r.handle()?;
    let param = r.u32()?;
    let value_size = r.u64()?;

    let mut value = s
        .check(ResourceKind::Platform, platform)
        .and_then(|()| s.driver().info(ResourceKind::Platform, platform, param));
    let tagged = matches!(
        param,
        CL_PLATFORM_NAME | CL_PLATFORM_VENDOR | CL_PLATFORM_ICD_SUFFIX_KHR
    );
    if tagged && s.config().platform_tag {
        let addr = s
            .local_ip()
            .map_or_else(|| s.config().bind.clone(), |ip| ip.to_string());
        value = value.map(|v| tag_value(v, &addr));
    }
    s.send(info_reply(value, value_size))
}

pub fn get_device_ids(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let platform = r.handle()?;
    let device_type = r.u64()?;
    let num_entries = r.u32()?;
    let found = s
        .check(ResourceKind::Platform, platform)
        .and_then(|()| s.driver().device_ids(platform, device_type));
    send_enumeration(s, ResourceKind::Device, found, num_entries)
}

info_handlers! {
    get_device_info => ResourceKind::Device;
}

refcount_handlers! {
    retain_device, release_device => ResourceKind::Device;
}

pub fn unload_platform_compiler(s: &mut Session, r: &mut PayloadReader<'_>) -> HandlerResult {
    let platform = r.handle()?;
    let result = s
        .check(ResourceKind::Platform, platform)
        .and_then(|()| s.driver().unload_platform_compiler(platform));
    send_status(s, status_of(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_replaces_terminator() {
        assert_eq!(tag_value(b"Sim\0".to_vec(), "10.0.0.1"), b"rcl(10.0.0.1) Sim\0".to_vec());
        assert_eq!(tag_value(b"Sim".to_vec(), "::1"), b"rcl(::1) Sim\0".to_vec());
    }
}
