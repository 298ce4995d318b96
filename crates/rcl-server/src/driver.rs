//! The seam between protocol handlers and the compute driver.
//!
//! Every forwarded call returns the driver's own status on failure. Info
//! queries return the complete value; the handler applies the client's
//! buffer size.

use std::sync::Arc;

use rcl_core::{DriverKind, ServerConfig};
use rcl_protocol::cl::*;
use rcl_protocol::{Handle, ResourceKind, Status};
use tracing::{info, warn};

use crate::opencl::OpenClLibrary;
use crate::sim::SimDriver;

pub type DriverResult<T> = Result<T, Status>;

/// `cl_image_format`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ImageFormat {
    pub channel_order: u32,
    pub channel_data_type: u32,
}

impl ImageFormat {
    /// Bytes per pixel, or `None` for an unknown order or type.
    pub fn element_size(&self) -> Option<u64> {
        let channels = match self.channel_order {
            0x10B0 | 0x10B1 | 0x10B8 | 0x10B9 | 0x10BA => 1, // R, A, INTENSITY, LUMINANCE, Rx
            0x10B2 | 0x10B3 | 0x10BB => 2,                   // RG, RA, RGx
            0x10B4 | 0x10BC => 3,                            // RGB, RGBx
            0x10B5 | 0x10B6 | 0x10B7 => 4,                   // RGBA, BGRA, ARGB
            _ => return None,
        };
        let size = match self.channel_data_type {
            // Packed formats describe the whole pixel.
            0x10D4 | 0x10D5 => return Some(2),
            0x10D6 => return Some(4),
            0x10D0 | 0x10D2 | 0x10D7 | 0x10DA => 1,
            0x10D1 | 0x10D3 | 0x10D8 | 0x10DB | 0x10DD => 2,
            0x10D9 | 0x10DC | 0x10DE => 4,
            _ => return None,
        };
        Some(channels * size)
    }
}

/// `cl_image_desc`, with the buffer expressed as a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageDesc {
    pub image_type: u32,
    pub width: u64,
    pub height: u64,
    pub depth: u64,
    pub array_size: u64,
    pub row_pitch: u64,
    pub slice_pitch: u64,
    pub num_mip_levels: u32,
    pub num_samples: u32,
    pub buffer: Handle,
}

impl ImageDesc {
    /// Size of the host data that initializes an image of this shape.
    pub fn host_size(&self, element_size: u64) -> Option<u64> {
        let row = if self.row_pitch == 0 {
            self.width.checked_mul(element_size)?
        } else {
            self.row_pitch
        };
        let slice = |rows: u64| {
            if self.slice_pitch == 0 {
                row.checked_mul(rows)
            } else {
                Some(self.slice_pitch)
            }
        };
        match self.image_type {
            CL_MEM_OBJECT_IMAGE1D | CL_MEM_OBJECT_IMAGE1D_BUFFER => Some(row),
            CL_MEM_OBJECT_IMAGE2D => row.checked_mul(self.height),
            CL_MEM_OBJECT_IMAGE3D => slice(self.height)?.checked_mul(self.depth),
            CL_MEM_OBJECT_IMAGE1D_ARRAY => slice(1)?.checked_mul(self.array_size),
            CL_MEM_OBJECT_IMAGE2D_ARRAY => slice(self.height)?.checked_mul(self.array_size),
            _ => None,
        }
    }
}

/// Host-side layout of an image region being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub origin: [u64; 3],
    pub region: [u64; 3],
    pub row_pitch: u64,
    pub slice_pitch: u64,
}

impl ImageRegion {
    /// Bytes the host buffer must hold, with pitches defaulted from the
    /// region when zero.
    pub fn host_size(&self, element_size: u64) -> Option<u64> {
        let row = match self.row_pitch {
            0 => self.region[0].checked_mul(element_size)?,
            p => p,
        };
        let slice = match self.slice_pitch {
            0 => row.checked_mul(self.region[1])?,
            p => p,
        };
        slice.checked_mul(self.region[2])
    }
}

/// One OpenCL-style compute driver.
///
/// Enqueue calls are always blocking on the server: the server owns the
/// staging memory. They return the native event when `want_event` is set.
pub trait ClDriver: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    // Platforms and devices
    fn platform_ids(&self) -> DriverResult<Vec<Handle>>;
    fn device_ids(&self, platform: Handle, device_type: u64) -> DriverResult<Vec<Handle>>;
    fn unload_platform_compiler(&self, platform: Handle) -> DriverResult<()>;

    /// Info query for any object kind except images, whose image-specific
    /// parameters go through [`ClDriver::image_info`].
    fn info(&self, kind: ResourceKind, object: Handle, param: u32) -> DriverResult<Vec<u8>>;
    fn image_info(&self, image: Handle, param: u32) -> DriverResult<Vec<u8>>;
    fn program_build_info(
        &self,
        program: Handle,
        device: Handle,
        param: u32,
    ) -> DriverResult<Vec<u8>>;
    fn kernel_work_group_info(
        &self,
        kernel: Handle,
        device: Handle,
        param: u32,
    ) -> DriverResult<Vec<u8>>;
    fn kernel_arg_info(&self, kernel: Handle, index: u32, param: u32) -> DriverResult<Vec<u8>>;
    fn event_profiling_info(&self, event: Handle, param: u32) -> DriverResult<Vec<u8>>;

    fn retain(&self, kind: ResourceKind, object: Handle) -> DriverResult<()>;
    fn release(&self, kind: ResourceKind, object: Handle) -> DriverResult<()>;

    // Contexts and queues
    fn create_context(&self, properties: &[u64], devices: &[Handle]) -> DriverResult<Handle>;
    fn create_context_from_type(
        &self,
        properties: &[u64],
        device_type: u64,
    ) -> DriverResult<Handle>;
    fn create_command_queue(
        &self,
        context: Handle,
        device: Handle,
        properties: u64,
    ) -> DriverResult<Handle>;
    fn flush(&self, queue: Handle) -> DriverResult<()>;
    fn finish(&self, queue: Handle) -> DriverResult<()>;

    // Memory objects
    fn create_buffer(
        &self,
        context: Handle,
        flags: u64,
        size: u64,
        host: Option<&[u8]>,
    ) -> DriverResult<Handle>;
    fn create_sub_buffer(
        &self,
        buffer: Handle,
        flags: u64,
        create_type: u32,
        origin: u64,
        size: u64,
    ) -> DriverResult<Handle>;
    fn create_image(
        &self,
        context: Handle,
        flags: u64,
        format: ImageFormat,
        desc: &ImageDesc,
        host: Option<&[u8]>,
    ) -> DriverResult<Handle>;
    fn supported_image_formats(
        &self,
        context: Handle,
        flags: u64,
        image_type: u32,
    ) -> DriverResult<Vec<ImageFormat>>;
    fn create_sampler(
        &self,
        context: Handle,
        normalized: bool,
        addressing: u32,
        filter: u32,
    ) -> DriverResult<Handle>;

    // Programs and kernels
    fn create_program_with_source(
        &self,
        context: Handle,
        sources: &[Vec<u8>],
    ) -> DriverResult<Handle>;
    /// Returns the program (or failure) together with one status per binary.
    fn create_program_with_binary(
        &self,
        context: Handle,
        devices: &[Handle],
        binaries: &[Vec<u8>],
    ) -> (DriverResult<Handle>, Vec<Status>);
    fn build_program(
        &self,
        program: Handle,
        devices: &[Handle],
        options: &[u8],
    ) -> DriverResult<()>;
    fn create_kernel(&self, program: Handle, name: &[u8]) -> DriverResult<Handle>;
    fn create_kernels_in_program(&self, program: Handle) -> DriverResult<Vec<Handle>>;
    fn set_kernel_arg(
        &self,
        kernel: Handle,
        index: u32,
        size: u64,
        value: Option<&[u8]>,
    ) -> DriverResult<()>;

    // Events
    fn wait_for_events(&self, events: &[Handle]) -> DriverResult<()>;
    fn create_user_event(&self, context: Handle) -> DriverResult<Handle>;
    fn set_user_event_status(&self, event: Handle, status: Status) -> DriverResult<()>;

    // Enqueue
    fn enqueue_read_buffer(
        &self,
        queue: Handle,
        buffer: Handle,
        offset: u64,
        dst: &mut [u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    fn enqueue_write_buffer(
        &self,
        queue: Handle,
        buffer: Handle,
        offset: u64,
        src: &[u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_buffer(
        &self,
        queue: Handle,
        src: Handle,
        dst: Handle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_image(
        &self,
        queue: Handle,
        src: Handle,
        dst: Handle,
        src_origin: [u64; 3],
        dst_origin: [u64; 3],
        region: [u64; 3],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_image_to_buffer(
        &self,
        queue: Handle,
        image: Handle,
        buffer: Handle,
        origin: [u64; 3],
        region: [u64; 3],
        dst_offset: u64,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_buffer_to_image(
        &self,
        queue: Handle,
        buffer: Handle,
        image: Handle,
        src_offset: u64,
        origin: [u64; 3],
        region: [u64; 3],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    fn enqueue_read_image(
        &self,
        queue: Handle,
        image: Handle,
        layout: &ImageRegion,
        dst: &mut [u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    fn enqueue_write_image(
        &self,
        queue: Handle,
        image: Handle,
        layout: &ImageRegion,
        src: &[u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_nd_range_kernel(
        &self,
        queue: Handle,
        kernel: Handle,
        global_offset: Option<&[u64]>,
        global_size: &[u64],
        local_size: Option<&[u64]>,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    fn enqueue_marker_with_wait_list(
        &self,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
    fn enqueue_barrier_with_wait_list(
        &self,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>>;
}

/// Pick the driver the configuration asks for.
///
/// `System` falls back to the simulated device when the OpenCL loader
/// cannot be opened, so a server always comes up.
pub fn load_driver(config: &ServerConfig) -> Arc<dyn ClDriver> {
    match config.driver {
        DriverKind::Simulated => {
            info!("using simulated compute driver");
            Arc::new(SimDriver::new())
        }
        DriverKind::System => match OpenClLibrary::load(config.library_path.as_deref()) {
            Ok(lib) => {
                info!("using system OpenCL driver");
                Arc::new(lib)
            }
            Err(e) => {
                warn!("OpenCL driver not available ({}), falling back to simulated driver", e);
                Arc::new(SimDriver::new())
            }
        },
    }
}

/// Split info bytes holding handles into handles.
pub fn handles_from_info(bytes: &[u8]) -> Vec<Handle> {
    bytes
        .chunks_exact(8)
        .map(|c| Handle(u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes() {
        let rgba_f = ImageFormat { channel_order: CL_RGBA, channel_data_type: CL_FLOAT };
        assert_eq!(rgba_f.element_size(), Some(16));
        let r_u8 = ImageFormat { channel_order: CL_R, channel_data_type: CL_UNSIGNED_INT8 };
        assert_eq!(r_u8.element_size(), Some(1));
        let unknown = ImageFormat { channel_order: 0, channel_data_type: CL_FLOAT };
        assert_eq!(unknown.element_size(), None);
    }

    #[test]
    fn image_host_size_defaults_pitches() {
        let desc = ImageDesc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            width: 8,
            height: 4,
            ..Default::default()
        };
        assert_eq!(desc.host_size(4), Some(8 * 4 * 4));

        let desc3 = ImageDesc {
            image_type: CL_MEM_OBJECT_IMAGE3D,
            width: 2,
            height: 3,
            depth: 5,
            row_pitch: 16,
            ..Default::default()
        };
        assert_eq!(desc3.host_size(4), Some(16 * 3 * 5));
    }

    #[test]
    fn region_host_size() {
        let r = ImageRegion { origin: [0; 3], region: [4, 2, 1], row_pitch: 0, slice_pitch: 0 };
        assert_eq!(r.host_size(4), Some(32));
    }

    #[test]
    fn info_handles_split() {
        let mut bytes = 5u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&9u64.to_le_bytes());
        assert_eq!(handles_from_info(&bytes), vec![Handle(5), Handle(9)]);
    }
}
