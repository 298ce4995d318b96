//! In-process simulated compute device.
//!
//! One platform with one CPU-type device backed by host memory. Kernels are
//! parsed for their signatures but never executed. Every driver call bumps
//! a counter so tests can check that a rejected request never got here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use rcl_protocol::cl::*;
use rcl_protocol::status::*;
use rcl_protocol::{Handle, ResourceKind};
use tracing::{debug, trace};

use crate::driver::{ClDriver, DriverResult, ImageDesc, ImageFormat, ImageRegion};

const PLATFORM: Handle = Handle(0x5100_0000);
const DEVICE: Handle = Handle(0x5100_0100);

const MAX_MEM_ALLOC: u64 = 256 * 1024 * 1024;
const MAX_WORK_GROUP: u64 = 1024;

/// Prefix of the program binaries the simulated compiler produces.
const BINARY_MAGIC: &[u8] = b"RCLSIM1\n";

const SUPPORTED_FORMATS: [ImageFormat; 5] = [
    ImageFormat { channel_order: CL_RGBA, channel_data_type: CL_UNORM_INT8 },
    ImageFormat { channel_order: CL_RGBA, channel_data_type: CL_FLOAT },
    ImageFormat { channel_order: CL_BGRA, channel_data_type: CL_UNORM_INT8 },
    ImageFormat { channel_order: CL_R, channel_data_type: CL_FLOAT },
    ImageFormat { channel_order: CL_R, channel_data_type: CL_UNSIGNED_INT8 },
];

#[derive(Debug, Clone)]
struct Context {
    refs: u32,
    devices: Vec<Handle>,
    properties: Vec<u64>,
}

#[derive(Debug, Clone)]
struct Queue {
    refs: u32,
    context: Handle,
    device: Handle,
    properties: u64,
}

#[derive(Debug, Clone)]
struct SimImage {
    format: ImageFormat,
    desc: ImageDesc,
    element_size: u64,
}

impl SimImage {
    fn extent(&self) -> [u64; 3] {
        let d = &self.desc;
        match d.image_type {
            CL_MEM_OBJECT_IMAGE1D_ARRAY => [d.width, d.array_size, 1],
            CL_MEM_OBJECT_IMAGE2D => [d.width, d.height, 1],
            CL_MEM_OBJECT_IMAGE2D_ARRAY => [d.width, d.height, d.array_size],
            CL_MEM_OBJECT_IMAGE3D => [d.width, d.height, d.depth],
            _ => [d.width, 1, 1],
        }
    }

    fn row_pitch(&self) -> u64 {
        self.desc.width * self.element_size
    }

    fn slice_pitch(&self) -> u64 {
        self.row_pitch() * self.extent()[1]
    }

    fn byte_size(&self) -> u64 {
        let [_, _, z] = self.extent();
        self.slice_pitch() * z
    }

    fn check(&self, origin: [u64; 3], region: [u64; 3]) -> DriverResult<()> {
        let extent = self.extent();
        for i in 0..3 {
            let end = origin[i].checked_add(region[i]).ok_or(CL_INVALID_VALUE)?;
            if region[i] == 0 || end > extent[i] {
                return Err(CL_INVALID_VALUE);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Mem {
    refs: u32,
    context: Handle,
    flags: u64,
    storage: Arc<Mutex<Vec<u8>>>,
    offset: u64,
    size: u64,
    parent: Handle,
    image: Option<SimImage>,
}

#[derive(Debug, Clone)]
struct Sampler {
    refs: u32,
    context: Handle,
    normalized: bool,
    addressing: u32,
    filter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KernelDecl {
    name: String,
    /// Full text of each parameter, e.g. `__global float* out`.
    params: Vec<String>,
}

impl KernelDecl {
    fn param_name(&self, index: usize) -> Option<&str> {
        let p = self.params.get(index)?;
        p.rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
            .find(|s| !s.is_empty())
    }

    fn param_type(&self, index: usize) -> Option<String> {
        let p = self.params.get(index)?;
        let name = self.param_name(index)?;
        let ty = p.strip_suffix(name).unwrap_or(p).trim();
        let ty = ty
            .split_whitespace()
            .filter(|w| {
                !w.starts_with("__")
                    && !matches!(*w, "global" | "local" | "constant" | "private" | "const")
            })
            .collect::<Vec<_>>()
            .join(" ");
        Some(ty.replace(" *", "*"))
    }
}

#[derive(Debug, Clone)]
struct Program {
    refs: u32,
    context: Handle,
    devices: Vec<Handle>,
    source: Vec<u8>,
    build_status: i32,
    options: String,
    log: String,
    kernels: Vec<KernelDecl>,
}

#[derive(Debug, Clone)]
struct Kernel {
    refs: u32,
    context: Handle,
    program: Handle,
    decl: KernelDecl,
    args_set: Vec<bool>,
}

#[derive(Debug, Clone)]
struct Event {
    refs: u32,
    context: Handle,
    queue: Handle,
    command_type: u32,
    status: i32,
    profiling: bool,
    queued: u64,
    end: u64,
}

#[derive(Debug, Clone)]
enum Object {
    Context(Context),
    Queue(Queue),
    Mem(Mem),
    Sampler(Sampler),
    Program(Program),
    Kernel(Kernel),
    Event(Event),
}

impl Object {
    fn kind(&self) -> ResourceKind {
        match self {
            Object::Context(_) => ResourceKind::Context,
            Object::Queue(_) => ResourceKind::Queue,
            Object::Mem(_) => ResourceKind::Buffer,
            Object::Sampler(_) => ResourceKind::Sampler,
            Object::Program(_) => ResourceKind::Program,
            Object::Kernel(_) => ResourceKind::Kernel,
            Object::Event(_) => ResourceKind::Event,
        }
    }

    fn refs_mut(&mut self) -> &mut u32 {
        match self {
            Object::Context(o) => &mut o.refs,
            Object::Queue(o) => &mut o.refs,
            Object::Mem(o) => &mut o.refs,
            Object::Sampler(o) => &mut o.refs,
            Object::Program(o) => &mut o.refs,
            Object::Kernel(o) => &mut o.refs,
            Object::Event(o) => &mut o.refs,
        }
    }
}

macro_rules! getter {
    ($fn:ident, $variant:ident, $ty:ty, $kind:expr) => {
        fn $fn(&self, h: Handle) -> DriverResult<$ty> {
            match self.objects.get(&h).as_deref() {
                Some(Object::$variant(v)) => Ok(v.clone()),
                _ => Err($kind.invalid_status()),
            }
        }
    };
}

fn u32_info(v: u32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn i32_info(v: i32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn u64_info(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn handle_info(h: Handle) -> Vec<u8> {
    u64_info(h.raw())
}

fn handles_info(hs: &[Handle]) -> Vec<u8> {
    hs.iter().flat_map(|h| h.raw().to_le_bytes()).collect()
}

/// NUL-terminated string value.
fn str_info(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}

fn bytes_to_string(b: &[u8]) -> String {
    let end = b.iter().position(|c| *c == 0).unwrap_or(b.len());
    String::from_utf8_lossy(&b[..end]).into_owned()
}

/// Find every `__kernel void name(params)` declaration in `source`.
fn parse_kernels(source: &str) -> Vec<KernelDecl> {
    let mut out = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("kernel") {
        let before_ok = pos == 0 || {
            let c = rest.as_bytes()[pos - 1];
            !(c.is_ascii_alphanumeric()) || rest[..pos].ends_with("__")
        };
        rest = &rest[pos + "kernel".len()..];
        if !before_ok {
            continue;
        }
        let Some(after_void) = rest.trim_start().strip_prefix("void") else {
            continue;
        };
        let after_void = after_void.trim_start();
        let name_len = after_void
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after_void.len());
        if name_len == 0 {
            continue;
        }
        let name = &after_void[..name_len];
        let Some(args) = after_void[name_len..].trim_start().strip_prefix('(') else {
            continue;
        };
        let Some(close) = args.find(')') else {
            break;
        };
        let params = args[..close]
            .split(',')
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| !p.is_empty() && p != "void")
            .collect();
        out.push(KernelDecl { name: name.to_string(), params });
        rest = &args[close..];
    }
    out
}

/// Copy a 3D box between two linear layouts.
#[allow(clippy::too_many_arguments)]
fn copy_box(
    src: &[u8],
    src_base: u64,
    src_row: u64,
    src_slice: u64,
    dst: &mut [u8],
    dst_base: u64,
    dst_row: u64,
    dst_slice: u64,
    row_bytes: u64,
    rows: u64,
    slices: u64,
) -> DriverResult<()> {
    for z in 0..slices {
        for y in 0..rows {
            let s = (src_base + z * src_slice + y * src_row) as usize;
            let d = (dst_base + z * dst_slice + y * dst_row) as usize;
            let n = row_bytes as usize;
            let from = src.get(s..s + n).ok_or(CL_INVALID_VALUE)?;
            dst.get_mut(d..d + n).ok_or(CL_INVALID_VALUE)?.copy_from_slice(from);
        }
    }
    Ok(())
}

/// Simulated platform used when no OpenCL driver is installed and in tests.
pub struct SimDriver {
    objects: DashMap<Handle, Object>,
    next: AtomicU64,
    calls: AtomicU64,
    epoch: Instant,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDriver {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next: AtomicU64::new(0x5200_0000),
            calls: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Number of driver calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of live objects (contexts, queues, memory, ...).
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn platform(&self) -> Handle {
        PLATFORM
    }

    pub fn device(&self) -> Handle {
        DEVICE
    }

    /// Program binary the simulated compiler would produce for `source`.
    pub fn binary_for(source: &[u8]) -> Vec<u8> {
        let mut b = BINARY_MAGIC.to_vec();
        b.extend_from_slice(source);
        b
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn mint(&self) -> Handle {
        Handle(self.next.fetch_add(0x40, Ordering::Relaxed))
    }

    fn insert(&self, obj: Object) -> Handle {
        let h = self.mint();
        trace!(handle = %h, kind = %obj.kind(), "sim object created");
        self.objects.insert(h, obj);
        h
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    getter!(context, Context, Context, ResourceKind::Context);
    getter!(queue, Queue, Queue, ResourceKind::Queue);
    getter!(mem, Mem, Mem, ResourceKind::Buffer);
    getter!(program, Program, Program, ResourceKind::Program);
    getter!(kernel, Kernel, Kernel, ResourceKind::Kernel);
    getter!(event, Event, Event, ResourceKind::Event);

    fn image(&self, h: Handle) -> DriverResult<(Mem, SimImage)> {
        let mem = self.mem(h)?;
        let image = mem.image.clone().ok_or(CL_INVALID_MEM_OBJECT)?;
        Ok((mem, image))
    }

    fn check_device(&self, device: Handle) -> DriverResult<()> {
        if device == DEVICE {
            Ok(())
        } else {
            Err(CL_INVALID_DEVICE)
        }
    }

    fn check_platform(&self, platform: Handle) -> DriverResult<()> {
        if platform == PLATFORM {
            Ok(())
        } else {
            Err(CL_INVALID_PLATFORM)
        }
    }

    fn matches_type(device_type: u64) -> DriverResult<bool> {
        if device_type == 0 {
            return Err(CL_INVALID_DEVICE_TYPE);
        }
        Ok(device_type == CL_DEVICE_TYPE_ALL
            || device_type & (CL_DEVICE_TYPE_CPU | CL_DEVICE_TYPE_DEFAULT) != 0)
    }

    /// Only `CL_CONTEXT_PLATFORM` is understood; the list ends at a 0 key.
    fn check_context_properties(&self, properties: &[u64]) -> DriverResult<()> {
        let mut it = properties.iter();
        while let Some(&key) = it.next() {
            if key == 0 {
                break;
            }
            let value = it.next().ok_or(CL_INVALID_PROPERTY)?;
            match key {
                CL_CONTEXT_PLATFORM => self.check_platform(Handle(*value))?,
                _ => return Err(CL_INVALID_PROPERTY),
            }
        }
        Ok(())
    }

    fn check_host_flags(flags: u64, host: Option<&[u8]>) -> DriverResult<MemFlags> {
        let flags = MemFlags::from_bits(flags).ok_or(CL_INVALID_VALUE)?;
        let access = flags & (MemFlags::READ_WRITE | MemFlags::WRITE_ONLY | MemFlags::READ_ONLY);
        if access.bits().count_ones() > 1 {
            return Err(CL_INVALID_VALUE);
        }
        let wants_host = flags.intersects(MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR);
        if wants_host != host.is_some() {
            return Err(CL_INVALID_HOST_PTR);
        }
        Ok(flags)
    }

    fn check_wait_list(&self, wait: &[Handle], context: Handle) -> DriverResult<()> {
        for e in wait {
            let ev = self.event(*e).map_err(|_| CL_INVALID_EVENT_WAIT_LIST)?;
            if ev.context != context {
                return Err(CL_INVALID_CONTEXT);
            }
            if ev.status < 0 {
                return Err(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
            }
        }
        Ok(())
    }

    /// Validate queue and wait list, returning the queue.
    fn begin(&self, queue: Handle, wait: &[Handle]) -> DriverResult<Queue> {
        let q = self.queue(queue)?;
        self.check_wait_list(wait, q.context)?;
        Ok(q)
    }

    fn mem_in(&self, h: Handle, q: &Queue) -> DriverResult<Mem> {
        let m = self.mem(h)?;
        if m.context != q.context {
            return Err(CL_INVALID_CONTEXT);
        }
        Ok(m)
    }

    fn image_in(&self, h: Handle, q: &Queue) -> DriverResult<(Mem, SimImage)> {
        let (m, img) = self.image(h)?;
        if m.context != q.context {
            return Err(CL_INVALID_CONTEXT);
        }
        Ok((m, img))
    }

    /// The command ran synchronously; mint its event when asked for.
    fn complete(
        &self,
        queue: Handle,
        q: &Queue,
        command_type: u32,
        want_event: bool,
    ) -> Option<Handle> {
        if !want_event {
            return None;
        }
        let now = self.now_ns();
        Some(self.insert(Object::Event(Event {
            refs: 1,
            context: q.context,
            queue,
            command_type,
            status: CL_COMPLETE,
            profiling: q.properties & CL_QUEUE_PROFILING_ENABLE != 0,
            queued: now,
            end: now,
        })))
    }

    fn platform_info(&self, param: u32) -> DriverResult<Vec<u8>> {
        Ok(match param {
            CL_PLATFORM_PROFILE => str_info("FULL_PROFILE"),
            CL_PLATFORM_VERSION => str_info("OpenCL 1.2 rcl-sim"),
            CL_PLATFORM_NAME => str_info("rcl simulated platform"),
            CL_PLATFORM_VENDOR => str_info("rcl"),
            CL_PLATFORM_EXTENSIONS => str_info("cl_khr_icd"),
            CL_PLATFORM_ICD_SUFFIX_KHR => str_info("SIM"),
            _ => return Err(CL_INVALID_VALUE),
        })
    }

    fn device_info(&self, param: u32) -> DriverResult<Vec<u8>> {
        let units = std::thread::available_parallelism().map_or(1, |n| n.get()) as u32;
        Ok(match param {
            CL_DEVICE_TYPE => u64_info(CL_DEVICE_TYPE_CPU),
            CL_DEVICE_VENDOR_ID => u32_info(0x5243),
            CL_DEVICE_MAX_COMPUTE_UNITS => u32_info(units),
            CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS => u32_info(3),
            CL_DEVICE_MAX_WORK_GROUP_SIZE => u64_info(MAX_WORK_GROUP),
            CL_DEVICE_MAX_WORK_ITEM_SIZES => {
                [MAX_WORK_GROUP; 3].iter().flat_map(|v| v.to_le_bytes()).collect()
            }
            CL_DEVICE_MAX_MEM_ALLOC_SIZE => u64_info(MAX_MEM_ALLOC),
            CL_DEVICE_GLOBAL_MEM_SIZE => u64_info(4 * MAX_MEM_ALLOC),
            CL_DEVICE_AVAILABLE => u32_info(1),
            CL_DEVICE_NAME => str_info("rcl simulated CPU"),
            CL_DEVICE_VENDOR => str_info("rcl"),
            CL_DRIVER_VERSION => str_info(env!("CARGO_PKG_VERSION")),
            CL_DEVICE_PROFILE => str_info("FULL_PROFILE"),
            CL_DEVICE_VERSION => str_info("OpenCL 1.2 rcl-sim"),
            CL_DEVICE_EXTENSIONS => str_info(""),
            CL_DEVICE_PLATFORM => handle_info(PLATFORM),
            _ => return Err(CL_INVALID_VALUE),
        })
    }

    fn object_info(&self, kind: ResourceKind, object: Handle, param: u32) -> DriverResult<Vec<u8>> {
        let obj = match self.objects.get(&object).as_deref() {
            Some(o) if o.kind() == kind => o.clone(),
            _ => return Err(kind.invalid_status()),
        };
        let value = match obj {
            Object::Context(c) => match param {
                CL_CONTEXT_REFERENCE_COUNT => u32_info(c.refs),
                CL_CONTEXT_DEVICES => handles_info(&c.devices),
                CL_CONTEXT_PROPERTIES => {
                    c.properties.iter().flat_map(|p| p.to_le_bytes()).collect()
                }
                CL_CONTEXT_NUM_DEVICES => u32_info(c.devices.len() as u32),
                _ => return Err(CL_INVALID_VALUE),
            },
            Object::Queue(q) => match param {
                CL_QUEUE_CONTEXT => handle_info(q.context),
                CL_QUEUE_DEVICE => handle_info(q.device),
                CL_QUEUE_REFERENCE_COUNT => u32_info(q.refs),
                CL_QUEUE_PROPERTIES => u64_info(q.properties),
                _ => return Err(CL_INVALID_VALUE),
            },
            Object::Mem(m) => match param {
                CL_MEM_TYPE => u32_info(
                    m.image
                        .as_ref()
                        .map_or(CL_MEM_OBJECT_BUFFER, |i| i.desc.image_type),
                ),
                CL_MEM_FLAGS => u64_info(m.flags),
                CL_MEM_SIZE => u64_info(m.size),
                CL_MEM_HOST_PTR => u64_info(0),
                CL_MEM_MAP_COUNT => u32_info(0),
                CL_MEM_REFERENCE_COUNT => u32_info(m.refs),
                CL_MEM_CONTEXT => handle_info(m.context),
                CL_MEM_ASSOCIATED_MEMOBJECT => handle_info(m.parent),
                CL_MEM_OFFSET => u64_info(if m.parent.is_null() { 0 } else { m.offset }),
                _ => return Err(CL_INVALID_VALUE),
            },
            Object::Sampler(s) => match param {
                CL_SAMPLER_REFERENCE_COUNT => u32_info(s.refs),
                CL_SAMPLER_CONTEXT => handle_info(s.context),
                CL_SAMPLER_NORMALIZED_COORDS => u32_info(s.normalized as u32),
                CL_SAMPLER_ADDRESSING_MODE => u32_info(s.addressing),
                CL_SAMPLER_FILTER_MODE => u32_info(s.filter),
                _ => return Err(CL_INVALID_VALUE),
            },
            Object::Program(p) => self.program_info(&p, param)?,
            Object::Kernel(k) => match param {
                CL_KERNEL_FUNCTION_NAME => str_info(&k.decl.name),
                CL_KERNEL_NUM_ARGS => u32_info(k.decl.params.len() as u32),
                CL_KERNEL_REFERENCE_COUNT => u32_info(k.refs),
                CL_KERNEL_CONTEXT => handle_info(k.context),
                CL_KERNEL_PROGRAM => handle_info(k.program),
                CL_KERNEL_ATTRIBUTES => str_info(""),
                _ => return Err(CL_INVALID_VALUE),
            },
            Object::Event(e) => match param {
                CL_EVENT_COMMAND_QUEUE => handle_info(e.queue),
                CL_EVENT_COMMAND_TYPE => u32_info(e.command_type),
                CL_EVENT_REFERENCE_COUNT => u32_info(e.refs),
                CL_EVENT_COMMAND_EXECUTION_STATUS => i32_info(e.status),
                CL_EVENT_CONTEXT => handle_info(e.context),
                _ => return Err(CL_INVALID_VALUE),
            },
        };
        Ok(value)
    }

    fn program_info(&self, p: &Program, param: u32) -> DriverResult<Vec<u8>> {
        let built = p.build_status == CL_BUILD_SUCCESS;
        let binary = if built { Self::binary_for(&p.source) } else { Vec::new() };
        Ok(match param {
            CL_PROGRAM_REFERENCE_COUNT => u32_info(p.refs),
            CL_PROGRAM_CONTEXT => handle_info(p.context),
            CL_PROGRAM_NUM_DEVICES => u32_info(p.devices.len() as u32),
            CL_PROGRAM_DEVICES => handles_info(&p.devices),
            CL_PROGRAM_SOURCE => str_info(&bytes_to_string(&p.source)),
            CL_PROGRAM_BINARY_SIZES => p
                .devices
                .iter()
                .flat_map(|_| (binary.len() as u64).to_le_bytes())
                .collect(),
            CL_PROGRAM_BINARIES => p.devices.iter().flat_map(|_| binary.iter().copied()).collect(),
            CL_PROGRAM_NUM_KERNELS if built => u64_info(p.kernels.len() as u64),
            CL_PROGRAM_KERNEL_NAMES if built => {
                let names: Vec<&str> = p.kernels.iter().map(|k| k.name.as_str()).collect();
                str_info(&names.join(";"))
            }
            CL_PROGRAM_NUM_KERNELS | CL_PROGRAM_KERNEL_NAMES => {
                return Err(CL_INVALID_PROGRAM_EXECUTABLE)
            }
            _ => return Err(CL_INVALID_VALUE),
        })
    }

    fn new_mem(
        &self,
        context: Handle,
        flags: u64,
        data: Vec<u8>,
        image: Option<SimImage>,
    ) -> Handle {
        let size = data.len() as u64;
        self.insert(Object::Mem(Mem {
            refs: 1,
            context,
            flags,
            storage: Arc::new(Mutex::new(data)),
            offset: 0,
            size,
            parent: Handle::null(),
            image,
        }))
    }
}

impl ClDriver for SimDriver {
    fn backend(&self) -> &'static str {
        "simulated"
    }

    fn platform_ids(&self) -> DriverResult<Vec<Handle>> {
        self.tick();
        Ok(vec![PLATFORM])
    }

    fn device_ids(&self, platform: Handle, device_type: u64) -> DriverResult<Vec<Handle>> {
        self.tick();
        self.check_platform(platform)?;
        if Self::matches_type(device_type)? {
            Ok(vec![DEVICE])
        } else {
            Err(CL_DEVICE_NOT_FOUND)
        }
    }

    fn unload_platform_compiler(&self, platform: Handle) -> DriverResult<()> {
        self.tick();
        self.check_platform(platform)
    }

    fn info(&self, kind: ResourceKind, object: Handle, param: u32) -> DriverResult<Vec<u8>> {
        self.tick();
        match kind {
            ResourceKind::Platform => {
                self.check_platform(object)?;
                self.platform_info(param)
            }
            ResourceKind::Device => {
                self.check_device(object)?;
                self.device_info(param)
            }
            _ => self.object_info(kind, object, param),
        }
    }

    fn image_info(&self, image: Handle, param: u32) -> DriverResult<Vec<u8>> {
        self.tick();
        let (_, img) = self.image(image)?;
        let d = &img.desc;
        Ok(match param {
            CL_IMAGE_FORMAT => bytemuck::bytes_of(&img.format).to_vec(),
            CL_IMAGE_ELEMENT_SIZE => u64_info(img.element_size),
            CL_IMAGE_ROW_PITCH => u64_info(img.row_pitch()),
            CL_IMAGE_SLICE_PITCH => u64_info(match d.image_type {
                CL_MEM_OBJECT_IMAGE3D
                | CL_MEM_OBJECT_IMAGE2D_ARRAY
                | CL_MEM_OBJECT_IMAGE1D_ARRAY => {
                    img.slice_pitch()
                }
                _ => 0,
            }),
            CL_IMAGE_WIDTH => u64_info(d.width),
            CL_IMAGE_HEIGHT => u64_info(d.height),
            CL_IMAGE_DEPTH => u64_info(d.depth),
            CL_IMAGE_ARRAY_SIZE => u64_info(d.array_size),
            CL_IMAGE_BUFFER => handle_info(d.buffer),
            CL_IMAGE_NUM_MIP_LEVELS => u32_info(d.num_mip_levels),
            CL_IMAGE_NUM_SAMPLES => u32_info(d.num_samples),
            _ => return Err(CL_INVALID_VALUE),
        })
    }

    fn program_build_info(
        &self,
        program: Handle,
        device: Handle,
        param: u32,
    ) -> DriverResult<Vec<u8>> {
        self.tick();
        let p = self.program(program)?;
        if !p.devices.contains(&device) {
            return Err(CL_INVALID_DEVICE);
        }
        Ok(match param {
            CL_PROGRAM_BUILD_STATUS => i32_info(p.build_status),
            CL_PROGRAM_BUILD_OPTIONS => str_info(&p.options),
            CL_PROGRAM_BUILD_LOG => str_info(&p.log),
            // CL_PROGRAM_BINARY_TYPE_EXECUTABLE or NONE
            CL_PROGRAM_BINARY_TYPE => {
                u32_info(if p.build_status == CL_BUILD_SUCCESS { 4 } else { 0 })
            }
            _ => return Err(CL_INVALID_VALUE),
        })
    }

    fn kernel_work_group_info(
        &self,
        kernel: Handle,
        device: Handle,
        param: u32,
    ) -> DriverResult<Vec<u8>> {
        self.tick();
        self.kernel(kernel)?;
        if !device.is_null() {
            self.check_device(device)?;
        }
        Ok(match param {
            CL_KERNEL_WORK_GROUP_SIZE => u64_info(MAX_WORK_GROUP),
            CL_KERNEL_COMPILE_WORK_GROUP_SIZE => vec![0u8; 24],
            CL_KERNEL_LOCAL_MEM_SIZE => u64_info(0),
            CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE => u64_info(1),
            CL_KERNEL_PRIVATE_MEM_SIZE => u64_info(0),
            _ => return Err(CL_INVALID_VALUE),
        })
    }

    fn kernel_arg_info(&self, kernel: Handle, index: u32, param: u32) -> DriverResult<Vec<u8>> {
        self.tick();
        let k = self.kernel(kernel)?;
        let i = index as usize;
        if i >= k.decl.params.len() {
            return Err(CL_INVALID_ARG_INDEX);
        }
        match param {
            CL_KERNEL_ARG_NAME => k
                .decl
                .param_name(i)
                .map(str_info)
                .ok_or(CL_KERNEL_ARG_INFO_NOT_AVAILABLE),
            CL_KERNEL_ARG_TYPE_NAME => k
                .decl
                .param_type(i)
                .map(|t| str_info(&t))
                .ok_or(CL_KERNEL_ARG_INFO_NOT_AVAILABLE),
            0x1196..=0x1199 => Err(CL_KERNEL_ARG_INFO_NOT_AVAILABLE),
            _ => Err(CL_INVALID_VALUE),
        }
    }

    fn event_profiling_info(&self, event: Handle, param: u32) -> DriverResult<Vec<u8>> {
        self.tick();
        let e = self.event(event)?;
        if !e.profiling || e.status != CL_COMPLETE {
            return Err(CL_PROFILING_INFO_NOT_AVAILABLE);
        }
        match param {
            CL_PROFILING_COMMAND_QUEUED
            | CL_PROFILING_COMMAND_SUBMIT
            | CL_PROFILING_COMMAND_START => {
                Ok(u64_info(e.queued))
            }
            CL_PROFILING_COMMAND_END => Ok(u64_info(e.end)),
            _ => Err(CL_INVALID_VALUE),
        }
    }

    fn retain(&self, kind: ResourceKind, object: Handle) -> DriverResult<()> {
        self.tick();
        match kind {
            ResourceKind::Platform => self.check_platform(object),
            ResourceKind::Device => self.check_device(object),
            _ => match self.objects.get_mut(&object) {
                Some(mut o) if o.kind() == kind => {
                    *o.refs_mut() += 1;
                    Ok(())
                }
                _ => Err(kind.invalid_status()),
            },
        }
    }

    fn release(&self, kind: ResourceKind, object: Handle) -> DriverResult<()> {
        self.tick();
        match kind {
            ResourceKind::Platform => self.check_platform(object),
            ResourceKind::Device => self.check_device(object),
            _ => {
                let remaining = match self.objects.get_mut(&object) {
                    Some(mut o) if o.kind() == kind => {
                        let refs = o.refs_mut();
                        *refs = refs.saturating_sub(1);
                        *refs
                    }
                    _ => return Err(kind.invalid_status()),
                };
                if remaining == 0 {
                    self.objects.remove(&object);
                    trace!(handle = %object, %kind, "sim object destroyed");
                }
                Ok(())
            }
        }
    }

    fn create_context(&self, properties: &[u64], devices: &[Handle]) -> DriverResult<Handle> {
        self.tick();
        if devices.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        self.check_context_properties(properties)?;
        devices.iter().try_for_each(|d| self.check_device(*d))?;
        Ok(self.insert(Object::Context(Context {
            refs: 1,
            devices: devices.to_vec(),
            properties: properties.to_vec(),
        })))
    }

    fn create_context_from_type(
        &self,
        properties: &[u64],
        device_type: u64,
    ) -> DriverResult<Handle> {
        self.tick();
        self.check_context_properties(properties)?;
        if !Self::matches_type(device_type)? {
            return Err(CL_DEVICE_NOT_FOUND);
        }
        Ok(self.insert(Object::Context(Context {
            refs: 1,
            devices: vec![DEVICE],
            properties: properties.to_vec(),
        })))
    }

    fn create_command_queue(
        &self,
        context: Handle,
        device: Handle,
        properties: u64,
    ) -> DriverResult<Handle> {
        self.tick();
        let c = self.context(context)?;
        if !c.devices.contains(&device) {
            return Err(CL_INVALID_DEVICE);
        }
        if properties & !(CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE | CL_QUEUE_PROFILING_ENABLE) != 0 {
            return Err(CL_INVALID_VALUE);
        }
        Ok(self.insert(Object::Queue(Queue {
            refs: 1,
            context,
            device,
            properties,
        })))
    }

    fn flush(&self, queue: Handle) -> DriverResult<()> {
        self.tick();
        self.queue(queue).map(|_| ())
    }

    fn finish(&self, queue: Handle) -> DriverResult<()> {
        self.tick();
        self.queue(queue).map(|_| ())
    }

    fn create_buffer(
        &self,
        context: Handle,
        flags: u64,
        size: u64,
        host: Option<&[u8]>,
    ) -> DriverResult<Handle> {
        self.tick();
        self.context(context)?;
        Self::check_host_flags(flags, host)?;
        if size == 0 || size > MAX_MEM_ALLOC {
            return Err(CL_INVALID_BUFFER_SIZE);
        }
        let data = match host {
            Some(h) if h.len() as u64 != size => return Err(CL_INVALID_HOST_PTR),
            Some(h) => h.to_vec(),
            None => vec![0u8; size as usize],
        };
        Ok(self.new_mem(context, flags, data, None))
    }

    fn create_sub_buffer(
        &self,
        buffer: Handle,
        flags: u64,
        create_type: u32,
        origin: u64,
        size: u64,
    ) -> DriverResult<Handle> {
        self.tick();
        let parent = self.mem(buffer)?;
        if parent.image.is_some() || !parent.parent.is_null() {
            return Err(CL_INVALID_MEM_OBJECT);
        }
        if create_type != CL_BUFFER_CREATE_TYPE_REGION {
            return Err(CL_INVALID_VALUE);
        }
        let end = origin.checked_add(size).ok_or(CL_INVALID_VALUE)?;
        if size == 0 {
            return Err(CL_INVALID_BUFFER_SIZE);
        }
        if end > parent.size {
            return Err(CL_INVALID_VALUE);
        }
        let flags = if flags == 0 { parent.flags } else { flags };
        Ok(self.insert(Object::Mem(Mem {
            refs: 1,
            context: parent.context,
            flags,
            storage: parent.storage.clone(),
            offset: origin,
            size,
            parent: buffer,
            image: None,
        })))
    }

    fn create_image(
        &self,
        context: Handle,
        flags: u64,
        format: ImageFormat,
        desc: &ImageDesc,
        host: Option<&[u8]>,
    ) -> DriverResult<Handle> {
        self.tick();
        self.context(context)?;
        Self::check_host_flags(flags, host)?;
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(CL_IMAGE_FORMAT_NOT_SUPPORTED);
        }
        let element_size = format.element_size().ok_or(CL_INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
        let mut desc = *desc;
        match desc.image_type {
            CL_MEM_OBJECT_IMAGE1D | CL_MEM_OBJECT_IMAGE1D_BUFFER => {
                desc.height = 0;
                desc.depth = 0;
            }
            CL_MEM_OBJECT_IMAGE2D => desc.depth = 0,
            CL_MEM_OBJECT_IMAGE3D | CL_MEM_OBJECT_IMAGE1D_ARRAY | CL_MEM_OBJECT_IMAGE2D_ARRAY => {}
            _ => return Err(CL_INVALID_IMAGE_DESCRIPTOR),
        }
        let image = SimImage { format, desc, element_size };
        if image.extent().contains(&0) {
            return Err(CL_INVALID_IMAGE_SIZE);
        }
        let size = image.byte_size();
        if size > MAX_MEM_ALLOC {
            return Err(CL_INVALID_IMAGE_SIZE);
        }

        if desc.image_type == CL_MEM_OBJECT_IMAGE1D_BUFFER {
            let buffer = self.mem(desc.buffer).map_err(|_| CL_INVALID_IMAGE_DESCRIPTOR)?;
            if buffer.image.is_some() || buffer.size < size {
                return Err(CL_INVALID_IMAGE_DESCRIPTOR);
            }
            return Ok(self.insert(Object::Mem(Mem {
                refs: 1,
                context,
                flags,
                storage: buffer.storage.clone(),
                offset: buffer.offset,
                size,
                parent: desc.buffer,
                image: Some(image),
            })));
        }

        let mut data = vec![0u8; size as usize];
        if let Some(host) = host {
            let [w, h, d] = image.extent();
            let row = if desc.row_pitch == 0 { image.row_pitch() } else { desc.row_pitch };
            let slice = if desc.slice_pitch == 0 { row * h } else { desc.slice_pitch };
            copy_box(
                host, 0, row, slice,
                &mut data, 0, image.row_pitch(), image.slice_pitch(),
                w * element_size, h, d,
            )
            .map_err(|_| CL_INVALID_HOST_PTR)?;
        }
        Ok(self.new_mem(context, flags, data, Some(image)))
    }

    fn supported_image_formats(
        &self,
        context: Handle,
        _flags: u64,
        image_type: u32,
    ) -> DriverResult<Vec<ImageFormat>> {
        self.tick();
        self.context(context)?;
        match image_type {
            CL_MEM_OBJECT_IMAGE1D..=CL_MEM_OBJECT_IMAGE1D_BUFFER
            | CL_MEM_OBJECT_IMAGE2D
            | CL_MEM_OBJECT_IMAGE3D => {
                Ok(SUPPORTED_FORMATS.to_vec())
            }
            _ => Err(CL_INVALID_VALUE),
        }
    }

    fn create_sampler(
        &self,
        context: Handle,
        normalized: bool,
        addressing: u32,
        filter: u32,
    ) -> DriverResult<Handle> {
        self.tick();
        self.context(context)?;
        // CL_ADDRESS_NONE..=CL_ADDRESS_MIRRORED_REPEAT, CL_FILTER_NEAREST..=CL_FILTER_LINEAR
        if !(0x1130..=0x1134).contains(&addressing) || !(0x1140..=0x1141).contains(&filter) {
            return Err(CL_INVALID_VALUE);
        }
        Ok(self.insert(Object::Sampler(Sampler {
            refs: 1,
            context,
            normalized,
            addressing,
            filter,
        })))
    }

    fn create_program_with_source(
        &self,
        context: Handle,
        sources: &[Vec<u8>],
    ) -> DriverResult<Handle> {
        self.tick();
        let c = self.context(context)?;
        if sources.is_empty() || sources.iter().all(|s| s.is_empty()) {
            return Err(CL_INVALID_VALUE);
        }
        let source: Vec<u8> = sources
            .iter()
            .flat_map(|s| s.iter().copied().take_while(|b| *b != 0))
            .collect();
        Ok(self.insert(Object::Program(Program {
            refs: 1,
            context,
            devices: c.devices,
            source,
            build_status: CL_BUILD_NONE,
            options: String::new(),
            log: String::new(),
            kernels: Vec::new(),
        })))
    }

    fn create_program_with_binary(
        &self,
        context: Handle,
        devices: &[Handle],
        binaries: &[Vec<u8>],
    ) -> (DriverResult<Handle>, Vec<i32>) {
        self.tick();
        let mut statuses = vec![CL_INVALID_VALUE; binaries.len()];
        let c = match self.context(context) {
            Ok(c) => c,
            Err(e) => return (Err(e), statuses),
        };
        if devices.is_empty() || devices.len() != binaries.len() {
            return (Err(CL_INVALID_VALUE), statuses);
        }
        if devices.iter().any(|d| !c.devices.contains(d)) {
            return (Err(CL_INVALID_DEVICE), statuses);
        }
        let mut source = None;
        for (status, binary) in statuses.iter_mut().zip(binaries) {
            *status = match binary.strip_prefix(BINARY_MAGIC) {
                Some(body) => {
                    source.get_or_insert_with(|| body.to_vec());
                    CL_SUCCESS
                }
                None if binary.is_empty() => CL_INVALID_VALUE,
                None => CL_INVALID_BINARY,
            };
        }
        if let Some(bad) = statuses.iter().find(|s| **s != CL_SUCCESS) {
            return (Err(*bad), statuses);
        }
        let program = self.insert(Object::Program(Program {
            refs: 1,
            context,
            devices: devices.to_vec(),
            source: source.unwrap_or_default(),
            build_status: CL_BUILD_NONE,
            options: String::new(),
            log: String::new(),
            kernels: Vec::new(),
        }));
        (Ok(program), statuses)
    }

    fn build_program(
        &self,
        program: Handle,
        devices: &[Handle],
        options: &[u8],
    ) -> DriverResult<()> {
        self.tick();
        let p = self.program(program)?;
        if devices.iter().any(|d| !p.devices.contains(d)) {
            return Err(CL_INVALID_DEVICE);
        }
        if self
            .objects
            .iter()
            .any(|o| matches!(o.value(), Object::Kernel(k) if k.program == program))
        {
            return Err(CL_INVALID_OPERATION);
        }
        let source = bytes_to_string(&p.source);
        let options = bytes_to_string(options);
        let failure = source
            .lines()
            .enumerate()
            .find(|(_, l)| l.trim_start().starts_with("#error"));

        let mut guard = self.objects.get_mut(&program).ok_or(CL_INVALID_PROGRAM)?;
        let Object::Program(p) = guard.value_mut() else {
            return Err(CL_INVALID_PROGRAM);
        };
        p.options = options;
        match failure {
            Some((line, text)) => {
                p.build_status = CL_BUILD_ERROR;
                let message = text.trim_start()["#error".len()..].trim();
                p.log = format!("<source>:{}: error: {}", line + 1, message);
                p.kernels.clear();
                debug!(program = %program, "simulated build failed");
                Err(CL_BUILD_PROGRAM_FAILURE)
            }
            None => {
                p.kernels = parse_kernels(&source);
                p.build_status = CL_BUILD_SUCCESS;
                p.log = format!("{} kernel(s) compiled", p.kernels.len());
                Ok(())
            }
        }
    }

    fn create_kernel(&self, program: Handle, name: &[u8]) -> DriverResult<Handle> {
        self.tick();
        let p = self.program(program)?;
        if p.build_status != CL_BUILD_SUCCESS {
            return Err(CL_INVALID_PROGRAM_EXECUTABLE);
        }
        let name = bytes_to_string(name);
        let decl = p
            .kernels
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or(CL_INVALID_KERNEL_NAME)?;
        let args = decl.params.len();
        Ok(self.insert(Object::Kernel(Kernel {
            refs: 1,
            context: p.context,
            program,
            decl,
            args_set: vec![false; args],
        })))
    }

    fn create_kernels_in_program(&self, program: Handle) -> DriverResult<Vec<Handle>> {
        self.tick();
        let p = self.program(program)?;
        if p.build_status != CL_BUILD_SUCCESS {
            return Err(CL_INVALID_PROGRAM_EXECUTABLE);
        }
        Ok(p.kernels
            .into_iter()
            .map(|decl| {
                let args = decl.params.len();
                self.insert(Object::Kernel(Kernel {
                    refs: 1,
                    context: p.context,
                    program,
                    decl,
                    args_set: vec![false; args],
                }))
            })
            .collect())
    }

    fn set_kernel_arg(
        &self,
        kernel: Handle,
        index: u32,
        size: u64,
        value: Option<&[u8]>,
    ) -> DriverResult<()> {
        self.tick();
        let mut guard = match self.objects.get_mut(&kernel) {
            Some(g) if g.kind() == ResourceKind::Kernel => g,
            _ => return Err(CL_INVALID_KERNEL),
        };
        let Object::Kernel(k) = guard.value_mut() else {
            return Err(CL_INVALID_KERNEL);
        };
        let slot = k.args_set.get_mut(index as usize).ok_or(CL_INVALID_ARG_INDEX)?;
        match value {
            Some(v) if v.len() as u64 != size => return Err(CL_INVALID_ARG_SIZE),
            None if size == 0 => return Err(CL_INVALID_ARG_SIZE),
            _ => {}
        }
        *slot = true;
        Ok(())
    }

    fn wait_for_events(&self, events: &[Handle]) -> DriverResult<()> {
        self.tick();
        if events.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        let mut context = None;
        for e in events {
            let ev = self.event(*e)?;
            if *context.get_or_insert(ev.context) != ev.context {
                return Err(CL_INVALID_CONTEXT);
            }
            match ev.status {
                s if s < 0 => return Err(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST),
                CL_COMPLETE => {}
                // A pending user event could only be set by this same
                // connection, which is blocked here.
                _ => return Err(CL_INVALID_OPERATION),
            }
        }
        Ok(())
    }

    fn create_user_event(&self, context: Handle) -> DriverResult<Handle> {
        self.tick();
        self.context(context)?;
        let now = self.now_ns();
        Ok(self.insert(Object::Event(Event {
            refs: 1,
            context,
            queue: Handle::null(),
            command_type: CL_COMMAND_USER,
            status: CL_SUBMITTED,
            profiling: false,
            queued: now,
            end: now,
        })))
    }

    fn set_user_event_status(&self, event: Handle, status: i32) -> DriverResult<()> {
        self.tick();
        let mut guard = match self.objects.get_mut(&event) {
            Some(g) if g.kind() == ResourceKind::Event => g,
            _ => return Err(CL_INVALID_EVENT),
        };
        let Object::Event(e) = guard.value_mut() else {
            return Err(CL_INVALID_EVENT);
        };
        if e.command_type != CL_COMMAND_USER {
            return Err(CL_INVALID_EVENT);
        }
        if status > CL_COMPLETE {
            return Err(CL_INVALID_VALUE);
        }
        if e.status <= CL_COMPLETE {
            return Err(CL_INVALID_OPERATION);
        }
        e.status = status;
        Ok(())
    }

    fn enqueue_read_buffer(
        &self,
        queue: Handle,
        buffer: Handle,
        offset: u64,
        dst: &mut [u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let m = self.mem_in(buffer, &q)?;
        let end = offset.checked_add(dst.len() as u64).ok_or(CL_INVALID_VALUE)?;
        if m.image.is_some() || end > m.size {
            return Err(CL_INVALID_VALUE);
        }
        let start = (m.offset + offset) as usize;
        dst.copy_from_slice(&m.storage.lock()[start..start + dst.len()]);
        Ok(self.complete(queue, &q, CL_COMMAND_READ_BUFFER, want_event))
    }

    fn enqueue_write_buffer(
        &self,
        queue: Handle,
        buffer: Handle,
        offset: u64,
        src: &[u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let m = self.mem_in(buffer, &q)?;
        let end = offset.checked_add(src.len() as u64).ok_or(CL_INVALID_VALUE)?;
        if m.image.is_some() || end > m.size {
            return Err(CL_INVALID_VALUE);
        }
        let start = (m.offset + offset) as usize;
        m.storage.lock()[start..start + src.len()].copy_from_slice(src);
        Ok(self.complete(queue, &q, CL_COMMAND_WRITE_BUFFER, want_event))
    }

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
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let s = self.mem_in(src, &q)?;
        let d = self.mem_in(dst, &q)?;
        let fits = |m: &Mem, off: u64| off.checked_add(size).is_some_and(|end| end <= m.size);
        if size == 0
            || s.image.is_some()
            || d.image.is_some()
            || !fits(&s, src_offset)
            || !fits(&d, dst_offset)
        {
            return Err(CL_INVALID_VALUE);
        }
        let from = (s.offset + src_offset) as usize;
        let to = (d.offset + dst_offset) as usize;
        let n = size as usize;
        if Arc::ptr_eq(&s.storage, &d.storage) {
            if from < to + n && to < from + n {
                return Err(CL_MEM_COPY_OVERLAP);
            }
            s.storage.lock().copy_within(from..from + n, to);
        } else {
            let bytes = s.storage.lock()[from..from + n].to_vec();
            d.storage.lock()[to..to + n].copy_from_slice(&bytes);
        }
        Ok(self.complete(queue, &q, CL_COMMAND_COPY_BUFFER, want_event))
    }

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
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let (sm, si) = self.image_in(src, &q)?;
        let (dm, di) = self.image_in(dst, &q)?;
        if si.format != di.format {
            return Err(CL_IMAGE_FORMAT_NOT_SUPPORTED);
        }
        si.check(src_origin, region)?;
        di.check(dst_origin, region)?;
        let e = si.element_size;
        let base = |img: &SimImage, m: &Mem, o: [u64; 3]| {
            m.offset + o[2] * img.slice_pitch() + o[1] * img.row_pitch() + o[0] * e
        };
        let staged = sm.storage.lock().clone();
        copy_box(
            &staged, base(&si, &sm, src_origin), si.row_pitch(), si.slice_pitch(),
            &mut dm.storage.lock(), base(&di, &dm, dst_origin), di.row_pitch(), di.slice_pitch(),
            region[0] * e, region[1], region[2],
        )?;
        Ok(self.complete(queue, &q, CL_COMMAND_COPY_IMAGE, want_event))
    }

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
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let (im, img) = self.image_in(image, &q)?;
        let b = self.mem_in(buffer, &q)?;
        img.check(origin, region)?;
        let e = img.element_size;
        let row = region[0] * e;
        let total = row * region[1] * region[2];
        if b.image.is_some() || dst_offset.checked_add(total).map_or(true, |end| end > b.size) {
            return Err(CL_INVALID_VALUE);
        }
        let src_base =
            im.offset + origin[2] * img.slice_pitch() + origin[1] * img.row_pitch() + origin[0] * e;
        let staged = im.storage.lock().clone();
        copy_box(
            &staged, src_base, img.row_pitch(), img.slice_pitch(),
            &mut b.storage.lock(), b.offset + dst_offset, row, row * region[1],
            row, region[1], region[2],
        )?;
        Ok(self.complete(queue, &q, CL_COMMAND_COPY_IMAGE_TO_BUFFER, want_event))
    }

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
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let b = self.mem_in(buffer, &q)?;
        let (im, img) = self.image_in(image, &q)?;
        img.check(origin, region)?;
        let e = img.element_size;
        let row = region[0] * e;
        let total = row * region[1] * region[2];
        if b.image.is_some() || src_offset.checked_add(total).map_or(true, |end| end > b.size) {
            return Err(CL_INVALID_VALUE);
        }
        let dst_base =
            im.offset + origin[2] * img.slice_pitch() + origin[1] * img.row_pitch() + origin[0] * e;
        let staged = b.storage.lock().clone();
        copy_box(
            &staged, b.offset + src_offset, row, row * region[1],
            &mut im.storage.lock(), dst_base, img.row_pitch(), img.slice_pitch(),
            row, region[1], region[2],
        )?;
        Ok(self.complete(queue, &q, CL_COMMAND_COPY_BUFFER_TO_IMAGE, want_event))
    }

    fn enqueue_read_image(
        &self,
        queue: Handle,
        image: Handle,
        layout: &ImageRegion,
        dst: &mut [u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let (im, img) = self.image_in(image, &q)?;
        img.check(layout.origin, layout.region)?;
        let e = img.element_size;
        let row = if layout.row_pitch == 0 { layout.region[0] * e } else { layout.row_pitch };
        let slice = match layout.slice_pitch {
            0 => row * layout.region[1],
            p => p,
        };
        let o = layout.origin;
        let src_base = im.offset + o[2] * img.slice_pitch() + o[1] * img.row_pitch() + o[0] * e;
        copy_box(
            &im.storage.lock(), src_base, img.row_pitch(), img.slice_pitch(),
            dst, 0, row, slice,
            layout.region[0] * e, layout.region[1], layout.region[2],
        )?;
        Ok(self.complete(queue, &q, CL_COMMAND_READ_IMAGE, want_event))
    }

    fn enqueue_write_image(
        &self,
        queue: Handle,
        image: Handle,
        layout: &ImageRegion,
        src: &[u8],
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let (im, img) = self.image_in(image, &q)?;
        img.check(layout.origin, layout.region)?;
        let e = img.element_size;
        let row = if layout.row_pitch == 0 { layout.region[0] * e } else { layout.row_pitch };
        let slice = match layout.slice_pitch {
            0 => row * layout.region[1],
            p => p,
        };
        let o = layout.origin;
        let dst_base = im.offset + o[2] * img.slice_pitch() + o[1] * img.row_pitch() + o[0] * e;
        copy_box(
            src, 0, row, slice,
            &mut im.storage.lock(), dst_base, img.row_pitch(), img.slice_pitch(),
            layout.region[0] * e, layout.region[1], layout.region[2],
        )?;
        Ok(self.complete(queue, &q, CL_COMMAND_WRITE_IMAGE, want_event))
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: Handle,
        kernel: Handle,
        global_offset: Option<&[u64]>,
        global_size: &[u64],
        local_size: Option<&[u64]>,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        let k = self.kernel(kernel)?;
        if k.context != q.context {
            return Err(CL_INVALID_CONTEXT);
        }
        let dims = global_size.len();
        if !(1..=3).contains(&dims) {
            return Err(CL_INVALID_WORK_DIMENSION);
        }
        if global_size.contains(&0) {
            return Err(CL_INVALID_GLOBAL_WORK_SIZE);
        }
        if global_offset.is_some_and(|o| o.len() != dims) {
            return Err(CL_INVALID_GLOBAL_OFFSET);
        }
        if let Some(local) = local_size {
            let fits = local.len() == dims
                && local.iter().zip(global_size).all(|(l, g)| *l != 0 && g % l == 0)
                && local.iter().product::<u64>() <= MAX_WORK_GROUP;
            if !fits {
                return Err(CL_INVALID_WORK_GROUP_SIZE);
            }
        }
        if k.args_set.iter().any(|set| !set) {
            return Err(CL_INVALID_KERNEL_ARGS);
        }
        debug!(kernel = %k.decl.name, ?global_size, "simulated kernel launch");
        Ok(self.complete(queue, &q, CL_COMMAND_NDRANGE_KERNEL, want_event))
    }

    fn enqueue_marker_with_wait_list(
        &self,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        Ok(self.complete(queue, &q, CL_COMMAND_MARKER, want_event))
    }

    fn enqueue_barrier_with_wait_list(
        &self,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.tick();
        let q = self.begin(queue, wait)?;
        Ok(self.complete(queue, &q, CL_COMMAND_BARRIER, want_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        __kernel void add(__global const float* a, __global const float* b, __global float* out) {
            size_t i = get_global_id(0);
            out[i] = a[i] + b[i];
        }

        kernel void fill(global int *dst, int value)
        {
            dst[get_global_id(0)] = value;
        }
    "#;

    fn built_program(sim: &SimDriver) -> (Handle, Handle) {
        let ctx = sim.create_context(&[], &[DEVICE]).unwrap();
        let prog = sim.create_program_with_source(ctx, &[SOURCE.as_bytes().to_vec()]).unwrap();
        sim.build_program(prog, &[], b"-cl-fast-relaxed-math").unwrap();
        (ctx, prog)
    }

    #[test]
    fn parses_kernel_signatures() {
        let kernels = parse_kernels(SOURCE);
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].name, "add");
        assert_eq!(kernels[0].params.len(), 3);
        assert_eq!(kernels[0].param_name(2), Some("out"));
        assert_eq!(kernels[1].name, "fill");
        assert_eq!(kernels[1].param_name(0), Some("dst"));
        assert_eq!(kernels[1].param_type(1).as_deref(), Some("int"));
    }

    #[test]
    fn ignores_non_kernel_functions() {
        let kernels = parse_kernels("void helper(int a) {}\n__kernel void k(void) {}");
        assert_eq!(kernels, vec![KernelDecl { name: "k".into(), params: vec![] }]);
    }

    #[test]
    fn counts_every_call() {
        let sim = SimDriver::new();
        assert_eq!(sim.calls(), 0);
        sim.platform_ids().unwrap();
        let _ = sim.info(ResourceKind::Platform, Handle(1), CL_PLATFORM_NAME);
        assert_eq!(sim.calls(), 2);
    }

    #[test]
    fn buffer_write_read_and_sub_buffer() {
        let sim = SimDriver::new();
        let ctx = sim.create_context(&[CL_CONTEXT_PLATFORM, PLATFORM.raw(), 0], &[DEVICE]).unwrap();
        let q = sim.create_command_queue(ctx, DEVICE, 0).unwrap();
        let buf = sim.create_buffer(ctx, MemFlags::READ_WRITE.bits(), 16, None).unwrap();
        sim.enqueue_write_buffer(q, buf, 4, &[1, 2, 3, 4], &[], false).unwrap();

        let sub = sim.create_sub_buffer(buf, 0, CL_BUFFER_CREATE_TYPE_REGION, 4, 4).unwrap();
        let mut out = [0u8; 4];
        let ev = sim.enqueue_read_buffer(q, sub, 0, &mut out, &[], true).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        let ev = ev.unwrap();
        let status = sim.info(ResourceKind::Event, ev, CL_EVENT_COMMAND_EXECUTION_STATUS).unwrap();
        assert_eq!(status, CL_COMPLETE.to_le_bytes());

        let mut too_far = [0u8; 8];
        assert_eq!(
            sim.enqueue_read_buffer(q, sub, 0, &mut too_far, &[], false),
            Err(CL_INVALID_VALUE)
        );
    }

    #[test]
    fn host_pointer_flags_must_match_data() {
        let sim = SimDriver::new();
        let ctx = sim.create_context(&[], &[DEVICE]).unwrap();
        let copy = MemFlags::COPY_HOST_PTR.bits();
        assert_eq!(sim.create_buffer(ctx, copy, 4, None), Err(CL_INVALID_HOST_PTR));
        assert_eq!(sim.create_buffer(ctx, 0, 4, Some(&[0; 4])), Err(CL_INVALID_HOST_PTR));
        assert!(sim.create_buffer(ctx, copy, 4, Some(&[0; 4])).is_ok());
    }

    #[test]
    fn build_kernels_and_args() {
        let sim = SimDriver::new();
        let (ctx, prog) = built_program(&sim);
        let q = sim.create_command_queue(ctx, DEVICE, 0).unwrap();
        let k = sim.create_kernel(prog, b"fill").unwrap();
        assert_eq!(sim.create_kernel(prog, b"missing"), Err(CL_INVALID_KERNEL_NAME));

        assert_eq!(
            sim.enqueue_nd_range_kernel(q, k, None, &[64], None, &[], false),
            Err(CL_INVALID_KERNEL_ARGS)
        );
        let buf = sim.create_buffer(ctx, 0, 256, None).unwrap();
        sim.set_kernel_arg(k, 0, 8, Some(&buf.raw().to_le_bytes())).unwrap();
        sim.set_kernel_arg(k, 1, 4, Some(&7i32.to_le_bytes())).unwrap();
        assert_eq!(sim.set_kernel_arg(k, 2, 4, Some(&[0; 4])), Err(CL_INVALID_ARG_INDEX));
        assert_eq!(
            sim.enqueue_nd_range_kernel(q, k, None, &[64], Some(&[5]), &[], false),
            Err(CL_INVALID_WORK_GROUP_SIZE)
        );
        let event = sim
            .enqueue_nd_range_kernel(q, k, None, &[64], Some(&[16]), &[], true)
            .unwrap();
        assert!(event.is_some());

        let kernels = sim.create_kernels_in_program(prog).unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(sim.build_program(prog, &[], b""), Err(CL_INVALID_OPERATION));
    }

    #[test]
    fn failed_build_keeps_log() {
        let sim = SimDriver::new();
        let ctx = sim.create_context(&[], &[DEVICE]).unwrap();
        let src = b"__kernel void k() {}\n#error missing semicolon\n".to_vec();
        let prog = sim.create_program_with_source(ctx, &[src]).unwrap();
        assert_eq!(sim.build_program(prog, &[], b""), Err(CL_BUILD_PROGRAM_FAILURE));
        let log = sim.program_build_info(prog, DEVICE, CL_PROGRAM_BUILD_LOG).unwrap();
        assert!(bytes_to_string(&log).contains("missing semicolon"));
        let status = sim.program_build_info(prog, DEVICE, CL_PROGRAM_BUILD_STATUS).unwrap();
        assert_eq!(status, CL_BUILD_ERROR.to_le_bytes());
    }

    #[test]
    fn binaries_round_trip_through_program_info() {
        let sim = SimDriver::new();
        let (ctx, prog) = built_program(&sim);
        let binary = sim.info(ResourceKind::Program, prog, CL_PROGRAM_BINARIES).unwrap();
        assert_eq!(binary, SimDriver::binary_for(SOURCE.as_bytes()));

        let (created, statuses) = sim.create_program_with_binary(ctx, &[DEVICE], &[binary]);
        assert_eq!(statuses, vec![CL_SUCCESS]);
        let again = created.unwrap();
        sim.build_program(again, &[DEVICE], b"").unwrap();
        assert!(sim.create_kernel(again, b"add").is_ok());

        let (bad, statuses) =
            sim.create_program_with_binary(ctx, &[DEVICE], &[b"garbage".to_vec()]);
        assert_eq!(bad, Err(CL_INVALID_BINARY));
        assert_eq!(statuses, vec![CL_INVALID_BINARY]);
    }

    #[test]
    fn image_write_read_region() {
        let sim = SimDriver::new();
        let ctx = sim.create_context(&[], &[DEVICE]).unwrap();
        let q = sim.create_command_queue(ctx, DEVICE, 0).unwrap();
        let format = ImageFormat { channel_order: CL_R, channel_data_type: CL_UNSIGNED_INT8 };
        let desc = ImageDesc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            width: 4,
            height: 4,
            ..Default::default()
        };
        let host: Vec<u8> = (0..16).collect();
        let img = sim
            .create_image(ctx, MemFlags::COPY_HOST_PTR.bits(), format, &desc, Some(&host))
            .unwrap();

        let layout = ImageRegion {
            origin: [1, 1, 0],
            region: [2, 2, 1],
            row_pitch: 0,
            slice_pitch: 0,
        };
        let mut out = [0u8; 4];
        sim.enqueue_read_image(q, img, &layout, &mut out, &[], false).unwrap();
        assert_eq!(out, [5, 6, 9, 10]);

        sim.enqueue_write_image(q, img, &layout, &[0xFF; 4], &[], false).unwrap();
        let whole = ImageRegion { origin: [0; 3], region: [4, 4, 1], row_pitch: 0, slice_pitch: 0 };
        let mut all = [0u8; 16];
        sim.enqueue_read_image(q, img, &whole, &mut all, &[], false).unwrap();
        assert_eq!(&all[4..8], &[4, 0xFF, 0xFF, 7]);

        let elem = sim.image_info(img, CL_IMAGE_ELEMENT_SIZE).unwrap();
        assert_eq!(elem, 1u64.to_le_bytes());
    }

    #[test]
    fn user_event_status_is_one_shot() {
        let sim = SimDriver::new();
        let ctx = sim.create_context(&[], &[DEVICE]).unwrap();
        let ev = sim.create_user_event(ctx).unwrap();
        assert_eq!(sim.wait_for_events(&[ev]), Err(CL_INVALID_OPERATION));
        sim.set_user_event_status(ev, CL_COMPLETE).unwrap();
        assert_eq!(sim.set_user_event_status(ev, CL_COMPLETE), Err(CL_INVALID_OPERATION));
        sim.wait_for_events(&[ev]).unwrap();
    }

    #[test]
    fn release_destroys_at_zero() {
        let sim = SimDriver::new();
        let ctx = sim.create_context(&[], &[DEVICE]).unwrap();
        sim.retain(ResourceKind::Context, ctx).unwrap();
        sim.release(ResourceKind::Context, ctx).unwrap();
        assert_eq!(sim.live_objects(), 1);
        sim.release(ResourceKind::Context, ctx).unwrap();
        assert_eq!(sim.live_objects(), 0);
        assert_eq!(sim.release(ResourceKind::Context, ctx), Err(CL_INVALID_CONTEXT));
    }
}
