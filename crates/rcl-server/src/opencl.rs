//! Dynamic loading of the system OpenCL library.
//!
//! Uses `libloading` to open the ICD loader (`libOpenCL.so.1`, `OpenCL.dll`,
//! the OpenCL framework on macOS) and wraps the raw entry points. Handles
//! are the driver's pointers reinterpreted as 64-bit integers.

use std::ffi::{c_char, c_void, CString};
use std::mem::size_of;
use std::ptr;

use libloading::{Library, Symbol};
use rcl_common::platform::opencl_library_names;
use rcl_protocol::cl::*;
use rcl_protocol::status::*;
use rcl_protocol::{Handle, ResourceKind};
use thiserror::Error;
use tracing::{debug, info};

use crate::driver::{handles_from_info, ClDriver, DriverResult, ImageDesc, ImageFormat, ImageRegion};

type ClInt = i32;
type ClUint = u32;
type ClObject = *mut c_void;

/// `cl_image_desc` as the driver expects it.
#[repr(C)]
struct RawImageDesc {
    image_type: ClUint,
    width: usize,
    height: usize,
    depth: usize,
    array_size: usize,
    row_pitch: usize,
    slice_pitch: usize,
    num_mip_levels: ClUint,
    num_samples: ClUint,
    buffer: ClObject,
}

/// `cl_buffer_region`.
#[repr(C)]
struct BufferRegion {
    origin: usize,
    size: usize,
}

type FnGetPlatformIds = unsafe extern "C" fn(ClUint, *mut ClObject, *mut ClUint) -> ClInt;
type FnGetDeviceIds = unsafe extern "C" fn(
    ClObject,
    u64,
    ClUint,
    *mut ClObject,
    *mut ClUint,
) -> ClInt;
type FnUnloadPlatformCompiler = unsafe extern "C" fn(ClObject) -> ClInt;
type FnUnloadCompiler = unsafe extern "C" fn() -> ClInt;

/// Shape shared by every `clGet*Info` taking a single object.
type FnGetInfo = unsafe extern "C" fn(ClObject, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
/// `clGetProgramBuildInfo` and `clGetKernelWorkGroupInfo`.
type FnGetPairInfo = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClUint,
    usize,
    *mut c_void,
    *mut usize,
) -> ClInt;
type FnGetKernelArgInfo = unsafe extern "C" fn(
    ClObject,
    ClUint,
    ClUint,
    usize,
    *mut c_void,
    *mut usize,
) -> ClInt;
type FnRefCount = unsafe extern "C" fn(ClObject) -> ClInt;

type FnNotify = Option<unsafe extern "C" fn()>;
type FnCreateContext = unsafe extern "C" fn(
    *const isize,
    ClUint,
    *const ClObject,
    FnNotify,
    *mut c_void,
    *mut ClInt,
) -> ClObject;
type FnCreateContextFromType = unsafe extern "C" fn(
    *const isize,
    u64,
    FnNotify,
    *mut c_void,
    *mut ClInt,
) -> ClObject;
type FnCreateCommandQueue = unsafe extern "C" fn(ClObject, ClObject, u64, *mut ClInt) -> ClObject;
type FnQueueOp = unsafe extern "C" fn(ClObject) -> ClInt;

type FnCreateBuffer = unsafe extern "C" fn(
    ClObject,
    u64,
    usize,
    *mut c_void,
    *mut ClInt,
) -> ClObject;
type FnCreateSubBuffer = unsafe extern "C" fn(
    ClObject,
    u64,
    ClUint,
    *const c_void,
    *mut ClInt,
) -> ClObject;
type FnCreateImage = unsafe extern "C" fn(
    ClObject,
    u64,
    *const ImageFormat,
    *const RawImageDesc,
    *mut c_void,
    *mut ClInt,
) -> ClObject;
type FnCreateImage2D = unsafe extern "C" fn(
    ClObject,
    u64,
    *const ImageFormat,
    usize,
    usize,
    usize,
    *mut c_void,
    *mut ClInt,
) -> ClObject;
type FnCreateImage3D = unsafe extern "C" fn(
    ClObject,
    u64,
    *const ImageFormat,
    usize,
    usize,
    usize,
    usize,
    usize,
    *mut c_void,
    *mut ClInt,
) -> ClObject;
type FnGetSupportedImageFormats = unsafe extern "C" fn(
    ClObject,
    u64,
    ClUint,
    ClUint,
    *mut ImageFormat,
    *mut ClUint,
) -> ClInt;
type FnCreateSampler = unsafe extern "C" fn(
    ClObject,
    ClUint,
    ClUint,
    ClUint,
    *mut ClInt,
) -> ClObject;

type FnCreateProgramWithSource = unsafe extern "C" fn(
    ClObject,
    ClUint,
    *const *const c_char,
    *const usize,
    *mut ClInt,
) -> ClObject;
type FnCreateProgramWithBinary = unsafe extern "C" fn(
    ClObject,
    ClUint,
    *const ClObject,
    *const usize,
    *const *const u8,
    *mut ClInt,
    *mut ClInt,
) -> ClObject;
type FnBuildProgram = unsafe extern "C" fn(
    ClObject,
    ClUint,
    *const ClObject,
    *const c_char,
    FnNotify,
    *mut c_void,
) -> ClInt;
type FnCreateKernel = unsafe extern "C" fn(ClObject, *const c_char, *mut ClInt) -> ClObject;
type FnCreateKernelsInProgram = unsafe extern "C" fn(
    ClObject,
    ClUint,
    *mut ClObject,
    *mut ClUint,
) -> ClInt;
type FnSetKernelArg = unsafe extern "C" fn(ClObject, ClUint, usize, *const c_void) -> ClInt;

type FnWaitForEvents = unsafe extern "C" fn(ClUint, *const ClObject) -> ClInt;
type FnCreateUserEvent = unsafe extern "C" fn(ClObject, *mut ClInt) -> ClObject;
type FnSetUserEventStatus = unsafe extern "C" fn(ClObject, ClInt) -> ClInt;

type FnEnqueueReadBuffer = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClUint,
    usize,
    usize,
    *mut c_void,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueWriteBuffer = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClUint,
    usize,
    usize,
    *const c_void,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueCopyBuffer = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClObject,
    usize,
    usize,
    usize,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueCopyImage = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClObject,
    *const usize,
    *const usize,
    *const usize,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueCopyImageToBuffer = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClObject,
    *const usize,
    *const usize,
    usize,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueCopyBufferToImage = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClObject,
    usize,
    *const usize,
    *const usize,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueReadImage = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClUint,
    *const usize,
    *const usize,
    usize,
    usize,
    *mut c_void,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueWriteImage = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClUint,
    *const usize,
    *const usize,
    usize,
    usize,
    *const c_void,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueNdRangeKernel = unsafe extern "C" fn(
    ClObject,
    ClObject,
    ClUint,
    *const usize,
    *const usize,
    *const usize,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;
type FnEnqueueWithWaitList = unsafe extern "C" fn(
    ClObject,
    ClUint,
    *const ClObject,
    *mut ClObject,
) -> ClInt;

const CL_TRUE: ClUint = 1;

#[derive(Debug, Error)]
pub enum DriverLoadError {
    #[error("no OpenCL library could be opened ({0})")]
    Library(String),

    #[error("missing OpenCL entry point {name}: {source}")]
    Symbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

fn as_ptr(h: Handle) -> ClObject {
    h.raw() as usize as ClObject
}

fn as_handle(p: ClObject) -> Handle {
    Handle(p as usize as u64)
}

fn check(res: ClInt) -> DriverResult<()> {
    if res == CL_SUCCESS {
        Ok(())
    } else {
        Err(res)
    }
}

fn created(obj: ClObject, err: ClInt) -> DriverResult<Handle> {
    if err == CL_SUCCESS && !obj.is_null() {
        Ok(as_handle(obj))
    } else if err == CL_SUCCESS {
        Err(CL_OUT_OF_RESOURCES)
    } else {
        Err(err)
    }
}

fn to_sizes<const N: usize>(v: [u64; N]) -> [usize; N] {
    v.map(|x| x as usize)
}

/// Wait list as `(count, pointer)`; the pointer is null for an empty list.
fn wait_args(wait: &[ClObject]) -> (ClUint, *const ClObject) {
    if wait.is_empty() {
        (0, ptr::null())
    } else {
        (wait.len() as ClUint, wait.as_ptr())
    }
}

fn objects(handles: &[Handle]) -> Vec<ClObject> {
    handles.iter().map(|h| as_ptr(*h)).collect()
}

fn context_properties(properties: &[u64]) -> Vec<isize> {
    let mut props: Vec<isize> = properties.iter().map(|p| *p as isize).collect();
    if !props.is_empty() && props.last() != Some(&0) {
        props.push(0);
    }
    props
}

/// Bytes up to (not including) the first NUL, as a C string.
fn c_string(bytes: &[u8]) -> CString {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    // No interior NUL remains after truncation.
    CString::new(&bytes[..end]).unwrap_or_default()
}

/// The system OpenCL implementation, reached through its ICD loader.
pub struct OpenClLibrary {
    _lib: Library,
    get_platform_ids: FnGetPlatformIds,
    get_device_ids: FnGetDeviceIds,
    unload_platform_compiler: Option<FnUnloadPlatformCompiler>,
    unload_compiler: Option<FnUnloadCompiler>,

    get_platform_info: FnGetInfo,
    get_device_info: FnGetInfo,
    get_context_info: FnGetInfo,
    get_queue_info: FnGetInfo,
    get_mem_info: FnGetInfo,
    get_image_info: FnGetInfo,
    get_sampler_info: FnGetInfo,
    get_program_info: FnGetInfo,
    get_kernel_info: FnGetInfo,
    get_event_info: FnGetInfo,
    get_event_profiling_info: FnGetInfo,
    get_program_build_info: FnGetPairInfo,
    get_kernel_work_group_info: FnGetPairInfo,
    get_kernel_arg_info: Option<FnGetKernelArgInfo>,

    retain_device: Option<FnRefCount>,
    release_device: Option<FnRefCount>,
    retain_context: FnRefCount,
    release_context: FnRefCount,
    retain_queue: FnRefCount,
    release_queue: FnRefCount,
    retain_mem: FnRefCount,
    release_mem: FnRefCount,
    retain_sampler: FnRefCount,
    release_sampler: FnRefCount,
    retain_program: FnRefCount,
    release_program: FnRefCount,
    retain_kernel: FnRefCount,
    release_kernel: FnRefCount,
    retain_event: FnRefCount,
    release_event: FnRefCount,

    create_context: FnCreateContext,
    create_context_from_type: FnCreateContextFromType,
    create_command_queue: FnCreateCommandQueue,
    flush: FnQueueOp,
    finish: FnQueueOp,

    create_buffer: FnCreateBuffer,
    create_sub_buffer: Option<FnCreateSubBuffer>,
    create_image: Option<FnCreateImage>,
    create_image_2d: Option<FnCreateImage2D>,
    create_image_3d: Option<FnCreateImage3D>,
    get_supported_image_formats: FnGetSupportedImageFormats,
    create_sampler: FnCreateSampler,

    create_program_with_source: FnCreateProgramWithSource,
    create_program_with_binary: FnCreateProgramWithBinary,
    build_program: FnBuildProgram,
    create_kernel: FnCreateKernel,
    create_kernels_in_program: FnCreateKernelsInProgram,
    set_kernel_arg: FnSetKernelArg,

    wait_for_events: FnWaitForEvents,
    create_user_event: Option<FnCreateUserEvent>,
    set_user_event_status: Option<FnSetUserEventStatus>,

    enqueue_read_buffer: FnEnqueueReadBuffer,
    enqueue_write_buffer: FnEnqueueWriteBuffer,
    enqueue_copy_buffer: FnEnqueueCopyBuffer,
    enqueue_copy_image: FnEnqueueCopyImage,
    enqueue_copy_image_to_buffer: FnEnqueueCopyImageToBuffer,
    enqueue_copy_buffer_to_image: FnEnqueueCopyBufferToImage,
    enqueue_read_image: FnEnqueueReadImage,
    enqueue_write_image: FnEnqueueWriteImage,
    enqueue_nd_range_kernel: FnEnqueueNdRangeKernel,
    enqueue_marker_with_wait_list: Option<FnEnqueueWithWaitList>,
    enqueue_barrier_with_wait_list: Option<FnEnqueueWithWaitList>,
}

// SAFETY: OpenCL entry points are thread-safe (OpenCL 1.1+ requires every
// API call except clSetKernelArg on the same kernel to be callable from any
// thread). Kernels are owned by a single connection, so clSetKernelArg is
// never raced on one kernel.
unsafe impl Send for OpenClLibrary {}
unsafe impl Sync for OpenClLibrary {}

impl OpenClLibrary {
    /// Open the OpenCL library and resolve its entry points.
    ///
    /// `path` overrides the platform's default library names.
    pub fn load(path: Option<&str>) -> Result<Self, DriverLoadError> {
        let lib = Self::load_library(path)?;

        unsafe {
            let driver = Self {
                get_platform_ids: Self::load_fn(&lib, "clGetPlatformIDs")?,
                get_device_ids: Self::load_fn(&lib, "clGetDeviceIDs")?,
                unload_platform_compiler: Self::load_fn_opt(&lib, "clUnloadPlatformCompiler"),
                unload_compiler: Self::load_fn_opt(&lib, "clUnloadCompiler"),

                get_platform_info: Self::load_fn(&lib, "clGetPlatformInfo")?,
                get_device_info: Self::load_fn(&lib, "clGetDeviceInfo")?,
                get_context_info: Self::load_fn(&lib, "clGetContextInfo")?,
                get_queue_info: Self::load_fn(&lib, "clGetCommandQueueInfo")?,
                get_mem_info: Self::load_fn(&lib, "clGetMemObjectInfo")?,
                get_image_info: Self::load_fn(&lib, "clGetImageInfo")?,
                get_sampler_info: Self::load_fn(&lib, "clGetSamplerInfo")?,
                get_program_info: Self::load_fn(&lib, "clGetProgramInfo")?,
                get_kernel_info: Self::load_fn(&lib, "clGetKernelInfo")?,
                get_event_info: Self::load_fn(&lib, "clGetEventInfo")?,
                get_event_profiling_info: Self::load_fn(&lib, "clGetEventProfilingInfo")?,
                get_program_build_info: Self::load_fn(&lib, "clGetProgramBuildInfo")?,
                get_kernel_work_group_info: Self::load_fn(&lib, "clGetKernelWorkGroupInfo")?,
                get_kernel_arg_info: Self::load_fn_opt(&lib, "clGetKernelArgInfo"),

                retain_device: Self::load_fn_opt(&lib, "clRetainDevice"),
                release_device: Self::load_fn_opt(&lib, "clReleaseDevice"),
                retain_context: Self::load_fn(&lib, "clRetainContext")?,
                release_context: Self::load_fn(&lib, "clReleaseContext")?,
                retain_queue: Self::load_fn(&lib, "clRetainCommandQueue")?,
                release_queue: Self::load_fn(&lib, "clReleaseCommandQueue")?,
                retain_mem: Self::load_fn(&lib, "clRetainMemObject")?,
                release_mem: Self::load_fn(&lib, "clReleaseMemObject")?,
                retain_sampler: Self::load_fn(&lib, "clRetainSampler")?,
                release_sampler: Self::load_fn(&lib, "clReleaseSampler")?,
                retain_program: Self::load_fn(&lib, "clRetainProgram")?,
                release_program: Self::load_fn(&lib, "clReleaseProgram")?,
                retain_kernel: Self::load_fn(&lib, "clRetainKernel")?,
                release_kernel: Self::load_fn(&lib, "clReleaseKernel")?,
                retain_event: Self::load_fn(&lib, "clRetainEvent")?,
                release_event: Self::load_fn(&lib, "clReleaseEvent")?,

                create_context: Self::load_fn(&lib, "clCreateContext")?,
                create_context_from_type: Self::load_fn(&lib, "clCreateContextFromType")?,
                create_command_queue: Self::load_fn(&lib, "clCreateCommandQueue")?,
                flush: Self::load_fn(&lib, "clFlush")?,
                finish: Self::load_fn(&lib, "clFinish")?,

                create_buffer: Self::load_fn(&lib, "clCreateBuffer")?,
                create_sub_buffer: Self::load_fn_opt(&lib, "clCreateSubBuffer"),
                create_image: Self::load_fn_opt(&lib, "clCreateImage"),
                create_image_2d: Self::load_fn_opt(&lib, "clCreateImage2D"),
                create_image_3d: Self::load_fn_opt(&lib, "clCreateImage3D"),
                get_supported_image_formats: Self::load_fn(&lib, "clGetSupportedImageFormats")?,
                create_sampler: Self::load_fn(&lib, "clCreateSampler")?,

                create_program_with_source: Self::load_fn(&lib, "clCreateProgramWithSource")?,
                create_program_with_binary: Self::load_fn(&lib, "clCreateProgramWithBinary")?,
                build_program: Self::load_fn(&lib, "clBuildProgram")?,
                create_kernel: Self::load_fn(&lib, "clCreateKernel")?,
                create_kernels_in_program: Self::load_fn(&lib, "clCreateKernelsInProgram")?,
                set_kernel_arg: Self::load_fn(&lib, "clSetKernelArg")?,

                wait_for_events: Self::load_fn(&lib, "clWaitForEvents")?,
                create_user_event: Self::load_fn_opt(&lib, "clCreateUserEvent"),
                set_user_event_status: Self::load_fn_opt(&lib, "clSetUserEventStatus"),

                enqueue_read_buffer: Self::load_fn(&lib, "clEnqueueReadBuffer")?,
                enqueue_write_buffer: Self::load_fn(&lib, "clEnqueueWriteBuffer")?,
                enqueue_copy_buffer: Self::load_fn(&lib, "clEnqueueCopyBuffer")?,
                enqueue_copy_image: Self::load_fn(&lib, "clEnqueueCopyImage")?,
                enqueue_copy_image_to_buffer: Self::load_fn(&lib, "clEnqueueCopyImageToBuffer")?,
                enqueue_copy_buffer_to_image: Self::load_fn(&lib, "clEnqueueCopyBufferToImage")?,
                enqueue_read_image: Self::load_fn(&lib, "clEnqueueReadImage")?,
                enqueue_write_image: Self::load_fn(&lib, "clEnqueueWriteImage")?,
                enqueue_nd_range_kernel: Self::load_fn(&lib, "clEnqueueNDRangeKernel")?,
                enqueue_marker_with_wait_list: Self::load_fn_opt(
                    &lib,
                    "clEnqueueMarkerWithWaitList",
                ),
                enqueue_barrier_with_wait_list: Self::load_fn_opt(
                    &lib,
                    "clEnqueueBarrierWithWaitList",
                ),
                _lib: lib,
            };

            info!("OpenCL library loaded successfully");
            Ok(driver)
        }
    }

    fn load_library(path: Option<&str>) -> Result<Library, DriverLoadError> {
        let names: Vec<&str> = match path {
            Some(p) => vec![p],
            None => opencl_library_names().to_vec(),
        };

        let mut last_err = String::new();
        for name in names {
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    info!("loaded OpenCL library from: {}", name);
                    return Ok(lib);
                }
                Err(e) => {
                    last_err = format!("{}: {}", name, e);
                    debug!("failed to load {}: {}", name, e);
                }
            }
        }

        Err(DriverLoadError::Library(last_err))
    }

    unsafe fn load_fn<F: Copy>(lib: &Library, name: &'static str) -> Result<F, DriverLoadError> {
        let sym: Symbol<F> = unsafe { lib.get(name.as_bytes()) }
            .map_err(|source| DriverLoadError::Symbol { name, source })?;
        Ok(*sym)
    }

    unsafe fn load_fn_opt<F: Copy>(lib: &Library, name: &str) -> Option<F> {
        unsafe { lib.get(name.as_bytes()) }.ok().map(|s: Symbol<F>| *s)
    }

    /// Run a two-pass info query: size first, then the value.
    fn query(
        &self,
        call: impl Fn(usize, *mut c_void, *mut usize) -> ClInt,
    ) -> DriverResult<Vec<u8>> {
        let mut size = 0usize;
        check(call(0, ptr::null_mut(), &mut size as *mut usize))?;
        let mut value = vec![0u8; size];
        if size > 0 {
            check(call(size, value.as_mut_ptr().cast(), ptr::null_mut()))?;
        }
        Ok(value)
    }

    fn object_info(&self, f: FnGetInfo, object: Handle, param: u32) -> DriverResult<Vec<u8>> {
        let obj = as_ptr(object);
        self.query(|size, value, ret| unsafe { f(obj, param, size, value, ret) })
    }

    /// `CL_PROGRAM_BINARIES` takes an array of per-device buffers; the
    /// value handed back is their concatenation.
    fn program_binaries(&self, program: Handle) -> DriverResult<Vec<u8>> {
        let sizes = self.object_info(self.get_program_info, program, CL_PROGRAM_BINARY_SIZES)?;
        let sizes = handles_from_info(&sizes);
        let mut binaries: Vec<Vec<u8>> = sizes
            .iter()
            .map(|s| vec![0u8; s.raw() as usize])
            .collect();
        let mut ptrs: Vec<*mut u8> = binaries
            .iter_mut()
            .map(|b| if b.is_empty() { ptr::null_mut() } else { b.as_mut_ptr() })
            .collect();
        let res = unsafe {
            (self.get_program_info)(
                as_ptr(program),
                CL_PROGRAM_BINARIES,
                ptrs.len() * size_of::<*mut u8>(),
                ptrs.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        };
        check(res)?;
        Ok(binaries.concat())
    }

    fn ref_counters(&self, kind: ResourceKind) -> Option<(FnRefCount, FnRefCount)> {
        match kind {
            ResourceKind::Platform => None,
            ResourceKind::Device => self.retain_device.zip(self.release_device),
            ResourceKind::Context => Some((self.retain_context, self.release_context)),
            ResourceKind::Queue => Some((self.retain_queue, self.release_queue)),
            ResourceKind::Buffer => Some((self.retain_mem, self.release_mem)),
            ResourceKind::Sampler => Some((self.retain_sampler, self.release_sampler)),
            ResourceKind::Program => Some((self.retain_program, self.release_program)),
            ResourceKind::Kernel => Some((self.retain_kernel, self.release_kernel)),
            ResourceKind::Event => Some((self.retain_event, self.release_event)),
        }
    }

    fn create_image_legacy(
        &self,
        context: Handle,
        flags: u64,
        format: &ImageFormat,
        desc: &ImageDesc,
        host: *mut c_void,
    ) -> DriverResult<Handle> {
        let mut err = CL_SUCCESS;
        let obj = match (desc.image_type, self.create_image_2d, self.create_image_3d) {
            (CL_MEM_OBJECT_IMAGE2D, Some(f), _) => unsafe {
                f(
                    as_ptr(context),
                    flags,
                    format,
                    desc.width as usize,
                    desc.height as usize,
                    desc.row_pitch as usize,
                    host,
                    &mut err,
                )
            },
            (CL_MEM_OBJECT_IMAGE3D, _, Some(f)) => unsafe {
                f(
                    as_ptr(context),
                    flags,
                    format,
                    desc.width as usize,
                    desc.height as usize,
                    desc.depth as usize,
                    desc.row_pitch as usize,
                    desc.slice_pitch as usize,
                    host,
                    &mut err,
                )
            },
            _ => return Err(CL_INVALID_OPERATION),
        };
        created(obj, err)
    }

    fn enqueue_with_wait_list(
        &self,
        f: Option<FnEnqueueWithWaitList>,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        let f = f.ok_or(CL_INVALID_OPERATION)?;
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event: ClObject = ptr::null_mut();
        let res = unsafe { f(as_ptr(queue), n, list, event_out(&mut event, want_event)) };
        check(res)?;
        Ok(event_result(event, want_event))
    }
}

fn event_out(slot: &mut ClObject, want: bool) -> *mut ClObject {
    if want {
        slot
    } else {
        ptr::null_mut()
    }
}

fn event_result(event: ClObject, want: bool) -> Option<Handle> {
    (want && !event.is_null()).then(|| as_handle(event))
}

impl ClDriver for OpenClLibrary {
    fn backend(&self) -> &'static str {
        "opencl"
    }

    fn platform_ids(&self) -> DriverResult<Vec<Handle>> {
        let mut count: ClUint = 0;
        let res = unsafe { (self.get_platform_ids)(0, ptr::null_mut(), &mut count) };
        // The ICD loader reports no platforms this way.
        if res == CL_PLATFORM_NOT_FOUND_KHR {
            return Ok(Vec::new());
        }
        check(res)?;
        let mut ids = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            check(unsafe { (self.get_platform_ids)(count, ids.as_mut_ptr(), ptr::null_mut()) })?;
        }
        Ok(ids.into_iter().map(as_handle).collect())
    }

    fn device_ids(&self, platform: Handle, device_type: u64) -> DriverResult<Vec<Handle>> {
        let mut count: ClUint = 0;
        let p = as_ptr(platform);
        check(unsafe { (self.get_device_ids)(p, device_type, 0, ptr::null_mut(), &mut count) })?;
        let mut ids = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            check(unsafe {
                (self.get_device_ids)(p, device_type, count, ids.as_mut_ptr(), ptr::null_mut())
            })?;
        }
        Ok(ids.into_iter().map(as_handle).collect())
    }

    fn unload_platform_compiler(&self, platform: Handle) -> DriverResult<()> {
        let res = match (self.unload_platform_compiler, self.unload_compiler) {
            (Some(f), _) => unsafe { f(as_ptr(platform)) },
            (None, Some(f)) => unsafe { f() },
            (None, None) => CL_SUCCESS,
        };
        check(res)
    }

    fn info(&self, kind: ResourceKind, object: Handle, param: u32) -> DriverResult<Vec<u8>> {
        let f = match kind {
            ResourceKind::Platform => self.get_platform_info,
            ResourceKind::Device => self.get_device_info,
            ResourceKind::Context => self.get_context_info,
            ResourceKind::Queue => self.get_queue_info,
            ResourceKind::Buffer => self.get_mem_info,
            ResourceKind::Sampler => self.get_sampler_info,
            ResourceKind::Program if param == CL_PROGRAM_BINARIES => {
                return self.program_binaries(object)
            }
            ResourceKind::Program => self.get_program_info,
            ResourceKind::Kernel => self.get_kernel_info,
            ResourceKind::Event => self.get_event_info,
        };
        self.object_info(f, object, param)
    }

    fn image_info(&self, image: Handle, param: u32) -> DriverResult<Vec<u8>> {
        self.object_info(self.get_image_info, image, param)
    }

    fn program_build_info(
        &self,
        program: Handle,
        device: Handle,
        param: u32,
    ) -> DriverResult<Vec<u8>> {
        let f = self.get_program_build_info;
        let (p, d) = (as_ptr(program), as_ptr(device));
        self.query(|size, value, ret| unsafe { f(p, d, param, size, value, ret) })
    }

    fn kernel_work_group_info(
        &self,
        kernel: Handle,
        device: Handle,
        param: u32,
    ) -> DriverResult<Vec<u8>> {
        let f = self.get_kernel_work_group_info;
        let (k, d) = (as_ptr(kernel), as_ptr(device));
        self.query(|size, value, ret| unsafe { f(k, d, param, size, value, ret) })
    }

    fn kernel_arg_info(&self, kernel: Handle, index: u32, param: u32) -> DriverResult<Vec<u8>> {
        let f = self.get_kernel_arg_info.ok_or(CL_INVALID_OPERATION)?;
        let k = as_ptr(kernel);
        self.query(|size, value, ret| unsafe { f(k, index, param, size, value, ret) })
    }

    fn event_profiling_info(&self, event: Handle, param: u32) -> DriverResult<Vec<u8>> {
        self.object_info(self.get_event_profiling_info, event, param)
    }

    fn retain(&self, kind: ResourceKind, object: Handle) -> DriverResult<()> {
        match self.ref_counters(kind) {
            Some((retain, _)) => check(unsafe { retain(as_ptr(object)) }),
            None => Ok(()),
        }
    }

    fn release(&self, kind: ResourceKind, object: Handle) -> DriverResult<()> {
        match self.ref_counters(kind) {
            Some((_, release)) => check(unsafe { release(as_ptr(object)) }),
            None => Ok(()),
        }
    }

    fn create_context(&self, properties: &[u64], devices: &[Handle]) -> DriverResult<Handle> {
        let props = context_properties(properties);
        let devs = objects(devices);
        let mut err = CL_SUCCESS;
        let ctx = unsafe {
            (self.create_context)(
                if props.is_empty() { ptr::null() } else { props.as_ptr() },
                devs.len() as ClUint,
                if devs.is_empty() { ptr::null() } else { devs.as_ptr() },
                None,
                ptr::null_mut(),
                &mut err,
            )
        };
        created(ctx, err)
    }

    fn create_context_from_type(
        &self,
        properties: &[u64],
        device_type: u64,
    ) -> DriverResult<Handle> {
        let props = context_properties(properties);
        let mut err = CL_SUCCESS;
        let ctx = unsafe {
            (self.create_context_from_type)(
                if props.is_empty() { ptr::null() } else { props.as_ptr() },
                device_type,
                None,
                ptr::null_mut(),
                &mut err,
            )
        };
        created(ctx, err)
    }

    fn create_command_queue(
        &self,
        context: Handle,
        device: Handle,
        properties: u64,
    ) -> DriverResult<Handle> {
        let mut err = CL_SUCCESS;
        let q = unsafe {
            (self.create_command_queue)(as_ptr(context), as_ptr(device), properties, &mut err)
        };
        created(q, err)
    }

    fn flush(&self, queue: Handle) -> DriverResult<()> {
        check(unsafe { (self.flush)(as_ptr(queue)) })
    }

    fn finish(&self, queue: Handle) -> DriverResult<()> {
        check(unsafe { (self.finish)(as_ptr(queue)) })
    }

    fn create_buffer(
        &self,
        context: Handle,
        flags: u64,
        size: u64,
        host: Option<&[u8]>,
    ) -> DriverResult<Handle> {
        // The driver copies host data during the call (COPY_HOST_PTR), so
        // the borrowed slice only has to outlive it.
        let host_ptr = host.map_or(ptr::null_mut(), |h| h.as_ptr() as *mut c_void);
        let mut err = CL_SUCCESS;
        let mem = unsafe {
            (self.create_buffer)(as_ptr(context), flags, size as usize, host_ptr, &mut err)
        };
        created(mem, err)
    }

    fn create_sub_buffer(
        &self,
        buffer: Handle,
        flags: u64,
        create_type: u32,
        origin: u64,
        size: u64,
    ) -> DriverResult<Handle> {
        let f = self.create_sub_buffer.ok_or(CL_INVALID_OPERATION)?;
        let region = BufferRegion { origin: origin as usize, size: size as usize };
        let mut err = CL_SUCCESS;
        let mem = unsafe {
            f(
                as_ptr(buffer),
                flags,
                create_type,
                (&region as *const BufferRegion).cast(),
                &mut err,
            )
        };
        created(mem, err)
    }

    fn create_image(
        &self,
        context: Handle,
        flags: u64,
        format: ImageFormat,
        desc: &ImageDesc,
        host: Option<&[u8]>,
    ) -> DriverResult<Handle> {
        let host_ptr = host.map_or(ptr::null_mut(), |h| h.as_ptr() as *mut c_void);
        let Some(f) = self.create_image else {
            return self.create_image_legacy(context, flags, &format, desc, host_ptr);
        };
        let raw = RawImageDesc {
            image_type: desc.image_type,
            width: desc.width as usize,
            height: desc.height as usize,
            depth: desc.depth as usize,
            array_size: desc.array_size as usize,
            row_pitch: desc.row_pitch as usize,
            slice_pitch: desc.slice_pitch as usize,
            num_mip_levels: desc.num_mip_levels,
            num_samples: desc.num_samples,
            buffer: as_ptr(desc.buffer),
        };
        let mut err = CL_SUCCESS;
        let mem = unsafe { f(as_ptr(context), flags, &format, &raw, host_ptr, &mut err) };
        created(mem, err)
    }

    fn supported_image_formats(
        &self,
        context: Handle,
        flags: u64,
        image_type: u32,
    ) -> DriverResult<Vec<ImageFormat>> {
        let ctx = as_ptr(context);
        let mut count: ClUint = 0;
        check(unsafe {
            (self.get_supported_image_formats)(
                ctx,
                flags,
                image_type,
                0,
                ptr::null_mut(),
                &mut count,
            )
        })?;
        let mut formats = vec![ImageFormat::default(); count as usize];
        if count > 0 {
            check(unsafe {
                (self.get_supported_image_formats)(
                    ctx,
                    flags,
                    image_type,
                    count,
                    formats.as_mut_ptr(),
                    ptr::null_mut(),
                )
            })?;
        }
        Ok(formats)
    }

    fn create_sampler(
        &self,
        context: Handle,
        normalized: bool,
        addressing: u32,
        filter: u32,
    ) -> DriverResult<Handle> {
        let mut err = CL_SUCCESS;
        let s = unsafe {
            (self.create_sampler)(
                as_ptr(context),
                normalized as ClUint,
                addressing,
                filter,
                &mut err,
            )
        };
        created(s, err)
    }

    fn create_program_with_source(
        &self,
        context: Handle,
        sources: &[Vec<u8>],
    ) -> DriverResult<Handle> {
        let strings: Vec<*const c_char> = sources.iter().map(|s| s.as_ptr().cast()).collect();
        let lengths: Vec<usize> = sources.iter().map(Vec::len).collect();
        let mut err = CL_SUCCESS;
        let p = unsafe {
            (self.create_program_with_source)(
                as_ptr(context),
                strings.len() as ClUint,
                strings.as_ptr(),
                lengths.as_ptr(),
                &mut err,
            )
        };
        created(p, err)
    }

    fn create_program_with_binary(
        &self,
        context: Handle,
        devices: &[Handle],
        binaries: &[Vec<u8>],
    ) -> (DriverResult<Handle>, Vec<Status>) {
        let devs = objects(devices);
        let lengths: Vec<usize> = binaries.iter().map(Vec::len).collect();
        let ptrs: Vec<*const u8> = binaries.iter().map(|b| b.as_ptr()).collect();
        let mut statuses = vec![CL_SUCCESS; binaries.len()];
        let mut err = CL_SUCCESS;
        let p = unsafe {
            (self.create_program_with_binary)(
                as_ptr(context),
                devs.len() as ClUint,
                devs.as_ptr(),
                lengths.as_ptr(),
                ptrs.as_ptr(),
                statuses.as_mut_ptr(),
                &mut err,
            )
        };
        (created(p, err), statuses)
    }

    fn build_program(
        &self,
        program: Handle,
        devices: &[Handle],
        options: &[u8],
    ) -> DriverResult<()> {
        let devs = objects(devices);
        let options = c_string(options);
        check(unsafe {
            (self.build_program)(
                as_ptr(program),
                devs.len() as ClUint,
                if devs.is_empty() { ptr::null() } else { devs.as_ptr() },
                options.as_ptr(),
                None,
                ptr::null_mut(),
            )
        })
    }

    fn create_kernel(&self, program: Handle, name: &[u8]) -> DriverResult<Handle> {
        let name = c_string(name);
        let mut err = CL_SUCCESS;
        let k = unsafe { (self.create_kernel)(as_ptr(program), name.as_ptr(), &mut err) };
        created(k, err)
    }

    fn create_kernels_in_program(&self, program: Handle) -> DriverResult<Vec<Handle>> {
        let p = as_ptr(program);
        let mut count: ClUint = 0;
        check(unsafe { (self.create_kernels_in_program)(p, 0, ptr::null_mut(), &mut count) })?;
        let mut kernels = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            check(unsafe {
                (self.create_kernels_in_program)(p, count, kernels.as_mut_ptr(), ptr::null_mut())
            })?;
        }
        Ok(kernels.into_iter().map(as_handle).collect())
    }

    fn set_kernel_arg(
        &self,
        kernel: Handle,
        index: u32,
        size: u64,
        value: Option<&[u8]>,
    ) -> DriverResult<()> {
        let value_ptr = value.map_or(ptr::null(), |v| v.as_ptr().cast());
        check(unsafe { (self.set_kernel_arg)(as_ptr(kernel), index, size as usize, value_ptr) })
    }

    fn wait_for_events(&self, events: &[Handle]) -> DriverResult<()> {
        let list = objects(events);
        check(unsafe { (self.wait_for_events)(list.len() as ClUint, list.as_ptr()) })
    }

    fn create_user_event(&self, context: Handle) -> DriverResult<Handle> {
        let f = self.create_user_event.ok_or(CL_INVALID_OPERATION)?;
        let mut err = CL_SUCCESS;
        let e = unsafe { f(as_ptr(context), &mut err) };
        created(e, err)
    }

    fn set_user_event_status(&self, event: Handle, status: Status) -> DriverResult<()> {
        let f = self.set_user_event_status.ok_or(CL_INVALID_OPERATION)?;
        check(unsafe { f(as_ptr(event), status) })
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
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_read_buffer)(
                as_ptr(queue),
                as_ptr(buffer),
                CL_TRUE,
                offset as usize,
                dst.len(),
                dst.as_mut_ptr().cast(),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_write_buffer)(
                as_ptr(queue),
                as_ptr(buffer),
                CL_TRUE,
                offset as usize,
                src.len(),
                src.as_ptr().cast(),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_copy_buffer)(
                as_ptr(queue),
                as_ptr(src),
                as_ptr(dst),
                src_offset as usize,
                dst_offset as usize,
                size as usize,
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let (so, d_o, r) = (to_sizes(src_origin), to_sizes(dst_origin), to_sizes(region));
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_copy_image)(
                as_ptr(queue),
                as_ptr(src),
                as_ptr(dst),
                so.as_ptr(),
                d_o.as_ptr(),
                r.as_ptr(),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let (o, r) = (to_sizes(origin), to_sizes(region));
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_copy_image_to_buffer)(
                as_ptr(queue),
                as_ptr(image),
                as_ptr(buffer),
                o.as_ptr(),
                r.as_ptr(),
                dst_offset as usize,
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let (o, r) = (to_sizes(origin), to_sizes(region));
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_copy_buffer_to_image)(
                as_ptr(queue),
                as_ptr(buffer),
                as_ptr(image),
                src_offset as usize,
                o.as_ptr(),
                r.as_ptr(),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let (o, r) = (to_sizes(layout.origin), to_sizes(layout.region));
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_read_image)(
                as_ptr(queue),
                as_ptr(image),
                CL_TRUE,
                o.as_ptr(),
                r.as_ptr(),
                layout.row_pitch as usize,
                layout.slice_pitch as usize,
                dst.as_mut_ptr().cast(),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let (o, r) = (to_sizes(layout.origin), to_sizes(layout.region));
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_write_image)(
                as_ptr(queue),
                as_ptr(image),
                CL_TRUE,
                o.as_ptr(),
                r.as_ptr(),
                layout.row_pitch as usize,
                layout.slice_pitch as usize,
                src.as_ptr().cast(),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
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
        let sizes = |v: &[u64]| v.iter().map(|x| *x as usize).collect::<Vec<usize>>();
        let offset = global_offset.map(sizes);
        let global = sizes(global_size);
        let local = local_size.map(sizes);
        let wait = objects(wait);
        let (n, list) = wait_args(&wait);
        let mut event = ptr::null_mut();
        check(unsafe {
            (self.enqueue_nd_range_kernel)(
                as_ptr(queue),
                as_ptr(kernel),
                global.len() as ClUint,
                offset.as_ref().map_or(ptr::null(), |o| o.as_ptr()),
                global.as_ptr(),
                local.as_ref().map_or(ptr::null(), |l| l.as_ptr()),
                n,
                list,
                event_out(&mut event, want_event),
            )
        })?;
        Ok(event_result(event, want_event))
    }

    fn enqueue_marker_with_wait_list(
        &self,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.enqueue_with_wait_list(self.enqueue_marker_with_wait_list, queue, wait, want_event)
    }

    fn enqueue_barrier_with_wait_list(
        &self,
        queue: Handle,
        wait: &[Handle],
        want_event: bool,
    ) -> DriverResult<Option<Handle>> {
        self.enqueue_with_wait_list(self.enqueue_barrier_with_wait_list, queue, wait, want_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_survive_pointer_round_trip() {
        let h = Handle(0x7f00_dead_beef);
        assert_eq!(as_handle(as_ptr(h)), h);
        assert!(as_ptr(Handle::null()).is_null());
    }

    #[test]
    fn context_properties_get_terminated() {
        assert!(context_properties(&[]).is_empty());
        assert_eq!(context_properties(&[0x1084, 7]), vec![0x1084, 7, 0]);
        assert_eq!(context_properties(&[0x1084, 7, 0]), vec![0x1084, 7, 0]);
    }

    #[test]
    fn c_string_stops_at_nul() {
        assert_eq!(c_string(b"-O2\0junk").as_bytes(), b"-O2");
        assert_eq!(c_string(b"").as_bytes(), b"");
    }

    #[test]
    fn created_maps_null_and_errors() {
        assert_eq!(created(ptr::null_mut(), CL_INVALID_VALUE), Err(CL_INVALID_VALUE));
        assert_eq!(created(ptr::null_mut(), CL_SUCCESS), Err(CL_OUT_OF_RESOURCES));
        assert_eq!(created(0x40 as ClObject, CL_SUCCESS), Ok(Handle(0x40)));
    }

    #[test]
    fn missing_library_is_reported() {
        match OpenClLibrary::load(Some("/nonexistent/libOpenCL-rcl-test.so")) {
            Err(DriverLoadError::Library(msg)) => assert!(msg.contains("libOpenCL-rcl-test")),
            Err(other) => panic!("expected Library error, got {:?}", other),
            Ok(_) => panic!("expected Library error, got a loaded library"),
        }
    }
}
