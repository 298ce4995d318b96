//! Status codes carried in every reply.
//!
//! These are the driver's own codes; the server never translates them.

/// A driver status (`cl_int`).
pub type Status = i32;

pub const CL_SUCCESS: Status = 0;
pub const CL_DEVICE_NOT_FOUND: Status = -1;
pub const CL_DEVICE_NOT_AVAILABLE: Status = -2;
pub const CL_COMPILER_NOT_AVAILABLE: Status = -3;
pub const CL_MEM_OBJECT_ALLOCATION_FAILURE: Status = -4;
pub const CL_OUT_OF_RESOURCES: Status = -5;
pub const CL_OUT_OF_HOST_MEMORY: Status = -6;
pub const CL_PROFILING_INFO_NOT_AVAILABLE: Status = -7;
pub const CL_MEM_COPY_OVERLAP: Status = -8;
pub const CL_IMAGE_FORMAT_NOT_SUPPORTED: Status = -10;
pub const CL_BUILD_PROGRAM_FAILURE: Status = -11;
pub const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: Status = -14;
pub const CL_KERNEL_ARG_INFO_NOT_AVAILABLE: Status = -19;

pub const CL_INVALID_VALUE: Status = -30;
pub const CL_INVALID_DEVICE_TYPE: Status = -31;
pub const CL_INVALID_PLATFORM: Status = -32;
pub const CL_INVALID_DEVICE: Status = -33;
pub const CL_INVALID_CONTEXT: Status = -34;
pub const CL_INVALID_QUEUE_PROPERTIES: Status = -35;
pub const CL_INVALID_COMMAND_QUEUE: Status = -36;
pub const CL_INVALID_HOST_PTR: Status = -37;
pub const CL_INVALID_MEM_OBJECT: Status = -38;
pub const CL_INVALID_IMAGE_FORMAT_DESCRIPTOR: Status = -39;
pub const CL_INVALID_IMAGE_SIZE: Status = -40;
pub const CL_INVALID_SAMPLER: Status = -41;
pub const CL_INVALID_BINARY: Status = -42;
pub const CL_INVALID_BUILD_OPTIONS: Status = -43;
pub const CL_INVALID_PROGRAM: Status = -44;
pub const CL_INVALID_PROGRAM_EXECUTABLE: Status = -45;
pub const CL_INVALID_KERNEL_NAME: Status = -46;
pub const CL_INVALID_KERNEL_DEFINITION: Status = -47;
pub const CL_INVALID_KERNEL: Status = -48;
pub const CL_INVALID_ARG_INDEX: Status = -49;
pub const CL_INVALID_ARG_VALUE: Status = -50;
pub const CL_INVALID_ARG_SIZE: Status = -51;
pub const CL_INVALID_KERNEL_ARGS: Status = -52;
pub const CL_INVALID_WORK_DIMENSION: Status = -53;
pub const CL_INVALID_WORK_GROUP_SIZE: Status = -54;
pub const CL_INVALID_WORK_ITEM_SIZE: Status = -55;
pub const CL_INVALID_GLOBAL_OFFSET: Status = -56;
pub const CL_INVALID_EVENT_WAIT_LIST: Status = -57;
pub const CL_INVALID_EVENT: Status = -58;
pub const CL_INVALID_OPERATION: Status = -59;
pub const CL_INVALID_BUFFER_SIZE: Status = -61;
pub const CL_INVALID_GLOBAL_WORK_SIZE: Status = -63;
pub const CL_INVALID_PROPERTY: Status = -64;
pub const CL_INVALID_IMAGE_DESCRIPTOR: Status = -65;

/// Returned by the ICD loader when no vendor platform is installed.
pub const CL_PLATFORM_NOT_FOUND_KHR: Status = -1001;

// Command execution status.
pub const CL_COMPLETE: Status = 0;
pub const CL_RUNNING: Status = 1;
pub const CL_SUBMITTED: Status = 2;
pub const CL_QUEUED: Status = 3;

/// Human-readable name of a status code.
pub fn status_name(code: Status) -> &'static str {
    match code {
        CL_SUCCESS => "CL_SUCCESS",
        CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        CL_COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
        CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        CL_PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
        CL_MEM_COPY_OVERLAP => "CL_MEM_COPY_OVERLAP",
        CL_IMAGE_FORMAT_NOT_SUPPORTED => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
        CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
            "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
        }
        CL_KERNEL_ARG_INFO_NOT_AVAILABLE => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
        CL_INVALID_VALUE => "CL_INVALID_VALUE",
        CL_INVALID_DEVICE_TYPE => "CL_INVALID_DEVICE_TYPE",
        CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
        CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
        CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        CL_INVALID_QUEUE_PROPERTIES => "CL_INVALID_QUEUE_PROPERTIES",
        CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        CL_INVALID_HOST_PTR => "CL_INVALID_HOST_PTR",
        CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        CL_INVALID_IMAGE_FORMAT_DESCRIPTOR => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
        CL_INVALID_IMAGE_SIZE => "CL_INVALID_IMAGE_SIZE",
        CL_INVALID_SAMPLER => "CL_INVALID_SAMPLER",
        CL_INVALID_BINARY => "CL_INVALID_BINARY",
        CL_INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
        CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        CL_INVALID_KERNEL_DEFINITION => "CL_INVALID_KERNEL_DEFINITION",
        CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
        CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        CL_INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
        CL_INVALID_GLOBAL_OFFSET => "CL_INVALID_GLOBAL_OFFSET",
        CL_INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        CL_INVALID_EVENT => "CL_INVALID_EVENT",
        CL_INVALID_OPERATION => "CL_INVALID_OPERATION",
        CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        CL_INVALID_PROPERTY => "CL_INVALID_PROPERTY",
        CL_INVALID_IMAGE_DESCRIPTOR => "CL_INVALID_IMAGE_DESCRIPTOR",
        CL_PLATFORM_NOT_FOUND_KHR => "CL_PLATFORM_NOT_FOUND_KHR",
        _ => "CL_UNKNOWN_ERROR",
    }
}
