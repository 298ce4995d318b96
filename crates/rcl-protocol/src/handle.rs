use std::fmt;

use crate::status;

/// A server-side object handle as it travels on the wire.
///
/// The value is whatever the driver (or the server, for event wrappers)
/// handed out. Clients treat it as opaque bits and send it back verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u64);

impl Handle {
    /// The null handle.
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Kind of resource a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Platform,
    Device,
    Context,
    Queue,
    /// Buffers, sub-buffers and images.
    Buffer,
    Sampler,
    Program,
    Kernel,
    Event,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Platform,
        ResourceKind::Device,
        ResourceKind::Context,
        ResourceKind::Queue,
        ResourceKind::Buffer,
        ResourceKind::Sampler,
        ResourceKind::Program,
        ResourceKind::Kernel,
        ResourceKind::Event,
    ];

    /// Status reported to the client when a handle of this kind is unknown.
    pub const fn invalid_status(self) -> i32 {
        match self {
            ResourceKind::Platform => status::CL_INVALID_PLATFORM,
            ResourceKind::Device => status::CL_INVALID_DEVICE,
            ResourceKind::Context => status::CL_INVALID_CONTEXT,
            ResourceKind::Queue => status::CL_INVALID_COMMAND_QUEUE,
            ResourceKind::Buffer => status::CL_INVALID_MEM_OBJECT,
            ResourceKind::Sampler => status::CL_INVALID_SAMPLER,
            ResourceKind::Program => status::CL_INVALID_PROGRAM,
            ResourceKind::Kernel => status::CL_INVALID_KERNEL,
            ResourceKind::Event => status::CL_INVALID_EVENT,
        }
    }

    /// Whether retain/release change the connection-local count.
    /// Platforms and root devices live as long as the driver does.
    pub const fn is_counted(self) -> bool {
        !matches!(self, ResourceKind::Platform | ResourceKind::Device)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ResourceKind::Platform => "platform",
            ResourceKind::Device => "device",
            ResourceKind::Context => "context",
            ResourceKind::Queue => "command queue",
            ResourceKind::Buffer => "memory object",
            ResourceKind::Sampler => "sampler",
            ResourceKind::Program => "program",
            ResourceKind::Kernel => "kernel",
            ResourceKind::Event => "event",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
