use std::fmt;

use crate::error::ProtocolError;

/// Width of the command table. Every id at or above this is rejected.
pub const COMMAND_COUNT: usize = 75;

macro_rules! commands {
    ($($id:literal => $name:ident),+ $(,)?) => {
        /// Remote operations, numbered as they appear on the wire.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum Command {
            $($name = $id,)+
        }

        impl Command {
            /// Every command in opcode order.
            pub const ALL: [Command; COMMAND_COUNT] = [$(Command::$name,)+];

            pub const fn name(self) -> &'static str {
                match self {
                    $(Command::$name => stringify!($name),)+
                }
            }
        }

        impl TryFrom<u32> for Command {
            type Error = ProtocolError;

            fn try_from(id: u32) -> Result<Self, Self::Error> {
                match id {
                    $($id => Ok(Command::$name),)+
                    other => Err(ProtocolError::UnknownCommand(other)),
                }
            }
        }
    };
}

commands! {
    0 => GetPlatformIDs,
    1 => GetPlatformInfo,
    2 => GetDeviceIDs,
    3 => GetDeviceInfo,
    4 => CreateContext,
    5 => CreateContextFromType,
    6 => RetainContext,
    7 => ReleaseContext,
    8 => GetContextInfo,
    9 => CreateCommandQueue,
    10 => RetainCommandQueue,
    11 => ReleaseCommandQueue,
    12 => GetCommandQueueInfo,
    13 => CreateBuffer,
    14 => RetainMemObject,
    15 => ReleaseMemObject,
    16 => GetSupportedImageFormats,
    17 => GetMemObjectInfo,
    18 => GetImageInfo,
    19 => CreateSampler,
    20 => RetainSampler,
    21 => ReleaseSampler,
    22 => GetSamplerInfo,
    23 => CreateProgramWithSource,
    24 => CreateProgramWithBinary,
    25 => RetainProgram,
    26 => ReleaseProgram,
    27 => BuildProgram,
    28 => GetProgramBuildInfo,
    29 => CreateKernel,
    30 => CreateKernelsInProgram,
    31 => RetainKernel,
    32 => ReleaseKernel,
    33 => SetKernelArg,
    34 => GetKernelInfo,
    35 => GetKernelWorkGroupInfo,
    36 => WaitForEvents,
    37 => GetEventInfo,
    38 => RetainEvent,
    39 => ReleaseEvent,
    40 => GetEventProfilingInfo,
    41 => Flush,
    42 => Finish,
    43 => EnqueueReadBuffer,
    44 => EnqueueWriteBuffer,
    45 => EnqueueCopyBuffer,
    46 => EnqueueCopyImage,
    47 => EnqueueCopyImageToBuffer,
    48 => EnqueueCopyBufferToImage,
    49 => EnqueueNDRangeKernel,
    50 => CreateSubBuffer,
    51 => CreateUserEvent,
    52 => SetUserEventStatus,
    53 => EnqueueReadBufferRect,
    54 => EnqueueWriteBufferRect,
    55 => EnqueueCopyBufferRect,
    56 => EnqueueReadImage,
    57 => EnqueueWriteImage,
    58 => CreateSubDevices,
    59 => RetainDevice,
    60 => ReleaseDevice,
    61 => CreateImage,
    62 => CreateProgramWithBuiltInKernels,
    63 => CompileProgram,
    64 => LinkProgram,
    65 => UnloadPlatformCompiler,
    66 => GetProgramInfo,
    67 => GetKernelArgInfo,
    68 => EnqueueFillBuffer,
    69 => EnqueueFillImage,
    70 => EnqueueMigrateMemObjects,
    71 => EnqueueMarkerWithWaitList,
    72 => EnqueueBarrierWithWaitList,
    73 => CreateImage2D,
    74 => CreateImage3D,
}

impl Command {
    pub const fn id(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_table_order() {
        for (i, cmd) in Command::ALL.iter().enumerate() {
            assert_eq!(cmd.id() as usize, i);
            assert_eq!(Command::try_from(i as u32).unwrap(), *cmd);
        }
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        match Command::try_from(COMMAND_COUNT as u32) {
            Err(ProtocolError::UnknownCommand(75)) => {}
            other => panic!("expected UnknownCommand, got {:?}", other),
        }
        assert!(Command::try_from(u32::MAX).is_err());
    }

    #[test]
    fn display_includes_name_and_id() {
        assert_eq!(Command::GetPlatformIDs.to_string(), "GetPlatformIDs(0)");
        assert_eq!(Command::CreateImage3D.to_string(), "CreateImage3D(74)");
    }
}
