pub mod handle;
pub mod status;
pub mod cl;
pub mod command;
pub mod wire;
pub mod error;

pub use handle::{Handle, ResourceKind};
pub use command::{Command, COMMAND_COUNT};
pub use error::ProtocolError;
pub use status::Status;
pub use wire::{PayloadReader, Reply, Request, WaitList, WireError};
