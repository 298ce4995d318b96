use crate::command::Command;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too short for a command id")]
    MissingCommand,

    #[error("unknown command id: {0}")]
    UnknownCommand(u32),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(Command),

    #[error("malformed arguments for {command}: {source}")]
    Malformed {
        command: Command,
        #[source]
        source: crate::wire::WireError,
    },
}
