#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,

    #[error("empty message frame")]
    EmptyFrame,

    #[error("message frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: u64, limit: u64 },

    #[error("bulk frame too large: {size} bytes (limit {limit})")]
    BulkTooLarge { size: u64, limit: u64 },

    #[error("bulk frame length {got} does not match the announced {expected}")]
    LengthMismatch { expected: u64, got: u64 },

    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("no free transfer port in {base}..{end}")]
    NoTransferPort { base: u16, end: u32 },

    #[error("transfer aborted before completion")]
    Aborted,
}

impl TransportError {
    /// Map end-of-stream I/O errors to [`TransportError::Closed`].
    pub(crate) fn from_read(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
                TransportError::Closed
            }
            _ => TransportError::Io(e),
        }
    }
}
