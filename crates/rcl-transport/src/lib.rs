pub mod error;
pub mod framing;
pub mod transfer;

pub use error::TransportError;
pub use framing::{Channel, FramePoll};
pub use transfer::{TransferCompletion, TransferJob, TransferListener};
