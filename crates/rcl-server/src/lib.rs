pub mod discovery;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod event;
pub mod handlers;
pub mod opencl;
pub mod server;
pub mod session;
pub mod sim;

pub use driver::{load_driver, ClDriver};
pub use server::{RclServer, ServerState};
pub use sim::SimDriver;
