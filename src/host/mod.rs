// Host-facing surface: lets a GUI shell drive the dispatcher over JSON lines

pub mod protocol;
pub mod server;

pub use protocol::{HostCommand, HostResponse};
pub use server::HostServer;
