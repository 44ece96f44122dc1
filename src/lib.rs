// Library exports for wand-bridge
// This allows the test suite to import modules

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod protocol;
pub mod worker;

pub use dispatcher::{ChatEvent, Dispatcher};
pub use error::{BridgeError, Result};
pub use worker::{Worker, WorkerCommand};
