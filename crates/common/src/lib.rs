pub mod command;
pub mod config;
pub mod error;
pub mod topics;
pub mod types;

pub use command::{Command, InboundCommand, Response};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
