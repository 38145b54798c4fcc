pub mod dispatcher;
pub mod monitor;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use monitor::{Monitor, SweepOutcome};
