mod discovery;
mod manager;
mod serial;
mod watchdog;

pub use discovery::*;
pub use manager::*;
pub use serial::*;
pub use watchdog::*;
