mod frame;
mod reading;

pub use frame::*;
pub use reading::*;
