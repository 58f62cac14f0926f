//! Data models for SmartThings entities

mod command;
mod device;
mod status;

pub use command::*;
pub use device::*;
pub use status::*;
