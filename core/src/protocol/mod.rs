//! Wire protocol: frame kinds and constants

pub mod constants;
mod frame;

pub use frame::{Frame, WireMessage};
