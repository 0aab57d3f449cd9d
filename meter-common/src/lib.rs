//! Common functionality shared by the meter agent and collector.
#![warn(missing_docs)]

#[macro_use]
mod macros;

mod codec;
mod retry;

pub use crate::codec::*;
pub use crate::retry::*;
