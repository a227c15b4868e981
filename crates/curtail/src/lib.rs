#![doc = include_str!("../README.md")]

mod allocator;
mod base62;
mod cache;
mod encoder;
mod error;
mod store;
mod time;

pub use crate::allocator::*;
pub use crate::base62::*;
pub use crate::cache::*;
pub use crate::encoder::*;
pub use crate::error::*;
pub use crate::store::*;
pub use crate::time::*;
