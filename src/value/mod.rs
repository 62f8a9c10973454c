//! Cell values and their byte encoding.
//!
//! - [`Value`] - A typed cell value
//! - [`ValueCodec`] - Strategy that turns values into bytes and back
//! - [`BincodeCodec`] - Default strategy

mod codec;
#[allow(clippy::module_inception)]
mod value;

pub use codec::{BincodeCodec, ValueCodec};
pub use value::Value;
