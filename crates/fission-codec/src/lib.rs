//! # fission-codec
//!
//! Big-endian framed serialization for the FissionDB partition engine.
//!
//! Everything that crosses the engine boundary (command frames, parameter
//! sets, result dependencies, table payloads, exception frames) is encoded
//! with the fixed-width big-endian primitives in this crate:
//!
//! - [`SerializeInput`]: positional reader over a borrowed byte range
//! - [`SerializeOutput`]: bounded writer that fails on overflow
//! - [`FallbackOutput`]: result-buffer writer that spills to a heap buffer
//!   instead of failing
//! - [`rowcodec`]: value, row, result-set, and table payload formats

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod input;
mod output;
pub mod rowcodec;

pub use error::{CodecError, CodecResult};
pub use input::SerializeInput;
pub use output::{FallbackOutput, Output, SerializeOutput, VecOutput};
