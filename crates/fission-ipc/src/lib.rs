//! # fission-ipc
//!
//! The framed command protocol that drives a FissionDB partition engine
//! from its coordinating host.
//!
//! Requests are `[u32 msg_size][u32 command_code][payload]` (size inclusive
//! of the 8-byte header, all integers network order); every reply starts
//! with an `i8` status byte. The [`EngineService`] runs a blocking
//! read/dispatch/reply loop over any `Read + Write` stream until EOF or a
//! `Terminate` command. While a request is being served the engine may
//! call back out over the same stream via the [`WireTopend`]: dependency
//! retrieval, plan fetch, export handoff, and UDF invocation.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codes;
mod service;
mod wire_topend;

pub use codes::{status, CommandCode};
pub use service::EngineService;
pub use wire_topend::WireTopend;
