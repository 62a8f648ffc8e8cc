//! Flat calling-convention layer for the oriel request runtime.
//!
//! The host crosses the module boundary with machine words only: scalars,
//! pointer/length pairs and tagged optionals. This crate owns the structured
//! request/response model, the lift/lower codec between the two shapes, and
//! the allocator contract the host uses to place buffers in guest memory.

pub mod alloc;
pub mod codec;
mod http;

pub use codec::{AbiString, RawRequest, RetArea};
pub use http::{DecodeError, Method, Request, Response};
