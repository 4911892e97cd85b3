//! Utility types shared by the path tracer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`ShaderLogs`] - Per-stage shader build diagnostics

mod error;

pub use error::*;
