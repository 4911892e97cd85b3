//! Error types for the path tracer.

use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Class of a graphics-API error reported by the driver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuErrorKind {
    /// Invalid enum/value/operation (wgpu validation error)
    Validation,
    /// Allocation failed on the device
    OutOfMemory,
    /// Driver or backend internal failure
    Internal,
}

impl fmt::Display for GpuErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "VALIDATION",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Pipeline stage a diagnostic log belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    /// Pipeline creation (the wgpu equivalent of program linking)
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
            Self::Link => "link",
        };
        f.write_str(s)
    }
}

/// Diagnostic text captured for one stage of one program.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLog {
    pub stage: ShaderStage,
    pub success: bool,
    pub log: String,
}

/// All stage logs of one shader program, in build order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderLogs {
    pub stages: Vec<StageLog>,
}

impl ShaderLogs {
    pub fn push(&mut self, stage: ShaderStage, success: bool, log: impl Into<String>) {
        self.stages.push(StageLog { stage, success, log: log.into() });
    }

    /// True when every recorded stage compiled/linked.
    pub fn is_ok(&self) -> bool {
        self.stages.iter().all(|s| s.success)
    }

    /// Log text for a stage (empty when the stage produced no output).
    pub fn get(&self, stage: ShaderStage) -> Option<&str> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| s.log.as_str())
    }
}

impl fmt::Display for ShaderLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.stages {
            writeln!(f, "{}: {}", s.stage, s.log)?;
        }
        Ok(())
    }
}

/// Build output of one named shader program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramLog {
    pub program: &'static str,
    pub logs: ShaderLogs,
}

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable graphics context (adapter, device, render state)
    #[error("Graphics context unavailable: {0}")]
    Context(String),

    /// Shader compilation or pipeline linking failed
    #[error("Shader program '{program}' failed to build:\n{logs}")]
    ShaderBuild { program: &'static str, logs: ShaderLogs },

    /// Graphics API error raised while executing an operation
    #[error("GpuError: {op}: {kind}: {message}: {location}")]
    Gpu {
        op: &'static str,
        location: &'static Location<'static>,
        kind: GpuErrorKind,
        message: String,
    },

    /// Viewport with a zero dimension
    #[error("Invalid viewport size {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },

    /// Operation issued before `init()`
    #[error("Renderer is not initialized")]
    NotInitialized,

    /// Shader programs failed to build; nothing may be dispatched
    #[error("Shader programs are unusable, see build log")]
    ProgramUnusable,

    /// Caller supplied buffer cannot hold the requested image
    #[error("Buffer too small: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding error
    #[cfg(feature = "viewer")]
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    /// Create a GPU error located at the caller.
    #[track_caller]
    pub fn gpu(op: &'static str, kind: GpuErrorKind, message: impl Into<String>) -> Self {
        Self::Gpu {
            op,
            location: Location::caller(),
            kind,
            message: message.into(),
        }
    }
}

/// Result type alias for path tracer operations.
pub type Result<T> = std::result::Result<T, Error>;
