use std::path::PathBuf;

use thiserror::Error;

/// A remote read that failed or came back short. Either way the buffer is
/// unusable; callers must not interpret partial data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to read {len} bytes at {addr:#x} in target process")]
pub struct ReadError {
    pub addr: u64,
    pub len: usize,
}

/// Failures while walking a remote image's header chain and export data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Read(#[from] ReadError),

    /// The remote bytes do not match the expected image layout. Not
    /// retryable; the module is unsupported or corrupted.
    #[error("malformed image header: {0}")]
    Decode(&'static str),
}

/// Stage-tagged injection failures, one variant per pipeline step. The
/// orchestrator stops at the first of these; nothing is retried.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("payload DLL not found: {0}")]
    PayloadMissing(PathBuf),

    #[error("process '{0}' is not running")]
    ProcessNotFound(String),

    #[error("could not open process {pid} (os error {code:#x})")]
    OpenProcess { pid: u32, code: i32 },

    #[error("architecture probe failed (os error {code:#x})")]
    ArchProbe { code: i32 },

    #[error("failed to allocate {size} bytes in target (os error {code:#x})")]
    Allocation { size: usize, code: i32 },

    #[error("write to target at {addr:#x} failed (os error {code:#x})")]
    Write { addr: u64, code: i32 },

    #[error("short write to target: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("module '{0}' not found in target process")]
    ModuleNotFound(String),

    #[error("resolving the loader entry point failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("symbol '{0}' is not exported by the target's loader module")]
    SymbolNotFound(String),

    #[error("local lookup of '{symbol}' failed (os error {code:#x})")]
    LocalLookup { symbol: String, code: i32 },

    /// The resolved address cannot be represented in the 32-bit target's
    /// address space. Indicates a resolver bug, not a target condition.
    #[error("resolved address {addr:#x} exceeds the 32-bit target's address space")]
    RangeViolation { addr: u64 },

    #[error("failed to create remote thread (os error {code:#x})")]
    ThreadCreate { code: i32 },

    #[error("wait on remote thread failed (status {status:#x})")]
    WaitFailed { status: u32 },

    #[error("failed to read remote thread exit code (os error {code:#x})")]
    ExitCode { code: i32 },

    #[error("remote loader returned NULL; the target rejected the payload")]
    LoadRejected,
}

const ERROR_ACCESS_DENIED: u32 = 5;

impl InjectError {
    /// True when the failure is consistent with missing privileges, i.e.
    /// the user should retry from an elevated prompt.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::OpenProcess { code, .. } if (*code as u32) & 0xFFFF == ERROR_ACCESS_DENIED)
    }
}
