//! Injection orchestration: the sequential pipeline from an opened target
//! process to a loaded payload module.
//!
//! The pipeline never backtracks and never retries. Repeating a write would
//! be harmless, but repeating thread creation would start a second loader in
//! the target, so the first failure aborts the whole attempt.

use std::path::Path;
use std::time::Duration;

use log::info;

use crate::errors::InjectError;
use crate::exports::{self, ProcessMemory};

/// Module and symbol every Windows process resolves the library loader from.
pub const LOADER_MODULE: &str = "kernel32.dll";
pub const LOADER_SYMBOL: &str = "LoadLibraryA";

/// How long to wait for the remote loader thread to signal.
pub const LOAD_WAIT: Duration = Duration::from_secs(10);

/// Pointer width of this injector build.
const CALLER_IS_64BIT: bool = cfg!(target_pointer_width = "64");

/// Result of waiting on the remote thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitVerdict {
    Completed,
    TimedOut,
}

/// Outcome of an injection attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The remote loader returned this non-zero module handle.
    Loaded { module_handle: u32 },
    /// The wait window elapsed. The remote thread may still finish later;
    /// it is neither tracked nor killed.
    TimedOut,
}

/// One injection attempt's capability surface over the target process.
///
/// `process::TargetProcess` implements this over the Win32 calls; tests
/// drive the orchestrator with an in-memory fake. Handles owned by an
/// implementation are released when it drops, whichever way the pipeline
/// exits.
pub trait Target: ProcessMemory {
    /// Whether the target runs in the narrower (WOW64) execution mode.
    fn is_wow64(&self) -> Result<bool, InjectError>;

    /// Commits `size` read-write bytes in the target, no reuse or pooling.
    fn allocate(&mut self, size: usize) -> Result<u64, InjectError>;

    /// Writes `bytes` at `addr`, returning the count actually written.
    fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<usize, InjectError>;

    /// Base address of a module in the target, if currently loaded.
    fn module_base(&self, module: &str) -> Result<Option<u64>, InjectError>;

    /// Resolves `symbol` in the injector's own copy of `module`. Only valid
    /// when caller and target share an execution mode, where system modules
    /// occupy the same addresses in both processes.
    fn local_export(&self, module: &str, symbol: &str) -> Result<u64, InjectError>;

    /// Starts a remote thread at `entry` with `arg` as its sole argument.
    fn spawn_thread(&mut self, entry: u64, arg: u64) -> Result<(), InjectError>;

    fn wait_thread(&mut self, timeout: Duration) -> Result<WaitVerdict, InjectError>;

    fn thread_exit_code(&mut self) -> Result<u32, InjectError>;
}

/// Validates the payload path and encodes it for the target: the file must
/// exist, the path is made absolute, and the bytes are NUL-terminated.
/// Runs before any process is opened.
pub fn prepare_payload(path: &Path) -> Result<Vec<u8>, InjectError> {
    if !path.exists() {
        return Err(InjectError::PayloadMissing(path.to_path_buf()));
    }
    let absolute = std::path::absolute(path)
        .map_err(|_| InjectError::PayloadMissing(path.to_path_buf()))?;
    let mut bytes = absolute.to_string_lossy().into_owned().into_bytes();
    bytes.push(0);
    Ok(bytes)
}

/// Runs the injection pipeline against an opened target: allocate scratch,
/// write the payload path, resolve the loader entry point, run it remotely,
/// interpret the result.
pub fn inject_payload<T: Target>(
    target: &mut T,
    payload: &[u8],
) -> Result<InjectionOutcome, InjectError> {
    let narrow = target.is_wow64()?;
    let cross_mode = CALLER_IS_64BIT && narrow;

    info!("injector: {}", if CALLER_IS_64BIT { "64-bit" } else { "32-bit" });
    info!("target:   {}", if narrow { "32-bit (WOW64)" } else { "native" });
    if cross_mode {
        info!("cross-architecture injection, resolving loader through the target's image");
    }

    let scratch = target.allocate(payload.len())?;
    info!("allocated {} bytes at {scratch:#x}", payload.len());

    let written = target.write_memory(scratch, payload)?;
    if written < payload.len() {
        return Err(InjectError::ShortWrite { written, expected: payload.len() });
    }
    info!("wrote {written} bytes (payload path)");

    let entry = if cross_mode {
        let base = target
            .module_base(LOADER_MODULE)?
            .ok_or_else(|| InjectError::ModuleNotFound(LOADER_MODULE.into()))?;
        exports::find_remote_export(target, base, LOADER_SYMBOL)?
            .ok_or_else(|| InjectError::SymbolNotFound(LOADER_SYMBOL.into()))?
    } else {
        target.local_export(LOADER_MODULE, LOADER_SYMBOL)?
    };
    info!("{LOADER_SYMBOL} at {entry:#x}");

    // A narrow target cannot branch above 4 GiB. Reaching this means the
    // resolution above went wrong, not that the target is in a bad state.
    if narrow && entry > u64::from(u32::MAX) {
        return Err(InjectError::RangeViolation { addr: entry });
    }

    target.spawn_thread(entry, scratch)?;
    info!("remote thread started, waiting up to {}s for the loader", LOAD_WAIT.as_secs());

    match target.wait_thread(LOAD_WAIT)? {
        WaitVerdict::TimedOut => Ok(InjectionOutcome::TimedOut),
        WaitVerdict::Completed => {
            let module_handle = target.thread_exit_code()?;
            if module_handle == 0 {
                Err(InjectError::LoadRejected)
            } else {
                Ok(InjectionOutcome::Loaded { module_handle })
            }
        }
    }
}
