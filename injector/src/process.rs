//! Win32 plumbing: the opened target process, its remote memory, module
//! snapshots, and the remote thread that runs the loader.

use std::ffi::c_void;
use std::time::Duration;

use log::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Memory::{VirtualAllocEx, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};
use windows::Win32::System::Threading::{
    CreateRemoteThread, GetExitCodeThread, IsWow64Process, OpenProcess, WaitForSingleObject,
    PROCESS_ALL_ACCESS,
};
use windows::core::BOOL;
use windows_strings::PCSTR;

use crate::errors::{InjectError, ReadError};
use crate::exports::ProcessMemory;
use crate::inject::{Target, WaitVerdict};

/// Owning handle wrapper. Closes exactly once, on every exit path.
struct HandleGuard(HANDLE);

impl HandleGuard {
    fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// An opened target process plus, once created, the remote loader thread.
/// Both handles are exclusive to one injection attempt and are released on
/// drop; the type is not reusable across attempts.
pub struct TargetProcess {
    pid: u32,
    process: HandleGuard,
    thread: Option<HandleGuard>,
}

impl TargetProcess {
    /// Opens `pid` with full access rights.
    pub fn open(pid: u32) -> Result<Self, InjectError> {
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }
            .map_err(|e| InjectError::OpenProcess { pid, code: e.code().0 })?;
        debug!("opened process {pid}");
        Ok(Self { pid, process: HandleGuard(handle), thread: None })
    }

    fn loader_thread(&self) -> Result<&HandleGuard, InjectError> {
        self.thread.as_ref().ok_or(InjectError::WaitFailed { status: u32::MAX })
    }
}

impl ProcessMemory for TargetProcess {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut buffer = vec![0u8; len];
        let mut read = 0usize;
        let result = unsafe {
            ReadProcessMemory(
                self.process.raw(),
                addr as usize as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                len,
                Some(&mut read),
            )
        };
        if let Err(e) = result {
            debug!("ReadProcessMemory of {len} bytes at {addr:#x} failed: {e}");
            return Err(ReadError { addr, len });
        }
        if read < len {
            return Err(ReadError { addr, len });
        }
        Ok(buffer)
    }
}

impl Target for TargetProcess {
    fn is_wow64(&self) -> Result<bool, InjectError> {
        let mut wow64 = BOOL(0);
        unsafe { IsWow64Process(self.process.raw(), &mut wow64) }
            .map_err(|e| InjectError::ArchProbe { code: e.code().0 })?;
        Ok(wow64.as_bool())
    }

    fn allocate(&mut self, size: usize) -> Result<u64, InjectError> {
        let addr = unsafe {
            VirtualAllocEx(self.process.raw(), None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        if addr.is_null() {
            let code = windows::core::Error::from_win32().code().0;
            return Err(InjectError::Allocation { size, code });
        }
        Ok(addr as u64)
    }

    fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<usize, InjectError> {
        let mut written = 0usize;
        unsafe {
            WriteProcessMemory(
                self.process.raw(),
                addr as usize as *const c_void,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                Some(&mut written),
            )
        }
        .map_err(|e| InjectError::Write { addr, code: e.code().0 })?;
        Ok(written)
    }

    fn module_base(&self, module: &str) -> Result<Option<u64>, InjectError> {
        Ok(find_module_base(self.pid, module))
    }

    fn local_export(&self, module: &str, symbol: &str) -> Result<u64, InjectError> {
        let module_z = format!("{module}\0");
        let symbol_z = format!("{symbol}\0");
        let handle = unsafe { GetModuleHandleA(PCSTR(module_z.as_ptr())) }
            .map_err(|e| InjectError::LocalLookup { symbol: symbol.into(), code: e.code().0 })?;
        let address = unsafe { GetProcAddress(handle, PCSTR(symbol_z.as_ptr())) }
            .ok_or_else(|| InjectError::SymbolNotFound(symbol.into()))?;
        Ok(address as usize as u64)
    }

    fn spawn_thread(&mut self, entry: u64, arg: u64) -> Result<(), InjectError> {
        let thread = unsafe {
            CreateRemoteThread(
                self.process.raw(),
                None,
                0,
                Some(std::mem::transmute::<usize, unsafe extern "system" fn(*mut c_void) -> u32>(
                    entry as usize,
                )),
                Some(arg as usize as *const c_void),
                0,
                None,
            )
        }
        .map_err(|e| InjectError::ThreadCreate { code: e.code().0 })?;
        self.thread = Some(HandleGuard(thread));
        Ok(())
    }

    fn wait_thread(&mut self, timeout: Duration) -> Result<WaitVerdict, InjectError> {
        let thread = self.loader_thread()?;
        let event = unsafe { WaitForSingleObject(thread.raw(), timeout.as_millis() as u32) };
        if event == WAIT_OBJECT_0 {
            Ok(WaitVerdict::Completed)
        } else if event == WAIT_TIMEOUT {
            Ok(WaitVerdict::TimedOut)
        } else {
            Err(InjectError::WaitFailed { status: event.0 })
        }
    }

    fn thread_exit_code(&mut self) -> Result<u32, InjectError> {
        let thread = self.loader_thread()?;
        let mut code = 0u32;
        unsafe { GetExitCodeThread(thread.raw(), &mut code) }
            .map_err(|e| InjectError::ExitCode { code: e.code().0 })?;
        Ok(code)
    }
}

/// First case-insensitive match in the target's module snapshot, or `None`.
/// The snapshot includes 32-bit modules so a WOW64 target's system modules
/// are visible to a 64-bit caller. No fallback search: a target that has
/// not finished initializing simply reports the module as absent.
pub fn find_module_base(pid: u32, module: &str) -> Option<u64> {
    let snapshot = HandleGuard(
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) }.ok()?,
    );
    let mut entry = MODULEENTRY32W {
        dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };

    unsafe {
        if Module32FirstW(snapshot.raw(), &mut entry).is_err() {
            return None;
        }
        loop {
            let len = entry.szModule.iter().position(|&c| c == 0).unwrap_or(entry.szModule.len());
            let name = String::from_utf16_lossy(&entry.szModule[..len]);
            if name.eq_ignore_ascii_case(module) {
                return Some(entry.modBaseAddr as u64);
            }
            if Module32NextW(snapshot.raw(), &mut entry).is_err() {
                break;
            }
        }
    }
    None
}
