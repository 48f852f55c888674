//! In-game diagnostic overlay for GoldSrc. Everything here runs inside
//! `hl.exe` after the injector loads the DLL; the injector never calls in.
#![cfg(windows)]

use std::ffi::c_void;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;
use windows::Win32::System::Threading::{CreateThread, THREAD_CREATION_FLAGS};
use windows::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_F6};

static OVERLAY_ENABLED: AtomicBool = AtomicBool::new(false);

fn log_to_file(msg: &str) {
    if let Ok(mut file) =
        OpenOptions::new().create(true).append(true).open("C:/temp/goldsrc_overlay.log")
    {
        let _ = writeln!(file, "{}", msg);
    }
}

/// Polls the toggle hotkey for the lifetime of the process. Runs on its own
/// thread; DllMain must not block.
unsafe extern "system" fn hotkey_watcher(_param: *mut c_void) -> u32 {
    loop {
        // Low bit: pressed since the previous poll.
        let pressed = unsafe { GetAsyncKeyState(i32::from(VK_F6.0)) } & 1 != 0;
        if pressed {
            let enabled = !OVERLAY_ENABLED.load(Ordering::Relaxed);
            OVERLAY_ENABLED.store(enabled, Ordering::Relaxed);
            log_to_file(if enabled { "[overlay] enabled" } else { "[overlay] disabled" });
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

/// Exported so external tooling can query the toggle state.
#[unsafe(no_mangle)]
pub extern "system" fn overlay_enabled() -> i32 {
    OVERLAY_ENABLED.load(Ordering::Relaxed).into()
}

#[unsafe(no_mangle)]
pub extern "system" fn DllMain(_hinst: *mut (), reason: u32, _reserved: *mut ()) -> i32 {
    if reason == DLL_PROCESS_ATTACH {
        log_to_file("[overlay] loaded into process");
        unsafe {
            let _ = CreateThread(None, 0, Some(hotkey_watcher), None, THREAD_CREATION_FLAGS(0), None);
        }
    }
    1
}
