//! Injects the GoldSrc diagnostic overlay into a running `hl.exe`, including
//! across a pointer-width boundary (64-bit injector, 32-bit game). The
//! loader entry point inside a WOW64 target is found by parsing the target's
//! own `kernel32.dll` export table remotely; `GetProcAddress` only answers
//! for the injector's side of the boundary.

#[cfg(windows)]
mod args;
mod errors;
mod exports;
mod inject;
#[cfg(windows)]
mod process;
#[cfg(windows)]
mod processes;

/// The GoldSrc engine process the overlay targets.
const TARGET_PROCESS: &str = "hl.exe";
/// Hotkey the loaded overlay listens for, handled entirely in-target.
const OVERLAY_HOTKEY: &str = "F6";

#[cfg(windows)]
fn main() {
    use log::{error, info, warn};

    use crate::inject::InjectionOutcome;

    init_logging();

    match run() {
        Ok(InjectionOutcome::Loaded { module_handle }) => {
            info!("injection successful, module handle {module_handle:#x}");
        }
        Ok(InjectionOutcome::TimedOut) => {
            warn!("remote loader did not signal within the wait window; it may still finish");
            std::process::exit(1);
        }
        Err(err) => {
            error!("{err}");
            for cause in err.chain().skip(1) {
                error!("  caused by: {cause}");
            }
            if err
                .downcast_ref::<errors::InjectError>()
                .is_some_and(errors::InjectError::is_access_denied)
            {
                error!("run the injector from an elevated prompt");
            }
            std::process::exit(1);
        }
    }
}

#[cfg(windows)]
fn run() -> anyhow::Result<inject::InjectionOutcome> {
    use std::path::PathBuf;

    use anyhow::Context;
    use log::info;

    use crate::args::{parse_args, DEFAULT_PAYLOAD};

    let cli = parse_args();
    let dll_path = cli.dll.unwrap_or_else(|| PathBuf::from(DEFAULT_PAYLOAD));

    info!("target process: {TARGET_PROCESS}");
    info!("payload:        {}", dll_path.display());
    info!(
        "injector arch:  {}",
        if cfg!(target_pointer_width = "64") { "64-bit" } else { "32-bit" }
    );
    info!("hotkey:         {OVERLAY_HOTKEY} toggles the overlay in-game");

    let payload = inject::prepare_payload(&dll_path).context(
        "payload validation failed (build it first: cargo build --release --target i686-pc-windows-msvc)",
    )?;

    info!("searching for {TARGET_PROCESS}");
    let pid = processes::find_process_by_name(TARGET_PROCESS)
        .ok_or_else(|| errors::InjectError::ProcessNotFound(TARGET_PROCESS.into()))?;
    info!("found {TARGET_PROCESS} (pid {pid})");

    let mut target = process::TargetProcess::open(pid)?;
    Ok(inject::inject_payload(&mut target, &payload)?)
}

#[cfg(windows)]
fn init_logging() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().filter_or("RUST_LOG", "info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{:<5}] {}", record.level(), record.args())
        })
        .init();
}

#[cfg(not(windows))]
fn main() {
    eprintln!("goldsrc-injector loads the overlay into {TARGET_PROCESS} via Win32 and only runs on Windows");
    std::process::exit(1);
}
