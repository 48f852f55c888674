use std::path::PathBuf;

use clap::Parser;

/// Payload produced by `cargo build --release --target i686-pc-windows-msvc`.
pub const DEFAULT_PAYLOAD: &str = r"target\i686-pc-windows-msvc\release\goldsrc_diag_overlay.dll";

#[derive(Parser, Debug)]
#[command(
    name = "goldsrc-injector",
    about = "Loads the GoldSrc diagnostic overlay into a running hl.exe",
    after_help = "EXAMPLES:\n  goldsrc-injector.exe\n  goldsrc-injector.exe C:\\mods\\custom_overlay.dll"
)]
pub struct Args {
    /// Path to the overlay DLL (defaults to the workspace release build)
    #[arg(value_name = "DLL")]
    pub dll: Option<PathBuf>,
}

pub fn parse_args() -> Args {
    Args::parse()
}
