use sysinfo::{ProcessesToUpdate, System};

/// PID of the first running process whose name matches, case-insensitively.
pub fn find_process_by_name(name: &str) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .processes()
        .iter()
        .find(|(_, process)| process.name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|(pid, _)| pid.as_u32())
}

#[cfg(test)]
mod tests {
    use super::find_process_by_name;

    #[test]
    fn absent_process_is_none() {
        assert_eq!(find_process_by_name("goldsrc-injector-no-such-process.exe"), None);
    }
}
