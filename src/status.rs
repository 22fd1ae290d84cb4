use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Shell exit code for a finished child: its own status, or `128 + signal`
/// when it was killed by a signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

/// Whether the child was killed by SIGPIPE, i.e. its reader went away first.
pub fn lost_reader(status: ExitStatus) -> bool {
    status.signal() == Some(libc::SIGPIPE)
}

/// Status reported when an external command cannot be started.
pub fn launch_failure_code(error: &std::io::Error) -> i32 {
    if error.kind() == std::io::ErrorKind::NotFound {
        127
    } else {
        126
    }
}
