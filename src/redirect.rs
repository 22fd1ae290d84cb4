use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use crate::command::{SimpleCommand, StreamKind};

/// A file redirection operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `>`: write, truncating.
    Truncate,
    /// `>>`: write, appending.
    Append,
    /// `<`: read.
    Read,
    /// `2>`: write standard error, truncating.
    Stderr,
}

impl RedirectOp {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            ">" => Some(RedirectOp::Truncate),
            ">>" => Some(RedirectOp::Append),
            "<" => Some(RedirectOp::Read),
            "2>" => Some(RedirectOp::Stderr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RedirectOp::Truncate => ">",
            RedirectOp::Append => ">>",
            RedirectOp::Read => "<",
            RedirectOp::Stderr => "2>",
        }
    }

    /// The stream of the simple command this operator binds.
    pub fn stream(self) -> StreamKind {
        match self {
            RedirectOp::Truncate | RedirectOp::Append => StreamKind::Stdout,
            RedirectOp::Read => StreamKind::Stdin,
            RedirectOp::Stderr => StreamKind::Stderr,
        }
    }

    /// Output operators need a command name before them; `<` and `2>` do not.
    pub fn requires_command(self) -> bool {
        matches!(self, RedirectOp::Truncate | RedirectOp::Append)
    }

    /// Open the redirection target. Created files get mode `0644`.
    pub fn open(self, path: &str) -> io::Result<OwnedFd> {
        let mut options = OpenOptions::new();
        match self {
            RedirectOp::Truncate | RedirectOp::Stderr => {
                options.write(true).create(true).truncate(true).mode(0o644);
            }
            RedirectOp::Append => {
                options.append(true).create(true).mode(0o644);
            }
            RedirectOp::Read => {
                options.read(true);
            }
        }
        Ok(options.open(path)?.into())
    }
}

/// Temporarily rebinds the interpreter's own standard streams to a simple
/// command's descriptors, for builtins that run in-process.
///
/// The originals are saved as close-on-exec duplicates and restored with
/// `dup2` on drop. The command's descriptors are closed once they have been
/// duplicated into place.
pub struct StdioGuard {
    saved: Vec<(RawFd, OwnedFd)>,
}

impl StdioGuard {
    pub fn redirect(simple: &mut SimpleCommand) -> io::Result<Self> {
        flush_std();
        let mut guard = Self { saved: Vec::new() };

        for kind in [StreamKind::Stdin, StreamKind::Stdout, StreamKind::Stderr] {
            let stream = simple.stream_mut(kind).take();
            let Some(fd) = stream.raw_fd() else {
                continue;
            };

            let target = kind.standard_fd();
            // Close-on-exec, so children started while the guard is live do
            // not inherit the interpreter's original stream.
            let saved = retry(|| unsafe { libc::fcntl(target, libc::F_DUPFD_CLOEXEC, 3) })?;
            // SAFETY: fcntl returned a fresh descriptor that nothing else owns.
            let saved = unsafe { OwnedFd::from_raw_fd(saved) };
            retry(|| unsafe { libc::dup2(fd, target) })?;
            guard.saved.push((target, saved));
        }

        Ok(guard)
    }
}

impl Drop for StdioGuard {
    fn drop(&mut self) {
        flush_std();
        for (target, saved) in self.saved.drain(..).rev() {
            if let Err(error) = retry(|| unsafe { libc::dup2(saved.as_raw_fd(), target) }) {
                tracing::warn!("failed to restore fd {target}: {error}");
            }
        }
    }
}

fn flush_std() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Run a libc call until it stops failing with `EINTR`.
pub fn retry(mut call: impl FnMut() -> libc::c_int) -> io::Result<libc::c_int> {
    loop {
        let rc = call();
        if rc >= 0 {
            return Ok(rc);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}
