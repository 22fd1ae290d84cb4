use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::thread;

use anyhow::Context;

use crate::jobs::JobTable;
use crate::redirect::retry;

/// Write end of the reaper's wake-up pipe, or -1 before it exists.
static CHILD_WAKE: AtomicI32 = AtomicI32::new(-1);

static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);
static SUSPENDS: AtomicUsize = AtomicUsize::new(0);
static QUITS: AtomicUsize = AtomicUsize::new(0);

/// Register the interpreter's signal handlers.
///
/// SIGINT, SIGTSTP and SIGQUIT are only counted and logged: they never stop
/// the interpreter, and children get default dispositions back on exec.
/// SIGCHLD wakes a reaper thread that polls `jobs`, so finished background
/// children are collected even while the interpreter sits at the prompt.
pub fn install(jobs: &JobTable) -> anyhow::Result<()> {
    spawn_reaper(jobs.clone()).context("unable to start child reaper")?;

    ctrlc::set_handler(|| {
        INTERRUPTS.fetch_add(1, Ordering::Relaxed);
        println!();
        let _ = io::stdout().flush();
    })
    .context("unable to register SIGINT handler")?;

    install_handler(libc::SIGTSTP, on_suspend, 0).context("unable to register SIGTSTP handler")?;
    install_handler(libc::SIGQUIT, on_quit, 0).context("unable to register SIGQUIT handler")?;
    install_handler(libc::SIGCHLD, on_child, libc::SA_NOCLDSTOP)
        .context("unable to register SIGCHLD handler")?;

    Ok(())
}

/// Start the thread that reaps background jobs whenever SIGCHLD arrives.
///
/// The handler only writes a byte into a non-blocking pipe; wake-ups that find
/// the pipe full are dropped, since one pending byte already guarantees a
/// full poll of the table.
fn spawn_reaper(jobs: JobTable) -> io::Result<()> {
    let (mut wake, notify) = os_pipe::pipe()?;
    retry(|| unsafe { libc::fcntl(notify.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) })?;

    thread::Builder::new().name("reaper".into()).spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            match wake.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => jobs.collect(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("reaper stopped: {e}");
                    break;
                }
            }
        }
    })?;

    // The write end lives as long as the process.
    CHILD_WAKE.store(notify.into_raw_fd(), Ordering::Release);
    Ok(())
}

/// Log signals that arrived since the last call.
pub fn log_advisory() {
    for (counter, key) in [(&INTERRUPTS, "CTRL-C"), (&SUSPENDS, "CTRL-Z"), (&QUITS, "CTRL-\\")] {
        let count = counter.swap(0, Ordering::Relaxed);
        if count > 0 {
            tracing::debug!("{key} pressed ({count}x)");
        }
    }
}

extern "C" fn on_child(_signal: libc::c_int) {
    let fd = CHILD_WAKE.load(Ordering::Acquire);
    if fd >= 0 {
        // SAFETY: write(2) is async-signal-safe; a full pipe just fails with EAGAIN.
        unsafe { libc::write(fd, [1u8].as_ptr().cast(), 1) };
    }
}

extern "C" fn on_suspend(_signal: libc::c_int) {
    SUSPENDS.fetch_add(1, Ordering::Relaxed);
}

extern "C" fn on_quit(_signal: libc::c_int) {
    QUITS.fetch_add(1, Ordering::Relaxed);
}

fn install_handler(
    signal: libc::c_int,
    handler: extern "C" fn(libc::c_int),
    extra_flags: libc::c_int,
) -> io::Result<()> {
    // SAFETY: a zeroed sigaction is a valid "no flags, empty mask" value, and
    // the handlers above only touch atomics and write(2).
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART | extra_flags;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
