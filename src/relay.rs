use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Carries a builtin's pipe output to the next stage through an unbounded
/// in-memory queue.
///
/// Builtins run inside the interpreter before the stage reading their pipe
/// has been started. Writing straight into that pipe would block forever once
/// its buffer filled, and so would a foreground command replayed by
/// `history`. The relay gives them a pipe that is always drained; a second
/// thread forwards what was read to the real downstream pipe.
pub struct Relay {
    drain: JoinHandle<()>,
    forward: JoinHandle<()>,
}

impl Relay {
    /// Start relaying into `downstream`. Returns the write end the builtin
    /// should use as its stdout.
    pub fn start(downstream: OwnedFd) -> io::Result<(OwnedFd, Relay)> {
        let (mut input, writer) = os_pipe::pipe()?;
        let (sender, receiver) = mpsc::channel::<Vec<u8>>();

        let drain = thread::Builder::new().name("relay-drain".into()).spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match input.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        // the forwarder stopped, so nobody reads any more
                        if sender.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!("relay read failed: {e}");
                        break;
                    }
                }
            }
        })?;

        let mut output = File::from(downstream);
        let forward = thread::Builder::new().name("relay-forward".into()).spawn(move || {
            for chunk in receiver {
                if let Err(e) = output.write_all(&chunk) {
                    tracing::debug!("relay reader went away: {e}");
                    break;
                }
            }
        })?;

        Ok((writer.into(), Relay { drain, forward }))
    }

    /// Wait until everything written has been passed on and the downstream
    /// pipe is closed. Returns once every holder of the write end has closed
    /// it.
    pub fn finish(self) {
        for handle in [self.drain, self.forward] {
            if handle.join().is_err() {
                tracing::warn!("relay thread panicked");
            }
        }
    }
}
