use std::process::{self, Child};

use crate::builtins;
use crate::command::{Command, CommandChain, Handler, SimpleCommand, Stream};
use crate::error::ExecError;
use crate::relay::Relay;
use crate::shell::{Flow, Shell};
use crate::status;

/// Work feeding a pipe that is awaited only after the whole pipeline has
/// been started, so its reader exists before anything blocks on it.
enum Deferred {
    /// An external pipe writer launched without waiting.
    Writer { name: String, child: Child },
    /// The output relay of a builtin writing into a pipe.
    Relay(Relay),
}

/// Run every pipeline of the chain in order.
///
/// `;` and `&` both move straight on to the next pipeline once the current
/// one has been launched; `&` only means its processes are not waited for.
/// Returns the status of the last pipeline, or `Flow::Exit` as soon as an
/// `exit` builtin runs.
pub fn execute_chain(shell: &mut Shell, chain: &mut CommandChain) -> Result<Flow, ExecError> {
    let mut status = 0;

    for command in chain.commands.iter_mut() {
        match execute_command(shell, command)? {
            Flow::Continue(code) => status = code,
            exit @ Flow::Exit(_) => return Ok(exit),
        }
    }

    Ok(Flow::Continue(status))
}

/// Run one pipeline left to right.
///
/// Each stage's descriptors are closed in the interpreter as soon as the stage
/// has been started (external) or has finished (builtin). A non-zero status
/// stops the pipeline; stages that never ran have their descriptors closed
/// before the already-running writers are awaited. If every waited stage
/// succeeded, the first pipe writer that failed decides the status.
fn execute_command(shell: &mut Shell, command: &mut Command) -> Result<Flow, ExecError> {
    let background = command.background;
    let mut deferred = Vec::new();
    let mut stages = command.simple_commands.iter_mut();

    let result = loop {
        let Some(simple) = stages.next() else {
            break Ok(Flow::Continue(0));
        };

        if background {
            simple.no_wait = true;
        }
        if simple.name().is_none() {
            break Err(ExecError::EmptyCommand);
        }

        let outcome = match simple.handler {
            Handler::Builtin(builtin) => relay_pipe_output(simple, &mut deferred)
                .and_then(|()| builtins::run(builtin, simple, shell)),
            Handler::External => launch(shell, simple, &mut deferred),
        };
        simple.release_streams();

        match outcome {
            Ok(Flow::Continue(0)) if stages.len() > 0 => {}
            Ok(flow @ Flow::Continue(0)) => break Ok(flow),
            Ok(Flow::Continue(code)) => {
                tracing::debug!("{} exited with {code}; stopping pipeline", simple.args[0]);
                break Ok(Flow::Continue(code));
            }
            other => break other,
        }
    };

    for skipped in stages {
        skipped.release_streams();
    }
    let writer_status = await_deferred(deferred);

    match result {
        Ok(Flow::Continue(0)) if writer_status != 0 => Ok(Flow::Continue(writer_status)),
        other => other,
    }
}

/// Point a builtin that writes into a pipe at a relay instead, so neither it
/// nor anything it replays blocks before the reading stage starts.
fn relay_pipe_output(simple: &mut SimpleCommand, deferred: &mut Vec<Deferred>) -> Result<(), ExecError> {
    if !simple.stdout.is_pipe() {
        return Ok(());
    }
    let Stream::Pipe(downstream) = simple.stdout.take() else {
        return Ok(());
    };

    let (input, relay) = Relay::start(downstream).map_err(|source| ExecError::Redirect {
        name: simple.args[0].clone(),
        source,
    })?;
    simple.stdout = Stream::Pipe(input);
    deferred.push(Deferred::Relay(relay));
    Ok(())
}

/// Start an external program with the simple command's stream bindings.
fn launch(
    shell: &mut Shell,
    simple: &mut SimpleCommand,
    deferred: &mut Vec<Deferred>,
) -> Result<Flow, ExecError> {
    let name = simple.args[0].clone();
    let feeds_pipe = simple.stdout.is_pipe();

    let mut process = process::Command::new(&name);
    process
        .args(&simple.args[1..])
        .stdin(simple.stdin.take().into_stdio())
        .stdout(simple.stdout.take().into_stdio())
        .stderr(simple.stderr.take().into_stdio());
    let spawned = process.spawn();
    // Dropping the builder closes the interpreter's copies of the child's
    // descriptors, so readers see EOF once the child exits.
    drop(process);

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            eprintln!("chainsh: {name}: {e}");
            return Ok(Flow::Continue(status::launch_failure_code(&e)));
        }
    };

    let pid = child.id();
    simple.pid = Some(pid);
    tracing::debug!(name = %name, pid, no_wait = simple.no_wait, "launched");

    if simple.no_wait {
        let (id, pid) = shell.jobs.add(child, simple.args.join(" "));
        tracing::debug!("[{id}] {pid}");
        return Ok(Flow::Continue(0));
    }

    if feeds_pipe {
        deferred.push(Deferred::Writer { name, child });
        return Ok(Flow::Continue(0));
    }

    let exit = child
        .wait()
        .map_err(|source| ExecError::Wait { name: name.clone(), source })?;
    let code = status::exit_code(exit);
    tracing::debug!(name = %name, pid, code, "finished");
    Ok(Flow::Continue(code))
}

/// Wait for everything deferred. Returns the status of the first writer that
/// failed, or 0. A writer killed by SIGPIPE only lost its reader and does not
/// count as a failure.
fn await_deferred(deferred: Vec<Deferred>) -> i32 {
    let mut failed = 0;

    for entry in deferred {
        match entry {
            Deferred::Writer { name, mut child } => match child.wait() {
                Ok(exit) => {
                    let code = status::exit_code(exit);
                    tracing::debug!(name = %name, code, "pipe writer finished");
                    if failed == 0 && code != 0 && !status::lost_reader(exit) {
                        failed = code;
                    }
                }
                Err(e) => tracing::warn!("{name}: wait failed: {e}"),
            },
            Deferred::Relay(relay) => relay.finish(),
        }
    }

    failed
}
