use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Stdio;

use crate::builtins::Builtin;

/// One of the three standard streams of a simple command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    /// The process-level descriptor number this stream replaces.
    pub fn standard_fd(self) -> RawFd {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamKind::Stdin => "standard input",
            StreamKind::Stdout => "standard output",
            StreamKind::Stderr => "standard error",
        })
    }
}

/// What a stream of a simple command is bound to.
///
/// Descriptors are owned: dropping a `Stream` closes whatever the parser
/// opened for it. Inherited standard streams are never closed.
#[derive(Debug, Default)]
pub enum Stream {
    #[default]
    Inherit,
    /// One end of an OS pipe connecting two simple commands.
    Pipe(OwnedFd),
    /// A file opened by a redirection operator.
    File(OwnedFd),
}

impl Stream {
    pub fn is_redirected(&self) -> bool {
        !matches!(self, Stream::Inherit)
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, Stream::Pipe(_))
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Stream::Inherit => None,
            Stream::Pipe(fd) | Stream::File(fd) => Some(fd.as_raw_fd()),
        }
    }

    /// Move the binding out, leaving the stream inherited.
    pub fn take(&mut self) -> Stream {
        std::mem::take(self)
    }

    /// Hand the descriptor to a child process. The parent's copy is closed
    /// once the `Stdio` (and the `process::Command` holding it) is dropped.
    pub fn into_stdio(self) -> Stdio {
        match self {
            Stream::Inherit => Stdio::inherit(),
            Stream::Pipe(fd) | Stream::File(fd) => Stdio::from(fd),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Inherit => f.write_str("inherit"),
            Stream::Pipe(fd) => write!(f, "pipe fd {}", fd.as_raw_fd()),
            Stream::File(fd) => write!(f, "file fd {}", fd.as_raw_fd()),
        }
    }
}

/// How a simple command runs, resolved once at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handler {
    Builtin(Builtin),
    #[default]
    External,
}

/// One program or builtin invocation with its argument vector and three
/// stream bindings. `args[0]` is the command name.
#[derive(Debug, Default)]
pub struct SimpleCommand {
    pub args: Vec<String>,
    pub stdin: Stream,
    pub stdout: Stream,
    pub stderr: Stream,
    /// Child pid once spawned; builtins never set it.
    pub pid: Option<u32>,
    /// Set by the executor when the owning pipeline is backgrounded.
    pub no_wait: bool,
    pub handler: Handler,
}

impl SimpleCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn push_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    pub fn stream(&self, kind: StreamKind) -> &Stream {
        match kind {
            StreamKind::Stdin => &self.stdin,
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    pub fn stream_mut(&mut self, kind: StreamKind) -> &mut Stream {
        match kind {
            StreamKind::Stdin => &mut self.stdin,
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    /// Close every descriptor this command still holds.
    pub fn release_streams(&mut self) {
        self.stdin = Stream::Inherit;
        self.stdout = Stream::Inherit;
        self.stderr = Stream::Inherit;
    }
}

/// The separator that ended a pipeline in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOperator {
    /// `;`: run the next pipeline after this one.
    Sequence,
    /// `&`: do not wait for this pipeline's processes.
    Background,
}

impl ChainOperator {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            ";" => Some(ChainOperator::Sequence),
            "&" => Some(ChainOperator::Background),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainOperator::Sequence => ";",
            ChainOperator::Background => "&",
        }
    }
}

/// A pipeline: simple commands connected by pipes, executed as a unit.
#[derive(Debug, Default)]
pub struct Command {
    pub simple_commands: Vec<SimpleCommand>,
    pub background: bool,
    /// `None` for the last pipeline on the line.
    pub chaining_operator: Option<ChainOperator>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, simple: SimpleCommand) {
        self.simple_commands.push(simple);
    }

    pub fn is_empty(&self) -> bool {
        self.simple_commands.is_empty()
    }

    pub fn set_chaining_operator(&mut self, operator: Option<ChainOperator>) {
        self.chaining_operator = operator;
        self.background = operator == Some(ChainOperator::Background);
    }
}

/// Every pipeline parsed from one input line, in order.
#[derive(Debug, Default)]
pub struct CommandChain {
    pub commands: Vec<Command>,
}

impl CommandChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pipeline. Empty pipelines are never part of a chain.
    pub fn push(&mut self, command: Command) {
        debug_assert!(!command.is_empty(), "empty pipeline pushed onto chain");
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Display for CommandChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, command) in self.commands.iter().enumerate() {
            let operator = command.chaining_operator.map_or("", ChainOperator::as_str);
            writeln!(f, "[link {}] {operator}", index + 1)?;
            for simple in &command.simple_commands {
                writeln!(f, "-- name: {}", simple.name().unwrap_or(""))?;
                writeln!(f, "-- args: {:?}", simple.args)?;
                writeln!(
                    f,
                    "-- stdin: {} / stdout: {} / stderr: {}",
                    simple.stdin, simple.stdout, simple.stderr
                )?;
            }
        }
        Ok(())
    }
}
