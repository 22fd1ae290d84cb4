use std::io;

use crate::command::StreamKind;

/// Why a line could not be turned into a command chain.
///
/// Parsing aborts on the first error; everything built so far is dropped,
/// which closes any descriptors the parser had opened.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(String),

    #[error("syntax error: missing command before `{0}'")]
    MissingCommand(String),

    #[error("syntax error: expected command after `|'")]
    TrailingPipe,

    #[error("syntax error: expected filename after `{0}'")]
    MissingFilename(String),

    #[error("{0} redirected more than once")]
    DuplicateRedirect(StreamKind),

    #[error("{path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("pipe: {0}")]
    Pipe(#[source] io::Error),
}

/// Failures the execution engine cannot report as a plain exit status.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("empty command name")]
    EmptyCommand,

    #[error("{name}: failed to redirect standard streams: {source}")]
    Redirect {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{name}: wait failed: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },
}
