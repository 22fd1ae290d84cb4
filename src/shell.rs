use crate::executor;
use crate::history::History;
use crate::jobs::JobTable;
use crate::parser;

pub const DEFAULT_PROMPT: &str = "%";

/// What the interpreter should do after a command finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading input; carries the exit status.
    Continue(i32),
    /// Terminate the interpreter with this status.
    Exit(i32),
}

/// Interpreter state shared by the parser loop, the executor and builtins.
pub struct Shell {
    pub prompt: String,
    pub history: History,
    pub jobs: JobTable,
    /// History entries currently being replayed, innermost last.
    replaying: Vec<usize>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            history: History::new(),
            jobs: JobTable::new(),
            replaying: Vec::new(),
        }
    }

    /// Handle one line typed by the user or read from a script: parse and
    /// run it, then record it in history.
    pub fn execute_input(&mut self, line: &str) -> Flow {
        let flow = self.run_line(line);
        self.history.push(line);
        tracing::trace!(entry = self.history.len(), "recorded in history");
        flow
    }

    /// Parse and run a line without recording it.
    ///
    /// Errors are reported here and never escape the line: a bad line leaves
    /// the interpreter ready for the next one.
    pub fn run_line(&mut self, line: &str) -> Flow {
        let mut chain = match parser::parse_line(line) {
            Ok(chain) => chain,
            Err(e) => {
                eprintln!("chainsh: {e}");
                return Flow::Continue(1);
            }
        };

        if chain.is_empty() {
            return Flow::Continue(0);
        }
        tracing::debug!(links = chain.len(), "parsed chain:\n{chain}");

        let flow = match executor::execute_chain(self, &mut chain) {
            Ok(flow) => flow,
            Err(e) => {
                eprintln!("chainsh: {e}");
                Flow::Continue(1)
            }
        };
        tracing::debug!(?flow, "line finished");
        flow
    }

    /// Re-run history entry `index`. Replaying an entry that is already being
    /// replayed further up the stack is refused.
    pub fn replay(&mut self, index: usize, line: &str) -> Flow {
        if self.replaying.contains(&index) {
            eprintln!("history: recursive replay of entry {index}");
            return Flow::Continue(1);
        }

        self.replaying.push(index);
        let flow = self.run_line(line);
        self.replaying.pop();
        flow
    }
}
