use std::io::{self, Write};

use crate::command::{Handler, SimpleCommand};
use crate::error::ExecError;
use crate::history::History;
use crate::redirect::StdioGuard;
use crate::shell::{Flow, Shell};

/// Commands implemented inside the interpreter process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cd,
    Pwd,
    Exit,
    History,
    Prompt,
}

/// Name → builtin lookup table. Matching is exact and case-sensitive.
const REGISTRY: &[(&str, Builtin)] = &[
    ("cd", Builtin::Cd),
    ("pwd", Builtin::Pwd),
    ("exit", Builtin::Exit),
    ("history", Builtin::History),
    ("prompt", Builtin::Prompt),
];

/// Resolve a command name to its handler; unknown names run as external
/// programs.
pub fn resolve(name: &str) -> Handler {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map_or(Handler::External, |(_, builtin)| Handler::Builtin(*builtin))
}

impl Builtin {
    /// Whether the builtin touches the standard streams. The others run
    /// without rebinding the interpreter's descriptors.
    fn uses_stdio(self) -> bool {
        matches!(self, Builtin::Pwd | Builtin::History)
    }
}

/// Run a builtin in the interpreter's own process.
pub fn run(builtin: Builtin, simple: &mut SimpleCommand, shell: &mut Shell) -> Result<Flow, ExecError> {
    let _guard = if builtin.uses_stdio() {
        let guard = StdioGuard::redirect(simple).map_err(|source| ExecError::Redirect {
            name: simple.name().unwrap_or_default().to_string(),
            source,
        })?;
        Some(guard)
    } else {
        None
    };

    let args = simple.args.get(1..).unwrap_or_default();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    Ok(match builtin {
        Builtin::Cd => Flow::Continue(builtin_cd(args, &mut stderr)),
        Builtin::Pwd => Flow::Continue(builtin_pwd(args, &mut stdout, &mut stderr)),
        Builtin::Exit => builtin_exit(args, &mut stderr),
        Builtin::History => builtin_history(args, shell, &mut stdout, &mut stderr),
        Builtin::Prompt => Flow::Continue(builtin_prompt(args, shell, &mut stderr)),
    })
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args {
        [] => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME not set");
                return 1;
            }
        },
        [dir] => dir.clone(),
        _ => {
            let _ = writeln!(stderr, "cd: too many arguments");
            return 1;
        }
    };

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

fn builtin_pwd(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    if !args.is_empty() {
        let _ = writeln!(stderr, "pwd: too many arguments");
        return 1;
    }

    match std::env::current_dir() {
        Ok(path) => {
            let _ = writeln!(stdout, "{}", path.display());
            0
        }
        Err(e) => {
            let _ = writeln!(stderr, "pwd: {e}");
            1
        }
    }
}

fn builtin_exit(args: &[String], stderr: &mut dyn Write) -> Flow {
    match args {
        [] => Flow::Exit(0),
        [code] => match parse_exit_code(code) {
            Some(code) => Flow::Exit(code),
            None => {
                let _ = writeln!(stderr, "exit: {code}: numeric argument required");
                Flow::Continue(1)
            }
        },
        _ => {
            let _ = writeln!(stderr, "exit: too many arguments");
            Flow::Continue(1)
        }
    }
}

/// Digits only; no sign, no whitespace.
fn parse_exit_code(arg: &str) -> Option<i32> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}

fn builtin_history(
    args: &[String],
    shell: &mut Shell,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Flow {
    let target = match args {
        [] => {
            list_history(&shell.history, stdout);
            return Flow::Continue(0);
        }
        [target] => target,
        _ => {
            let _ = writeln!(stderr, "history: too many arguments");
            return Flow::Continue(1);
        }
    };

    let entry = if target.bytes().all(|b| b.is_ascii_digit()) {
        let found = target
            .parse::<usize>()
            .ok()
            .and_then(|index| shell.history.get(index).map(|line| (index, line.to_string())));
        if found.is_none() {
            let _ = writeln!(stderr, "history: {target}: invalid index");
        }
        found
    } else {
        let found = shell
            .history
            .find_last_with_prefix(target)
            .map(|(index, line)| (index, line.to_string()));
        if found.is_none() {
            let _ = writeln!(stderr, "history: {target}: no matching command found");
        }
        found
    };

    match entry {
        Some((index, line)) => shell.replay(index, &line),
        None => Flow::Continue(1),
    }
}

/// Print every entry, oldest first, as `<index> <line>`.
pub fn list_history(history: &History, out: &mut dyn Write) {
    for (index, line) in history.iter() {
        let _ = writeln!(out, "{index} {line}");
    }
}

fn builtin_prompt(args: &[String], shell: &mut Shell, stderr: &mut dyn Write) -> i32 {
    match args {
        [text] => {
            shell.prompt = text.clone();
            0
        }
        [] => {
            let _ = writeln!(stderr, "prompt: too few arguments");
            1
        }
        _ => {
            let _ = writeln!(stderr, "prompt: too many arguments");
            1
        }
    }
}
