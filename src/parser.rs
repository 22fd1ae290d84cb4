use crate::builtins;
use crate::command::{ChainOperator, Command, CommandChain, SimpleCommand, Stream, StreamKind};
use crate::error::ParseError;
use crate::expander::{expand_token, remove_quotes};
use crate::redirect::RedirectOp;
use crate::tokenizer::{is_ignorable, tokenize};

/// Tokens are separated by single spaces; operators must stand alone.
pub const DELIMITER: char = ' ';

/// Tokenize and parse one input line.
pub fn parse_line(line: &str) -> Result<CommandChain, ParseError> {
    let tokens = tokenize(line, DELIMITER);
    tracing::trace!("tokens: {tokens:?}");
    parse(&tokens)
}

/// Build a command chain from a token sequence.
///
/// Redirections open their files and pipes are created while parsing, so a
/// successful result owns live descriptors. On error everything built so far
/// is dropped, closing them again.
pub fn parse(tokens: &[String]) -> Result<CommandChain, ParseError> {
    let mut chain = CommandChain::new();
    let mut cursor = 0;

    loop {
        while tokens.get(cursor).is_some_and(|token| is_ignorable(token)) {
            cursor += 1;
        }
        if cursor >= tokens.len() {
            break;
        }

        let (command, next) = parse_pipeline(tokens, cursor)?;
        chain.push(command);
        cursor = next;
    }

    Ok(chain)
}

/// Parse one pipeline starting at `cursor`, up to and including its chaining
/// operator. Returns the pipeline and the index of the first unread token.
fn parse_pipeline(tokens: &[String], mut cursor: usize) -> Result<(Command, usize), ParseError> {
    let mut command = Command::new();
    let mut simple = SimpleCommand::new();
    let mut operator = None;

    while let Some(token) = tokens.get(cursor) {
        if let Some(op) = ChainOperator::from_token(token) {
            operator = Some(op);
            break;
        }

        if token == "|" {
            if simple.name().is_none() {
                return Err(ParseError::MissingCommand(token.clone()));
            }
            if simple.stdout.is_redirected() {
                return Err(ParseError::DuplicateRedirect(StreamKind::Stdout));
            }

            let (reader, writer) = os_pipe::pipe().map_err(ParseError::Pipe)?;
            simple.stdout = Stream::Pipe(writer.into());
            finish(&mut command, simple);

            simple = SimpleCommand::new();
            simple.stdin = Stream::Pipe(reader.into());
        } else if let Some(op) = RedirectOp::from_token(token) {
            cursor = bind_redirect(&mut simple, op, tokens, cursor)?;
        } else if is_ignorable(token) {
            // skip
        } else if let Some(suffix) = history_reference(&simple, token) {
            // Lookup happens when the history builtin runs, not here.
            simple.push_arg("history");
            simple.push_arg(suffix);
        } else {
            for arg in expand_token(token) {
                simple.push_arg(arg);
            }
        }

        cursor += 1;
    }

    if simple.name().is_none() {
        if simple.stdin.is_pipe() {
            return Err(ParseError::TrailingPipe);
        }
        let near = operator.map_or("newline", ChainOperator::as_str);
        return Err(ParseError::UnexpectedToken(near.to_string()));
    }
    finish(&mut command, simple);

    command.set_chaining_operator(operator);
    if operator.is_some() {
        cursor += 1;
    }

    Ok((command, cursor))
}

/// Bind the handler and append the simple command to its pipeline.
fn finish(command: &mut Command, mut simple: SimpleCommand) {
    if let Some(name) = simple.name() {
        simple.handler = builtins::resolve(name);
    }
    command.push(simple);
}

/// `!suffix` as the first word of a simple command.
fn history_reference<'a>(simple: &SimpleCommand, token: &'a str) -> Option<&'a str> {
    if simple.name().is_some() {
        return None;
    }
    token.strip_prefix('!').filter(|suffix| !suffix.is_empty())
}

/// Open the target of a redirection and bind it to the current simple
/// command. Returns the index of the filename token.
fn bind_redirect(
    simple: &mut SimpleCommand,
    op: RedirectOp,
    tokens: &[String],
    cursor: usize,
) -> Result<usize, ParseError> {
    if op.requires_command() && simple.name().is_none() {
        return Err(ParseError::MissingCommand(op.as_str().to_string()));
    }

    let kind = op.stream();
    if simple.stream(kind).is_redirected() {
        return Err(ParseError::DuplicateRedirect(kind));
    }

    let mut next = cursor + 1;
    while tokens.get(next).is_some_and(|token| is_ignorable(token)) {
        next += 1;
    }

    let path = match tokens.get(next) {
        Some(token) if !is_operator(token) => remove_quotes(token),
        _ => return Err(ParseError::MissingFilename(op.as_str().to_string())),
    };

    let fd = op.open(path).map_err(|source| ParseError::Open {
        path: path.to_string(),
        source,
    })?;
    *simple.stream_mut(kind) = Stream::File(fd);

    Ok(next)
}

fn is_operator(token: &str) -> bool {
    token == "|" || ChainOperator::from_token(token).is_some() || RedirectOp::from_token(token).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtin;
    use crate::command::Handler;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::RawFd;

    /// (device, inode) of an open descriptor, or `None` if it is closed.
    fn fd_identity(fd: RawFd) -> Option<(u64, u64)> {
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } == 0 {
            Some((stat.st_dev as u64, stat.st_ino as u64))
        } else {
            None
        }
    }

    fn names(chain: &CommandChain) -> Vec<Vec<&str>> {
        chain
            .commands
            .iter()
            .map(|command| {
                command
                    .simple_commands
                    .iter()
                    .map(|simple| simple.name().unwrap())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn single_command_with_args() {
        let chain = parse_line("ls -l /tmp").unwrap();
        assert_eq!(chain.len(), 1);
        let simple = &chain.commands[0].simple_commands[0];
        assert_eq!(simple.args, vec!["ls", "-l", "/tmp"]);
        assert_eq!(simple.handler, Handler::External);
        assert!(!simple.stdin.is_redirected());
        assert!(!simple.stdout.is_redirected());
        assert_eq!(chain.commands[0].chaining_operator, None);
    }

    #[test]
    fn extra_spaces_are_ignored() {
        let chain = parse_line("  echo   hi  ").unwrap();
        assert_eq!(chain.commands[0].simple_commands[0].args, vec!["echo", "hi"]);
    }

    #[test]
    fn blank_line_is_empty_chain() {
        assert!(parse_line("").unwrap().is_empty());
        assert!(parse_line("   ").unwrap().is_empty());
    }

    #[test]
    fn quoted_argument_keeps_spaces() {
        let chain = parse_line("echo 'a b'").unwrap();
        assert_eq!(chain.commands[0].simple_commands[0].args, vec!["echo", "a b"]);
    }

    #[test]
    fn pipe_connects_both_ends_of_one_pipe() {
        let mut chain = parse_line("ls -l | wc -l").unwrap();
        assert_eq!(chain.len(), 1);
        let command = &mut chain.commands[0];
        assert_eq!(command.simple_commands.len(), 2);
        assert!(command.simple_commands[0].stdout.is_pipe());
        assert!(command.simple_commands[1].stdin.is_pipe());

        let Stream::Pipe(write_end) = command.simple_commands[0].stdout.take() else {
            panic!("expected pipe");
        };
        let Stream::Pipe(read_end) = command.simple_commands[1].stdin.take() else {
            panic!("expected pipe");
        };

        let mut writer = File::from(write_end);
        writer.write_all(b"through the pipe").unwrap();
        drop(writer);

        let mut received = String::new();
        File::from(read_end).read_to_string(&mut received).unwrap();
        assert_eq!(received, "through the pipe");
    }

    #[test]
    fn three_stage_pipeline() {
        let chain = parse_line("cat f | sort | uniq -c").unwrap();
        assert_eq!(names(&chain), vec![vec!["cat", "sort", "uniq"]]);
        let middle = &chain.commands[0].simple_commands[1];
        assert!(middle.stdin.is_pipe());
        assert!(middle.stdout.is_pipe());
    }

    #[test]
    fn output_redirect_truncates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, "stale").unwrap();

        let chain = parse_line(&format!("echo hi > {}", path.display())).unwrap();
        let simple = &chain.commands[0].simple_commands[0];
        assert_eq!(simple.args, vec!["echo", "hi"]);
        assert!(matches!(simple.stdout, Stream::File(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn append_redirect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let chain = parse_line(&format!("echo hi >> {}", path.display())).unwrap();
        assert!(matches!(chain.commands[0].simple_commands[0].stdout, Stream::File(_)));
        assert!(path.exists());
    }

    #[test]
    fn filename_may_follow_extra_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spaced.txt");

        let chain = parse_line(&format!("echo hi >   {}", path.display())).unwrap();
        assert_eq!(chain.commands[0].simple_commands[0].args, vec!["echo", "hi"]);
        assert!(path.exists());
    }

    #[test]
    fn input_and_stderr_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let errors = dir.path().join("err.txt");
        std::fs::write(&input, "data").unwrap();

        let line = format!("sort < {} 2> {}", input.display(), errors.display());
        let chain = parse_line(&line).unwrap();
        let simple = &chain.commands[0].simple_commands[0];
        assert_eq!(simple.args, vec!["sort"]);
        assert!(matches!(simple.stdin, Stream::File(_)));
        assert!(matches!(simple.stderr, Stream::File(_)));
        assert!(!simple.stdout.is_redirected());
    }

    #[test]
    fn input_redirect_may_come_first() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "data").unwrap();

        let chain = parse_line(&format!("< {} cat", input.display())).unwrap();
        let simple = &chain.commands[0].simple_commands[0];
        assert_eq!(simple.args, vec!["cat"]);
        assert!(matches!(simple.stdin, Stream::File(_)));
    }

    #[test]
    fn redirect_binds_to_current_stage_only() {
        let dir = tempfile::tempdir().unwrap();
        let errors = dir.path().join("err.txt");

        let chain = parse_line(&format!("ls 2> {} | wc", errors.display())).unwrap();
        let stages = &chain.commands[0].simple_commands;
        assert!(matches!(stages[0].stderr, Stream::File(_)));
        assert!(!stages[1].stderr.is_redirected());
    }

    #[test]
    fn sequence_operator_splits_chain() {
        let chain = parse_line("cmd1 ; cmd2").unwrap();
        assert_eq!(names(&chain), vec![vec!["cmd1"], vec!["cmd2"]]);
        assert_eq!(chain.commands[0].chaining_operator, Some(ChainOperator::Sequence));
        assert_eq!(chain.commands[0].chaining_operator.unwrap().as_str(), ";");
        assert!(!chain.commands[0].background);
        assert!(!chain.commands[1].background);
        assert_eq!(chain.commands[1].chaining_operator, None);
    }

    #[test]
    fn background_operator_marks_pipeline() {
        let chain = parse_line("sleep 5 &").unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain.commands[0].background);
        assert_eq!(chain.commands[0].chaining_operator, Some(ChainOperator::Background));
    }

    #[test]
    fn background_then_foreground() {
        let chain = parse_line("sleep 1 & echo done").unwrap();
        assert_eq!(names(&chain), vec![vec!["sleep"], vec!["echo"]]);
        assert!(chain.commands[0].background);
        assert!(!chain.commands[1].background);
    }

    #[test]
    fn trailing_space_after_operator_is_fine() {
        let chain = parse_line("ls ; ").unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn logical_operators_are_plain_words() {
        let chain = parse_line("true && echo x").unwrap();
        assert_eq!(
            chain.commands[0].simple_commands[0].args,
            vec!["true", "&&", "echo", "x"]
        );
    }

    #[test]
    fn history_reference_rewrites_to_builtin() {
        let chain = parse_line("!3").unwrap();
        let simple = &chain.commands[0].simple_commands[0];
        assert_eq!(simple.args, vec!["history", "3"]);
        assert_eq!(simple.handler, Handler::Builtin(Builtin::History));
    }

    #[test]
    fn history_reference_only_in_command_position() {
        let chain = parse_line("echo !3").unwrap();
        assert_eq!(chain.commands[0].simple_commands[0].args, vec!["echo", "!3"]);
    }

    #[test]
    fn bare_bang_is_a_word() {
        let chain = parse_line("!").unwrap();
        assert_eq!(chain.commands[0].simple_commands[0].args, vec!["!"]);
    }

    #[test]
    fn builtins_resolved_at_parse_time() {
        let chain = parse_line("pwd | cat").unwrap();
        let stages = &chain.commands[0].simple_commands;
        assert_eq!(stages[0].handler, Handler::Builtin(Builtin::Pwd));
        assert_eq!(stages[1].handler, Handler::External);
    }

    #[test]
    fn leading_pipe_is_error() {
        assert!(matches!(parse_line("| wc"), Err(ParseError::MissingCommand(_))));
    }

    #[test]
    fn trailing_pipe_is_error() {
        assert!(matches!(parse_line("ls |"), Err(ParseError::TrailingPipe)));
    }

    #[test]
    fn bare_chaining_operator_is_error() {
        assert!(matches!(parse_line(";"), Err(ParseError::UnexpectedToken(_))));
        assert!(matches!(parse_line("ls ; ; pwd"), Err(ParseError::UnexpectedToken(_))));
        assert!(matches!(parse_line("&"), Err(ParseError::UnexpectedToken(_))));
    }

    #[test]
    fn output_redirect_without_command_is_error() {
        assert!(matches!(parse_line("> out.txt"), Err(ParseError::MissingCommand(_))));
    }

    #[test]
    fn double_output_redirect_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let line = format!("echo hi > {} > {}", a.display(), b.display());
        assert!(matches!(
            parse_line(&line),
            Err(ParseError::DuplicateRedirect(StreamKind::Stdout))
        ));
    }

    #[test]
    fn redirect_then_pipe_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let line = format!("echo hi > {} | wc", a.display());
        assert!(matches!(
            parse_line(&line),
            Err(ParseError::DuplicateRedirect(StreamKind::Stdout))
        ));
    }

    #[test]
    fn input_redirect_after_pipe_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "").unwrap();
        let line = format!("ls | wc < {}", input.display());
        assert!(matches!(
            parse_line(&line),
            Err(ParseError::DuplicateRedirect(StreamKind::Stdin))
        ));
    }

    #[test]
    fn missing_filename_is_error() {
        assert!(matches!(parse_line("echo hi >"), Err(ParseError::MissingFilename(_))));
        assert!(matches!(parse_line("echo hi > ; ls"), Err(ParseError::MissingFilename(_))));
    }

    #[test]
    fn unopenable_input_aborts_whole_chain() {
        let result = parse_line("ls ; cat < /definitely/not/here.txt");
        assert!(matches!(result, Err(ParseError::Open { .. })));
    }

    #[test]
    fn dropping_chain_closes_every_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "data").unwrap();

        let line = format!("cat < {} | sort | wc > {}", input.display(), output.display());
        let chain = parse_line(&line).unwrap();

        let fds: Vec<RawFd> = chain
            .commands
            .iter()
            .flat_map(|command| &command.simple_commands)
            .flat_map(|simple| [&simple.stdin, &simple.stdout, &simple.stderr])
            .filter_map(|stream| stream.raw_fd())
            .collect();
        // input file, two pipes (four ends), output file
        assert_eq!(fds.len(), 6);

        let before: Vec<_> = fds.iter().map(|fd| fd_identity(*fd)).collect();
        assert!(before.iter().all(Option::is_some));

        drop(chain);

        for (fd, identity) in fds.iter().zip(before) {
            assert_ne!(fd_identity(*fd), identity, "fd {fd} still open after drop");
        }
    }

    /// Every descriptor of this process that refers to the file at `path`.
    fn fds_open_on(path: &std::path::Path) -> Vec<RawFd> {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::metadata(path).unwrap();
        let target = Some((meta.dev(), meta.ino()));
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<RawFd>().ok())
            .filter(|fd| fd_identity(*fd) == target)
            .collect()
    }

    #[test]
    fn failed_parse_closes_what_it_opened() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let first = dir.path().join("a.txt");
        let second = dir.path().join("b.txt");
        std::fs::write(&input, "data").unwrap();

        // the input file, a pipe and the first output are open when the
        // second output redirect fails
        let line = format!(
            "cat < {} | sort > {} > {}",
            input.display(),
            first.display(),
            second.display()
        );
        assert!(matches!(
            parse_line(&line),
            Err(ParseError::DuplicateRedirect(StreamKind::Stdout))
        ));

        assert!(first.exists());
        assert_eq!(fds_open_on(&input), Vec::<RawFd>::new());
        assert_eq!(fds_open_on(&first), Vec::<RawFd>::new());
    }
}
