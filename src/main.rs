mod builtins;
mod command;
mod error;
mod executor;
mod expander;
mod history;
mod jobs;
mod parser;
mod redirect;
mod relay;
mod shell;
mod signals;
mod status;
mod tokenizer;

use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use crate::shell::{Flow, Shell};

/// Environment variable holding the log filter, e.g. `CHAINSH_LOG=debug`.
const LOG_ENV: &str = "CHAINSH_LOG";

#[derive(FromArgs)]
/// A line-oriented command interpreter. Reads commands from standard input,
/// or from SCRIPT when one is given.
struct Args {
    /// script file to run non-interactively
    #[argh(positional)]
    script: Option<PathBuf>,
}

fn main() {
    let args: Args = argh::from_env();
    init_logging();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("chainsh: {error:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn run(args: Args) -> anyhow::Result<i32> {
    let mut shell = Shell::new();
    signals::install(&shell.jobs)?;

    let code = match args.script {
        Some(path) => {
            tracing::debug!("running script {}", path.display());
            let file = File::open(&path)
                .with_context(|| format!("error opening script {}", path.display()))?;
            read_eval_loop(&mut shell, BufReader::new(file), false)?
        }
        None => read_eval_loop(&mut shell, io::stdin().lock(), true)?,
    };

    shell.jobs.collect();
    if !shell.jobs.is_empty() {
        tracing::debug!(count = shell.jobs.len(), "leaving background jobs running");
    }
    Ok(code)
}

/// Read lines until EOF or `exit`, running each one.
fn read_eval_loop(shell: &mut Shell, mut input: impl BufRead, interactive: bool) -> anyhow::Result<i32> {
    let mut stdout = io::stdout();

    loop {
        signals::log_advisory();

        if interactive {
            print!("{} ", shell.prompt);
            stdout.flush().context("failed to write prompt")?;
        }

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => {
                if interactive {
                    println!("\nEOF detected. Exiting shell.");
                }
                return Ok(0);
            }
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error).context("error reading input"),
        }

        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }

        if let Flow::Exit(code) = shell.execute_input(line) {
            return Ok(code);
        }
    }
}
