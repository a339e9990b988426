#[cfg(not(unix))]
compile_error!("smash relies on POSIX process groups and job control");

mod builtins;
mod command;
mod config;
mod error;
mod job_control;
mod jobs;
mod launcher;
mod parser;
mod pipeline;
mod redirect;
mod shell;
mod signals;
mod status;

use std::io::{self, Write};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ShellConfig;
use crate::shell::{Flow, Shell};
use crate::signals::SignalRelay;

fn main() {
    // Diagnostics go to stderr and stay off unless SMASH_LOG asks for them.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_env("SMASH_LOG").unwrap_or_else(|_| EnvFilter::new("off")))
        .init();

    let relay = match SignalRelay::install() {
        Ok(relay) => relay,
        Err(err) => {
            eprintln!("smash error: {err}");
            std::process::exit(1);
        }
    };

    let mut shell = Shell::new(ShellConfig::from_env(), relay);
    tracing::debug!(pid = shell.pid, "shell started");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    let exit_code = loop {
        print!("{}> ", shell.prompt());
        if stdout.flush().is_err() {
            break 0;
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            // EOF behaves like a plain `quit`.
            Ok(0) => break 0,
            Ok(_) => {
                shell.deliver_signals(&mut stdout);
                if let Flow::Exit(code) = shell.execute(&input) {
                    break code;
                }
            }
            Err(error) => {
                eprintln!("smash error: cannot read input: {error}");
                break 1;
            }
        }
    };

    std::process::exit(exit_code);
}
