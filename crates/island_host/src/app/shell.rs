use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info};

use super::host::{Flow, Host};

const SHUTDOWN_PASTE_TIMEOUT: Duration = Duration::from_secs(5);
const PROMPT: &str = "islands> ";

/// Reads commands from stdin until `exit` or end of input. Finished pastes
/// are delivered after every line.
pub(crate) fn run(mut host: Host) -> ExitCode {
    info!(root = %host.paths().root.display(), "host_ready");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        if write_prompt(&mut stdout).is_err() {
            break;
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(read_error)) => {
                error!(error = %read_error, "stdin_read_failed");
                return ExitCode::FAILURE;
            }
            None => break,
        };
        let flow = host.execute(&line);
        host.pump();
        if print_lines(&mut stdout, host.drain_output()).is_err() {
            break;
        }
        if flow == Flow::Exit {
            break;
        }
    }

    host.drain_pastes(SHUTDOWN_PASTE_TIMEOUT);
    let _ = print_lines(&mut stdout, host.drain_output());
    info!("host_stopped");
    ExitCode::SUCCESS
}

fn write_prompt(out: &mut impl Write) -> io::Result<()> {
    out.write_all(PROMPT.as_bytes())?;
    out.flush()
}

fn print_lines(out: &mut impl Write, lines: Vec<String>) -> io::Result<()> {
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()
}
