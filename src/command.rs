//! External tool invocation
//!
//! Every call to `exiftool` or `magick` goes through a [`CommandRunner`], so the
//! extractors can be driven by scripted output in tests.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Captured result of one external process round trip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Runs a program to completion and captures its output.
///
/// Implementations block the calling thread for the whole round trip.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Spawns real processes, optionally killing them after `timeout`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self { timeout: None }
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(timeout) = self.timeout else {
            return child.wait_with_output().map(CommandOutput::from);
        };

        // Pipes are drained on their own threads so a chatty child cannot block on a full pipe.
        // A grandchild may keep them open after the child exits, so collection is bounded too.
        let (tx, rx) = mpsc::channel();
        spawn_drain(Pipe::Stdout, child.stdout.take(), tx.clone());
        spawn_drain(Pipe::Stderr, child.stderr.take(), tx);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill(&mut child);
                    return Err(e);
                }
            }
            if Instant::now() >= deadline {
                kill(&mut child);
                return Err(timed_out(program, timeout));
            }
            thread::sleep(Duration::from_millis(10));
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for _ in 0..2 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((Pipe::Stdout, buf)) => stdout = buf,
                Ok((Pipe::Stderr, buf)) => stderr = buf,
                Err(_) => return Err(timed_out(program, timeout)),
            }
        }

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Pipe, reader: Option<R>, tx: Sender<(Pipe, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        let _ = tx.send((pipe, buf));
    });
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn timed_out(program: &str, timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} did not finish within {:?}", program, timeout),
    )
}

/// Render a file path so no tool mistakes it for an option (`-ver`) or a
/// coder prefix (`text:notes.txt`)
pub fn path_arg(path: &Path) -> String {
    let text = path.display().to_string();
    if path.is_relative() && (text.starts_with('-') || text.contains(':')) {
        format!("./{}", text)
    } else {
        text
    }
}

/// Argument builder for a single tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path_arg(path.as_ref()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run the command. A non-zero exit is still `Ok`; callers inspect the output.
    pub fn execute(&self, runner: &dyn CommandRunner) -> Result<CommandOutput, ToolError> {
        debug!("Running {} {}", self.program, self.args.join(" "));
        let output = runner.run(&self.program, &self.args)?;
        if !output.success {
            debug!("{} exited with {:?}", self.program, output.code);
        }
        Ok(output)
    }
}
