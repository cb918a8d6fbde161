//! Runs external programs on behalf of an engine.
//!
//! Standard output and standard error are read line by line while the child
//! runs, so output reaches the sink before the program exits. Streamed chunks
//! keep their bytes as written, apart from lossy UTF-8 decoding. The child is
//! killed when the future is dropped, which is how cancellation reaches it.

use std::{io, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, instrument};

use super::{EngineError, EngineResult, EngineSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOutput {
    /// Forward standard output lines to the sink as they arrive.
    Stream,
    /// Return standard output lines to the caller.
    Capture,
}

/// Runs `program` to completion. Standard error always goes to the sink;
/// standard output goes wherever `mode` says. Returns the captured lines,
/// which are empty in [`NativeOutput::Stream`] mode.
#[instrument(level = "debug", skip(args, sink))]
pub async fn run_native(
    program: &str,
    args: &[String],
    sink: &EngineSink,
    mode: NativeOutput,
) -> EngineResult<Vec<String>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| native_error(program, "standard output was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| native_error(program, "standard error was not captured"))?;
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let mut captured = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => {
                if read.map_err(|e| native_error(program, e))? == 0 {
                    stdout_open = false;
                    continue;
                }
                let chunk = decode(&mut stdout_buf);
                match mode {
                    NativeOutput::Stream => sink.stdout(chunk)?,
                    NativeOutput::Capture => captured.push(strip_line_ending(chunk)),
                }
            }
            read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                if read.map_err(|e| native_error(program, e))? == 0 {
                    stderr_open = false;
                    continue;
                }
                sink.stderr(decode(&mut stderr_buf))?;
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| native_error(program, e))?;
    debug!("{} exited with {}", program, status);
    Ok(captured)
}

/// Takes one chunk out of `buf`, terminator included as received. Invalid
/// UTF-8 is replaced rather than failing the command.
fn decode(buf: &mut Vec<u8>) -> String {
    let chunk = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    chunk
}

/// Captured lines become pipeline values, so they lose their line ending.
fn strip_line_ending(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

fn spawn_error(program: &str, error: io::Error) -> EngineError {
    match error.kind() {
        io::ErrorKind::NotFound => EngineError::CommandNotFound {
            name: program.to_string(),
        },
        _ => native_error(program, error),
    }
}

fn native_error(program: &str, message: impl ToString) -> EngineError {
    EngineError::Native {
        program: program.to_string(),
        message: message.to_string(),
    }
}
