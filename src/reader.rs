//! Background reader for the standard output of a spawned process.
//!
//! A dedicated Tokio task reads the child's stdout line by line and pushes
//! each line into an unbounded channel. The owner drains the channel without
//! blocking, so slow or bursty producers never stall the measurement loop.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::probe::ProbeError;

/// Drains the standard output of a child process in the background.
///
/// Must be created from within a Tokio runtime.
pub struct BackgroundLineReader {
    command: String,
    child: Child,
    rx: UnboundedReceiver<String>,
    task: JoinHandle<()>,
}

impl BackgroundLineReader {
    /// Spawn `command` with its stdout captured and start the reader task.
    ///
    /// # Errors
    /// Returns `ProbeError::ExecutableNotFound` if the program cannot be found,
    /// or `ProbeError::Io` for any other spawn failure.
    pub fn spawn(mut command: Command) -> Result<Self, ProbeError> {
        let description = describe_command(&command);

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProbeError::ExecutableNotFound(description.clone()),
            _ => ProbeError::Io(e),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ProbeError::Io(std::io::Error::other(format!(
                "stdout of '{description}' was not captured"
            )))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(enqueue_output(stdout, tx, description.clone()));

        tracing::debug!(command = %description, pid = ?child.id(), "Process spawned");

        Ok(Self {
            command: description,
            child,
            rx,
            task,
        })
    }

    /// Command line of the spawned process.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status of the process if it has terminated.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, ProbeError> {
        Ok(self.child.try_wait()?)
    }

    /// Drain every line queued since the last call. Never blocks.
    pub fn read(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Whether there is still output to observe.
    ///
    /// True while the reader task has not finished or lines are still
    /// queued. A process may exit with its last lines still in the queue,
    /// so callers keep draining until this returns false.
    pub fn running(&self) -> bool {
        // The task finishing happens-after its last push, so check it first.
        !self.task.is_finished() || !self.rx.is_empty()
    }
}

impl std::fmt::Debug for BackgroundLineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundLineReader")
            .field("command", &self.command)
            .field("pid", &self.child.id())
            .field("queued", &self.rx.len())
            .field("task_finished", &self.task.is_finished())
            .finish()
    }
}

/// Push stdout lines into the queue until the stream closes.
///
/// Invalid UTF-8 is replaced rather than treated as a read error.
async fn enqueue_output(stdout: ChildStdout, tx: UnboundedSender<String>, command: String) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(decode_line(&buf)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "Failed to read process output");
                break;
            }
        }
    }
    tracing::debug!(command = %command, "Process output closed");
}

/// Decode one raw line lossily, without its `\n` or `\r\n` terminator.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Render a command as a single line for logs and errors.
fn describe_command(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    async fn drain_all(reader: &mut BackgroundLineReader) -> Vec<String> {
        let mut out = Vec::new();
        while reader.running() {
            out.extend(reader.read());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        out.extend(reader.read());
        out
    }

    #[tokio::test]
    async fn test_reader_collects_all_lines() {
        let mut reader =
            BackgroundLineReader::spawn(shell("for i in 1 2 3 4 5; do echo $i; sleep 0.01; done"))
                .unwrap();

        let lines = drain_all(&mut reader).await;
        assert_eq!(lines, vec!["1", "2", "3", "4", "5"]);
        assert!(!reader.running());
        assert!(reader.read().is_empty());
    }

    #[tokio::test]
    async fn test_reader_keeps_running_while_lines_are_queued() {
        let mut reader = BackgroundLineReader::spawn(shell("echo a; echo b")).unwrap();

        // Wait for the task to finish without draining.
        while !reader.task.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(reader.running(), "queued lines must keep the reader running");

        assert_eq!(reader.read(), vec!["a", "b"]);
        assert!(!reader.running());
    }

    #[tokio::test]
    async fn test_reader_read_does_not_block() {
        let mut reader = BackgroundLineReader::spawn(shell("sleep 1; echo late")).unwrap();
        assert!(reader.read().is_empty());
        assert!(reader.running());
    }

    #[tokio::test]
    async fn test_reader_missing_executable() {
        let err = BackgroundLineReader::spawn(Command::new("missing_process_ut.sh")).unwrap_err();
        assert!(matches!(err, ProbeError::ExecutableNotFound(ref cmd) if cmd == "missing_process_ut.sh"));
    }

    #[tokio::test]
    async fn test_reader_reports_exit_status() {
        let mut reader = BackgroundLineReader::spawn(shell("exit 3")).unwrap();
        drain_all(&mut reader).await;

        let mut status = None;
        for _ in 0..100 {
            status = reader.try_wait().unwrap();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status.and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn test_reader_survives_invalid_utf8() {
        let script = r"printf 'a\n\377\nb\r\n'; sleep 0.05; echo c";
        let mut reader = BackgroundLineReader::spawn(shell(script)).unwrap();

        let lines = drain_all(&mut reader).await;
        assert_eq!(lines, vec!["a", "\u{FFFD}", "b", "c"]);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{FFFD} byte");
    }

    #[test]
    fn test_describe_command() {
        let mut command = Command::new("ping");
        command.arg("-c").arg("3").arg("127.0.0.1");
        assert_eq!(describe_command(&command), "ping -c 3 127.0.0.1");
    }
}
