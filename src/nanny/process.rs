//! The running resolver child.

use std::process::{ExitStatus, Stdio};
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// How the resolver ended.
#[derive(Debug)]
pub enum ExitOutcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(status) => write!(f, "{status}"),
            ExitOutcome::WaitFailed(e) => write!(f, "wait failed: {e}"),
        }
    }
}

pub struct SupervisedProcess {
    pub pid: u32,
    pub exit: oneshot::Receiver<ExitOutcome>,
}

impl SupervisedProcess {
    /// Spawn `exec args..`, forward its output to the log and watch for exit.
    pub fn spawn(exec: &Path, args: &[&str]) -> std::io::Result<Self> {
        let mut child = Command::new(exec)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("child exited before its pid was read"))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines("stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines("stderr", stderr));
        }

        let (tx, exit) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::Exited(status),
                Err(e) => ExitOutcome::WaitFailed(e),
            };
            // receiver gone means nobody is supervising anymore
            let _ = tx.send(outcome);
        });

        Ok(Self { pid, exit })
    }
}

/// Log `reader` line by line until EOF.
///
/// The pipe stays open for the life of the child: closing it early would
/// kill the resolver on its next write.
async fn forward_lines<R: AsyncRead + Unpin>(stream: &'static str, reader: R) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::warn!(stream, "Got EOF from resolver");
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::info!(stream, "{}", line.trim_end());
            }
            Err(e) => {
                tracing::error!(stream, error = %e, "Error reading resolver output, discarding the rest");
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    tracing::error!(stream, error = %e, "Error draining resolver output");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_exit_reported_once() {
        let process = SupervisedProcess::spawn(Path::new("sh"), &["-c", "echo ready; exit 3"]).unwrap();
        assert!(process.pid > 0);

        let outcome = tokio::time::timeout(Duration::from_secs(5), process.exit)
            .await
            .unwrap()
            .unwrap();
        match outcome {
            ExitOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_utf8_output_keeps_pipe_open() {
        let process = SupervisedProcess::spawn(
            Path::new("sh"),
            &["-c", "printf '\\377\\n'; sleep 0.5; echo after; echo after >&2; exit 0"],
        )
        .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), process.exit)
            .await
            .unwrap()
            .unwrap();
        match outcome {
            ExitOutcome::Exited(status) => assert_eq!(status.code(), Some(0)),
            other => panic!("unexpected outcome: {other}"),
        }
    }
}
