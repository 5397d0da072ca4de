use async_trait::async_trait;
use std::{io, process::Stdio};
use tokio::{
    io::AsyncWriteExt,
    process::{ChildStdin, Command},
};

use crate::channel::{ChannelError, ChannelKind, DispatchEnvelope, TransportChannel};

/// Hands each envelope to the pipeline platform's CLI. The envelope JSON is
/// written to the child's stdin; the exit status alone decides the outcome,
/// so a child that exits without draining stdin is not an I/O failure.
pub struct CommandChannel {
    kind: ChannelKind,
    program: String,
    args: Vec<String>,
}

impl CommandChannel {
    pub fn new(kind: ChannelKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TransportChannel for CommandChannel {
    async fn send(&self, envelope: &DispatchEnvelope) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(envelope)
            .map_err(|err| ChannelError::Serialization(err.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PERMIT_SYNC_CHANNEL", self.kind.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdin) = child.stdin.take() {
            match write_body(stdin, &body).await {
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => return Err(err.into()),
                _ => {}
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }
        Err(ChannelError::Rejected(command_failure_details(
            &self.program,
            &output,
        )))
    }
}

async fn write_body(mut stdin: ChildStdin, body: &[u8]) -> io::Result<()> {
    stdin.write_all(body).await?;
    stdin.shutdown().await
}

fn command_failure_details(program: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        format!("{program} exited with status {}", output.status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn envelope() -> DispatchEnvelope {
        DispatchEnvelope::new(
            ChannelKind::Analytics,
            json!({"permit_id": "p-9"}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn zero_exit_is_accepted_and_receives_stdin() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("received.json");
        let script = format!(
            "cat > '{}' && test \"$PERMIT_SYNC_CHANNEL\" = analytics",
            out.display()
        );
        let channel = CommandChannel::new(
            ChannelKind::Analytics,
            "sh",
            vec!["-c".to_string(), script],
        );

        channel.send(&envelope()).await.expect("send ok");

        let received: DispatchEnvelope =
            serde_json::from_slice(&std::fs::read(&out).expect("read")).expect("json");
        assert_eq!(received.payload["permit_id"], "p-9");
        assert_eq!(received.metadata.channel, ChannelKind::Analytics);
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let channel = CommandChannel::new(
            ChannelKind::Ingestion,
            "sh",
            vec![
                "-c".to_string(),
                "cat > /dev/null; echo 'stream not found' >&2; exit 3".to_string(),
            ],
        );

        let err = channel.send(&envelope()).await.expect_err("rejected");
        assert_eq!(err.to_string(), "stream not found");
    }

    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let channel = CommandChannel::new(
            ChannelKind::Events,
            "permit-sync-definitely-missing-binary",
            Vec::new(),
        );

        let err = channel.send(&envelope()).await.expect_err("spawn fails");
        assert!(matches!(err, ChannelError::Io(_)));
    }

    fn oversized_envelope() -> DispatchEnvelope {
        DispatchEnvelope::new(
            ChannelKind::Ingestion,
            json!({"permit_id": "p-9", "description": "x".repeat(1 << 20)}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn child_that_ignores_stdin_is_judged_by_exit_status() {
        let accepting = CommandChannel::new(
            ChannelKind::Ingestion,
            "sh",
            vec!["-c".to_string(), "exit 0".to_string()],
        );
        accepting
            .send(&oversized_envelope())
            .await
            .expect("closed stdin is not a failure");

        let refusing = CommandChannel::new(
            ChannelKind::Ingestion,
            "sh",
            vec!["-c".to_string(), "echo 'quota exceeded' >&2; exit 4".to_string()],
        );
        let err = refusing
            .send(&oversized_envelope())
            .await
            .expect_err("non-zero exit");
        assert!(matches!(err, ChannelError::Rejected(_)), "{err}");
    }
}
