//! Command execution probe.
//!
//! Runs a trusted command and succeeds on exit code 0. The command and its
//! arguments come from configuration and are not sanitized here.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use vigil_core::{CheckResult, ProbeError, Target};

use crate::context::ProbeContext;

/// Output beyond this many bytes is dropped.
pub const MAX_OUTPUT_BYTES: usize = 4096;

const TRUNCATED_MARKER: &str = "\n[truncated]";

/// Bytes kept per stream; one past the budget so truncation is detectable.
const CAPTURE_LIMIT: u64 = MAX_OUTPUT_BYTES as u64 + 1;

#[derive(Debug, Clone)]
pub struct ExecProber {
    timeout: Duration,
}

impl ExecProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        let start = Instant::now();

        if target.command.is_empty() {
            return CheckResult::failure(
                start.elapsed(),
                "no command configured",
                ProbeError::InvalidTarget("empty command".to_string()),
            );
        }

        // The child is killed if the deadline or cancellation drops this future.
        let mut command = Command::new(&target.command);
        command
            .args(&target.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(error = %e, command = %target.command, "exec probe spawn failed");
                return CheckResult::failure(
                    start.elapsed(),
                    format!("failed to run {}: {e}", target.command),
                    ProbeError::Spawn(e.to_string()),
                );
            }
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = ctx
            .run(self.timeout, async move {
                let (out, err) = tokio::join!(read_capped(stdout), read_capped(stderr));
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((status, out?, err?))
            })
            .await;

        let (status, stdout, stderr) = match finished {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(error = %e, command = %target.command, "exec probe io failed");
                return CheckResult::failure(
                    start.elapsed(),
                    format!("failed to collect output of {}: {e}", target.command),
                    ProbeError::Io(e.to_string()),
                );
            }
            Err(e) => {
                debug!(error = %e, command = %target.command, "exec probe interrupted");
                return CheckResult::failure(
                    start.elapsed(),
                    format!("command {} did not finish: {e}", target.command),
                    e,
                );
            }
        };
        let latency = start.elapsed();

        let mut combined = stdout;
        combined.extend_from_slice(&stderr);
        let text = truncate_output(&combined);

        if status.success() {
            CheckResult::success(latency, text)
        } else {
            debug!(command = %target.command, %status, "exec probe failed");
            CheckResult::failure(latency, text, ProbeError::ExitStatus(status.code()))
        }
    }
}

/// Keep at most [`CAPTURE_LIMIT`] bytes of `reader` and discard the rest,
/// so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::new();
    let mut limited = reader.take(CAPTURE_LIMIT);
    limited.read_to_end(&mut kept).await?;
    tokio::io::copy(&mut limited.into_inner(), &mut tokio::io::sink()).await?;
    Ok(kept)
}

/// Decode `bytes` lossily, keeping at most [`MAX_OUTPUT_BYTES`] and marking
/// anything dropped.
fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return String::from_utf8_lossy(bytes).trim_end().to_string();
    }
    let mut text = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned();
    text.push_str(TRUNCATED_MARKER);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Target {
        Target::exec("/bin/sh", ["-c", script])
    }

    #[test]
    fn truncate_marks_long_output() {
        let long = vec![b'x'; MAX_OUTPUT_BYTES + 1];
        let out = truncate_output(&long);
        assert!(out.ends_with("[truncated]"));
        assert_eq!(out.len(), MAX_OUTPUT_BYTES + TRUNCATED_MARKER.len());

        let short = truncate_output(b"ok\n");
        assert_eq!(short, "ok");
    }

    #[tokio::test]
    async fn capture_stops_at_limit() {
        let flood = vec![b'y'; 1 << 20];
        let kept = read_capped(Some(&flood[..])).await.unwrap();
        assert_eq!(kept.len() as u64, CAPTURE_LIMIT);

        let kept = read_capped(Some(&b"short"[..])).await.unwrap();
        assert_eq!(kept, b"short");
        assert!(read_capped::<&[u8]>(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flooding_command_output_is_bounded() {
        let r = ExecProber::new(Duration::from_secs(10))
            .probe(
                &ProbeContext::new(),
                &sh("head -c 8388608 /dev/zero | tr '\\0' 'b'; echo oops >&2; exit 1"),
            )
            .await;
        assert_eq!(r.error, Some(ProbeError::ExitStatus(Some(1))));
        assert_eq!(r.output.len(), MAX_OUTPUT_BYTES + TRUNCATED_MARKER.len());
        assert!(r.output.ends_with("[truncated]"));
    }

    #[tokio::test]
    async fn true_succeeds() {
        let r = ExecProber::new(Duration::from_secs(5))
            .probe(&ProbeContext::new(), &Target::exec("true", Vec::<String>::new()))
            .await;
        assert!(r.success, "{r:?}");
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let r = ExecProber::new(Duration::from_secs(5))
            .probe(&ProbeContext::new(), &sh("echo small error >&2; exit 3"))
            .await;
        assert!(!r.success);
        assert_eq!(r.error, Some(ProbeError::ExitStatus(Some(3))));
        assert!(r.output.contains("small error"));
        assert!(!r.output.contains("[truncated]"));
    }

    #[tokio::test]
    async fn large_failure_output_is_truncated() {
        let r = ExecProber::new(Duration::from_secs(5))
            .probe(
                &ProbeContext::new(),
                &sh("head -c 5120 /dev/zero | tr '\\0' 'a'; exit 1"),
            )
            .await;
        assert!(!r.success);
        assert!(r.output.contains("[truncated]"));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let r = ExecProber::new(Duration::from_secs(1))
            .probe(
                &ProbeContext::new(),
                &Target::exec("/nonexistent/vigil-check", Vec::<String>::new()),
            )
            .await;
        assert!(matches!(r.error, Some(ProbeError::Spawn(_))));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let started = Instant::now();
        let r = ExecProber::new(Duration::from_millis(200))
            .probe(&ProbeContext::new(), &sh("sleep 5"))
            .await;
        assert_eq!(r.error, Some(ProbeError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
