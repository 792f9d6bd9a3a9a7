use anyhow::{Context, Result};
use duct::Expression;
use std::process::Output;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Cancelled;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Start `expr` and wait for it without blocking the runtime.
///
/// The child is killed as soon as `token` is cancelled. The expression is
/// run unchecked; callers inspect `Output::status` themselves so they can
/// attach tool specific diagnostics.
pub async fn run_cancellable(
    expr: Expression,
    token: &CancellationToken,
    label: &str,
) -> Result<Output> {
    super::ensure_active(token)?;

    let handle = expr
        .unchecked()
        .start()
        .with_context(|| format!("Failed to start {label}"))?;

    loop {
        let finished = handle
            .try_wait()
            .with_context(|| format!("Failed waiting for {label}"))?
            .is_some();
        if finished {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => {
                let _ = handle.kill();
                return Err(Cancelled.into());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    handle
        .into_output()
        .with_context(|| format!("Failed collecting output of {label}"))
}

/// Like [`run_cancellable`] but fails on a non-zero exit status, quoting stderr.
pub async fn run_checked(
    expr: Expression,
    token: &CancellationToken,
    label: &str,
) -> Result<Output> {
    let output = run_cancellable(expr, token, label).await?;
    if !output.status.success() {
        anyhow::bail!(
            "{label} exited with status {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use duct::cmd;

    #[tokio::test]
    async fn captures_stdout_of_finished_command() {
        let token = CancellationToken::new();
        let output = run_checked(cmd!("echo", "hello").stdout_capture(), &token, "echo")
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn precancelled_token_never_starts_the_child() {
        let token = CancellationToken::new();
        token.cancel();
        let err = run_cancellable(cmd!("sleep", "5"), &token, "sleep")
            .await
            .unwrap_err();
        assert!(crate::common::is_cancelled(&err));
    }

    #[tokio::test]
    async fn cancellation_kills_running_child() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = run_cancellable(cmd!("sleep", "10"), &token, "sleep")
            .await
            .unwrap_err();
        assert!(crate::common::is_cancelled(&err));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
