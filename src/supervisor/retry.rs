//! Bounded retry around single-shot backend invocations
//!
//! A failure only earns a retry when the exit code said "server not ready
//! yet" (not running, initializing, or busy). Anything else is surfaced to
//! the caller on the first attempt.

use crate::supervisor::process::{CommandOutput, ExecOptions, SupervisorInner};
use crate::{Error, Result};

pub(crate) async fn exec_with_retries(
    supervisor: &SupervisorInner,
    args: &[String],
    options: &ExecOptions,
    log_errors: bool,
) -> Result<Option<CommandOutput>> {
    let max_attempts = supervisor.config.max_attempts.max(1);
    let delay = supervisor.config.retry_delay();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        match supervisor.raw_exec(args, options).await {
            Ok(result) => return Ok(result),
            Err(error) => {
                let retryable = matches!(
                    &error,
                    Error::CommandFailed { status, .. } if status.is_retryable()
                );
                if !retryable {
                    if log_errors {
                        tracing::error!("Backend command {:?} failed: {}", args.first(), error);
                    }
                    return Err(error);
                }
                tracing::debug!(
                    "Backend command {:?} attempt {}/{} failed ({}); retrying",
                    args.first(),
                    attempt,
                    max_attempts,
                    error
                );
                last_error = Some(error);
            }
        }
    }

    // Only reachable after at least one retryable failure.
    let error =
        last_error.unwrap_or_else(|| Error::Other("retry loop ran no attempts".to_string()));
    if log_errors {
        tracing::error!(
            "Backend command {:?} failed after {} attempts: {}",
            args.first(),
            max_attempts,
            error
        );
    }
    Err(error)
}
