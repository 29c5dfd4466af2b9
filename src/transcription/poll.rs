//! Bounded, cancellable transcript polling.

use super::{TranscriptHandle, TranscriptStatus, TranscriptionService};
use crate::config::TranscriptionSettings;
use crate::error::{JottaError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// How often to poll and how long to wait overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn from_settings(settings: &TranscriptionSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.poll_interval_seconds),
            max_wait: Duration::from_secs(settings.max_wait_seconds),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_settings(&TranscriptionSettings::default())
    }
}

/// Poll `handle` until it completes, fails, times out or is cancelled.
///
/// A remote `failed` status becomes [`JottaError::TranscriptionFailed`]. On
/// timeout, cancellation or a poll error the remote job is cancelled
/// best-effort before returning.
#[instrument(skip(service, policy, cancel), fields(handle = %handle))]
pub async fn wait_for_transcript(
    service: &dyn TranscriptionService,
    handle: &TranscriptHandle,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<String> {
    let result = poll_until_settled(service, handle, policy, cancel).await;

    if let Err(e) = &result {
        if !matches!(e, JottaError::TranscriptionFailed(_)) {
            if let Err(cancel_err) = service.cancel(handle).await {
                warn!("Failed to cancel remote transcript {}: {}", handle, cancel_err);
            }
        }
    }

    result
}

async fn poll_until_settled(
    service: &dyn TranscriptionService,
    handle: &TranscriptHandle,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<String> {
    let deadline = Instant::now() + policy.max_wait;
    let mut polls = 0u32;

    loop {
        let status = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(JottaError::Cancelled(format!("transcript {} abandoned", handle)));
            }
            status = service.poll(handle) => status?,
        };
        polls += 1;

        match status {
            TranscriptStatus::Completed(text) => {
                debug!("Transcript ready after {} polls", polls);
                return Ok(text);
            }
            TranscriptStatus::Failed(reason) => {
                return Err(JottaError::TranscriptionFailed(reason));
            }
            TranscriptStatus::Queued | TranscriptStatus::Processing => {
                debug!("Transcript {} still {:?}", handle, status);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(JottaError::Timeout(format!(
                "transcript {} not ready after {:?}",
                handle, policy.max_wait
            )));
        }

        let wait = policy.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(JottaError::Cancelled(format!("transcript {} abandoned", handle)));
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTranscriber;

    fn policy(interval_ms: u64, max_wait_ms: u64) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(interval_ms),
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed() {
        let service = ScriptedTranscriber::new(vec![vec![
            TranscriptStatus::Queued,
            TranscriptStatus::Processing,
            TranscriptStatus::Completed("hello world".to_string()),
        ]]);
        let handle = TranscriptHandle("t1".into());

        let text = wait_for_transcript(&service, &handle, policy(5000, 60_000), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "hello world");
        assert_eq!(service.poll_count(), 3);
        assert_eq!(service.cancel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_is_stage_failure() {
        let service = ScriptedTranscriber::new(vec![vec![TranscriptStatus::Failed(
            "audio too short".to_string(),
        )]]);
        let handle = TranscriptHandle("t1".into());

        let err = wait_for_transcript(&service, &handle, policy(10, 1000), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JottaError::TranscriptionFailed(ref r) if r == "audio too short"));
        assert_eq!(service.cancel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_ceiling_and_cancels_remote() {
        let service = ScriptedTranscriber::never_finishes();
        let handle = TranscriptHandle("t1".into());

        let err = wait_for_transcript(&service, &handle, policy(5000, 20_000), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JottaError::Timeout(_)));
        // polls at 0s, 5s, 10s, 15s, 20s
        assert_eq!(service.poll_count(), 5);
        assert_eq!(service.cancel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let service = ScriptedTranscriber::never_finishes();
        let handle = TranscriptHandle("t1".into());
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let err = wait_for_transcript(&service, &handle, policy(5000, 3_600_000), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, JottaError::Cancelled(_)));
        assert_eq!(service.cancel_count(), 1);
    }
}
