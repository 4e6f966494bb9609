use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Longest diagnostic message kept on a check outcome.
pub const MAX_MESSAGE_CHARS: usize = 255;

/// Result of a single probe against a monitor target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Whether the target was considered up
    pub success: bool,

    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,

    /// Time spent on the probe in milliseconds, including failed attempts
    pub latency_ms: Option<f64>,

    /// Short diagnostic, empty for a plain success
    pub message: String,
}

impl CheckOutcome {
    /// Mark the check as successful
    pub fn success(latency_ms: f64, status_code: Option<u16>) -> Self {
        Self { success: true, status_code, latency_ms: Some(latency_ms), message: String::new() }
    }

    /// Mark the check as failed; the message is truncated to the stored length
    pub fn failure(message: impl Into<String>, latency_ms: Option<f64>) -> Self {
        Self {
            success: false,
            status_code: None,
            latency_ms,
            message: truncate_message(message.into()),
        }
    }

    /// Failed check that still received a status (e.g. non-2xx HTTP response)
    pub fn failed_status(status_code: u16, latency_ms: f64) -> Self {
        Self {
            success: false,
            status_code: Some(status_code),
            latency_ms: Some(latency_ms),
            message: format!("Status {status_code}"),
        }
    }

    /// Failure caused by the probe exceeding its budget
    pub fn timed_out(timeout: Duration, started: Instant) -> Self {
        Self::failure(
            format!("Timed out after {}", format_timeout(timeout)),
            Some(elapsed_ms(started)),
        )
    }
}

/// Milliseconds elapsed since `started`, with sub-millisecond precision
pub fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Cut a message down to [`MAX_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: String) -> String {
    match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((byte_index, _)) => message[..byte_index].to_string(),
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_status_message() {
        let outcome = CheckOutcome::failed_status(503, 12.5);
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert_eq!(outcome.message, "Status 503");
    }

    #[test]
    fn test_message_truncated_on_char_boundary() {
        let long = "é".repeat(400);
        let outcome = CheckOutcome::failure(long, None);
        assert_eq!(outcome.message.chars().count(), MAX_MESSAGE_CHARS);

        let short = CheckOutcome::failure("connection refused", Some(3.0));
        assert_eq!(short.message, "connection refused");
    }

    #[test]
    fn test_timed_out_keeps_latency() {
        let outcome = CheckOutcome::timed_out(Duration::from_secs(5), Instant::now());
        assert_eq!(outcome.message, "Timed out after 5s");
        assert!(outcome.latency_ms.is_some());
    }
}
