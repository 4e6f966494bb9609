//! Validation of monitor definitions before they are stored.
//!
//! Intervals below the floor are not errors; they are clamped at write time.

use anyhow::{Result, anyhow};
use url::Url;

use super::checker::extract_host;
use crate::config::ProbeStrategy;

pub const MAX_NAME_CHARS: usize = 120;
pub const MAX_TARGET_CHARS: usize = 500;

/// Validates a monitor target for the active probe strategy
pub fn validate_monitor_target(target: &str, strategy: ProbeStrategy) -> Result<()> {
    let target = target.trim();
    if target.is_empty() {
        return Err(anyhow!("Target is required"));
    }
    if target.chars().count() > MAX_TARGET_CHARS {
        return Err(anyhow!("Target is longer than {} characters", MAX_TARGET_CHARS));
    }

    match strategy {
        ProbeStrategy::Http => validate_http_target(target),
        ProbeStrategy::Reachability => validate_reachability_target(target),
    }
}

/// Validate HTTP/HTTPS target
fn validate_http_target(target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for HTTP monitor: {}", other)),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(anyhow!("URL has no host: {}", target));
    }

    if let Some(port) = url.port() {
        validate_port(port)?;
    }

    Ok(())
}

/// Validate a reachability target: hostname, IP, `host:port` or URL
fn validate_reachability_target(target: &str) -> Result<()> {
    if target.chars().any(char::is_whitespace) {
        return Err(anyhow!("Target must not contain whitespace"));
    }

    let host = extract_host(target)?;
    if host.starts_with('-') {
        return Err(anyhow!("Invalid host: {}", host));
    }

    Ok(())
}

/// Validate port is in valid range
fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(anyhow!("Port 0 is not valid"));
    }
    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Name is required"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(anyhow!("Name is longer than {} characters", MAX_NAME_CHARS));
    }
    Ok(())
}

/// Reject absurdly long check intervals; short ones are clamped instead
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    const MAX_INTERVAL: u64 = 86400; // 24 hours

    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL
        ));
    }

    Ok(())
}

/// Validate timeout is reasonable
pub fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    const MIN_TIMEOUT: u64 = 1;
    const MAX_TIMEOUT: u64 = 300; // 5 minutes

    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "Timeout too short: {} seconds (minimum: {})",
            timeout_seconds,
            MIN_TIMEOUT
        ));
    }

    if timeout_seconds > MAX_TIMEOUT {
        return Err(anyhow!(
            "Timeout too long: {} seconds (maximum: {})",
            timeout_seconds,
            MAX_TIMEOUT
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_http_target() {
        assert!(validate_monitor_target("https://example.com", ProbeStrategy::Http).is_ok());
        assert!(validate_monitor_target("http://example.com:8080/health", ProbeStrategy::Http).is_ok());
        assert!(validate_monitor_target("  https://example.com  ", ProbeStrategy::Http).is_ok());

        assert!(validate_monitor_target("ftp://example.com", ProbeStrategy::Http).is_err());
        assert!(validate_monitor_target("example.com", ProbeStrategy::Http).is_err());
        assert!(validate_monitor_target("http://example.com:0", ProbeStrategy::Http).is_err());
        assert!(validate_monitor_target("   ", ProbeStrategy::Http).is_err());
    }

    #[test]
    fn test_validate_reachability_target() {
        for target in ["example.com", "10.0.0.1", "example.com:443", "https://example.com/x", "[::1]:80"] {
            assert!(
                validate_monitor_target(target, ProbeStrategy::Reachability).is_ok(),
                "{target} should be accepted"
            );
        }

        assert!(validate_monitor_target("exa mple.com", ProbeStrategy::Reachability).is_err());
        assert!(validate_monitor_target("-c1", ProbeStrategy::Reachability).is_err());
    }

    #[test]
    fn test_target_length_limit() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_TARGET_CHARS));
        assert!(validate_monitor_target(&long, ProbeStrategy::Http).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("API").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name(&"n".repeat(MAX_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn test_validate_timeout() {
        assert!(validate_timeout(1).is_ok());
        assert!(validate_timeout(300).is_ok());
        assert!(validate_timeout(0).is_err());
        assert!(validate_timeout(301).is_err());
    }

    #[test]
    fn test_validate_check_interval() {
        assert!(validate_check_interval(5).is_ok());
        assert!(validate_check_interval(86400).is_ok());
        assert!(validate_check_interval(100000).is_err());
    }
}
