use anyhow::{Result, anyhow};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{Instant, timeout};
use url::Url;

use super::types::{CheckOutcome, elapsed_ms};
use crate::config::{ProbeSettings, ProbeStrategy};

/// Checker trait for the probe strategies a deployment can select
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Probe `target` once, never taking longer than `budget`.
    ///
    /// Failures are reported in the outcome, not as errors.
    async fn check(&self, target: &str, budget: Duration) -> CheckOutcome;
}

/// Build the checker configured for this deployment
pub fn checker_for(settings: &ProbeSettings) -> Result<Arc<dyn Checker>> {
    let checker: Arc<dyn Checker> = match settings.strategy {
        ProbeStrategy::Http => Arc::new(HttpChecker::new(settings)?),
        ProbeStrategy::Reachability => Arc::new(ReachabilityChecker::new(settings)),
    };
    Ok(checker)
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(settings: &ProbeSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, target: &str, budget: Duration) -> CheckOutcome {
        let start = Instant::now();

        let url = match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => url,
            Ok(url) => {
                return CheckOutcome::failure(
                    format!("Invalid target URL: unsupported scheme or missing host ({})", url.scheme()),
                    Some(elapsed_ms(start)),
                );
            }
            Err(e) => {
                return CheckOutcome::failure(format!("Invalid target URL: {e}"), Some(elapsed_ms(start)));
            }
        };

        match self.client.get(url).timeout(budget).send().await {
            Ok(response) => {
                let latency = elapsed_ms(start);
                let status = response.status();
                if status.is_success() {
                    CheckOutcome::success(latency, Some(status.as_u16()))
                } else {
                    CheckOutcome::failed_status(status.as_u16(), latency)
                }
            }
            Err(e) if e.is_timeout() => CheckOutcome::timed_out(budget, start),
            Err(e) => CheckOutcome::failure(describe_request_error(&e), Some(elapsed_ms(start))),
        }
    }
}

fn describe_request_error(error: &reqwest::Error) -> String {
    // The innermost source carries the useful part (DNS failure, refused, TLS).
    let mut root: &dyn std::error::Error = error;
    while let Some(source) = root.source() {
        root = source;
    }
    let kind = if error.is_connect() {
        "Connection failed"
    } else if error.is_redirect() {
        "Too many redirects"
    } else if error.is_request() {
        "Request failed"
    } else {
        "HTTP error"
    };
    if root.to_string() == error.to_string() {
        format!("{kind}: {error}")
    } else {
        format!("{kind}: {root}")
    }
}

/// Host reachability checker driving the system `ping` (or a configured replacement)
pub struct ReachabilityChecker {
    program: String,
    args: Vec<String>,
}

impl ReachabilityChecker {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self { program: settings.ping_program.clone(), args: settings.ping_args.clone() }
    }

    fn command_args(&self, host: &str, budget: Duration) -> Vec<String> {
        // ping's -W takes whole seconds
        let seconds = budget.as_secs_f64().ceil().max(1.0) as u64;
        self.args
            .iter()
            .map(|arg| arg.replace("{host}", host).replace("{timeout}", &seconds.to_string()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Checker for ReachabilityChecker {
    async fn check(&self, target: &str, budget: Duration) -> CheckOutcome {
        let start = Instant::now();

        let host = match extract_host(target) {
            Ok(host) => host,
            Err(e) => return CheckOutcome::failure(e.to_string(), Some(elapsed_ms(start))),
        };

        let child = Command::new(&self.program)
            .args(self.command_args(&host, budget))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return CheckOutcome::failure(
                    format!("Failed to run {}: {e}", self.program),
                    Some(elapsed_ms(start)),
                );
            }
        };

        // Dropping the future on timeout kills the child.
        let output = match timeout(budget, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CheckOutcome::failure(format!("Ping failed: {e}"), Some(elapsed_ms(start)));
            }
            Err(_) => return CheckOutcome::timed_out(budget, start),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            let latency = parse_ping_latency(&stdout).unwrap_or_else(|| elapsed_ms(start));
            CheckOutcome::success(latency, None)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = last_line(&stderr).or_else(|| last_line(&stdout));
            let message = match (output.status.code(), detail) {
                (_, Some(detail)) => format!("Host {host} unreachable: {detail}"),
                (Some(code), None) => format!("Host {host} unreachable (exit code {code})"),
                (None, None) => format!("Host {host} unreachable"),
            };
            CheckOutcome::failure(message, Some(elapsed_ms(start)))
        }
    }
}

/// Pull the host out of a URL, `host:port` or bare host target
pub fn extract_host(target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(anyhow!("Target is empty"));
    }

    if target.contains("://") {
        let url = Url::parse(target).map_err(|e| anyhow!("Invalid target URL: {}", e))?;
        let host = url.host_str().ok_or_else(|| anyhow!("Target URL has no host"))?;
        return Ok(host.trim_start_matches('[').trim_end_matches(']').to_string());
    }

    // Bracketed IPv6 with an optional port: [::1]:443
    if let Some(rest) = target.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| anyhow!("Unterminated IPv6 literal"))?;
        return Ok(rest[..end].to_string());
    }

    // Plain IPv6 literals contain several colons and carry no port.
    let host = match target.matches(':').count() {
        1 => target.split(':').next().unwrap_or_default(),
        _ => target,
    };
    let host = host.split('/').next().unwrap_or_default();

    if host.is_empty() || host.chars().any(|c| c.is_whitespace()) {
        return Err(anyhow!("Invalid host: {}", target));
    }
    Ok(host.to_string())
}

/// Extract the round-trip time from ping output (`time=12.3 ms`, `time<1 ms`)
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let start = line.find("time=").map(|i| i + 5).or_else(|| line.find("time<").map(|i| i + 5))?;
        let number: String = line[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        number.parse().ok()
    })
}

fn last_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).filter(|line| !line.is_empty()).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings_with_command(program: &str, args: &[&str]) -> ProbeSettings {
        ProbeSettings {
            strategy: ProbeStrategy::Reachability,
            ping_program: program.to_string(),
            ping_args: args.iter().map(|a| a.to_string()).collect(),
            ..ProbeSettings::default()
        }
    }

    /// Minimal HTTP server answering `/` with `status` and `/moved` with a redirect to `/`
    async fn serve(status: u16) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let response = if request.starts_with("GET /moved ") {
                        "HTTP/1.1 302 Found\r\nLocation: /\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    } else {
                        format!("HTTP/1.1 {status} Test\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_http_check_success() {
        let base = serve(200).await;
        let checker = HttpChecker::new(&ProbeSettings::default()).unwrap();

        let outcome = checker.check(&base, Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.latency_ms.is_some());
        assert!(outcome.message.is_empty());
    }

    #[tokio::test]
    async fn test_http_check_non_2xx() {
        let base = serve(503).await;
        let checker = HttpChecker::new(&ProbeSettings::default()).unwrap();

        let outcome = checker.check(&base, Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert_eq!(outcome.message, "Status 503");
    }

    #[tokio::test]
    async fn test_http_check_follows_redirects() {
        let base = serve(200).await;
        let checker = HttpChecker::new(&ProbeSettings::default()).unwrap();

        let outcome = checker.check(&format!("{base}/moved"), Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_http_check_connection_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let checker = HttpChecker::new(&ProbeSettings::default()).unwrap();
        let outcome = checker.check(&format!("http://{addr}"), Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, None);
        assert!(outcome.latency_ms.is_some());
        assert!(!outcome.message.is_empty());
    }

    #[tokio::test]
    async fn test_http_check_invalid_target() {
        let checker = HttpChecker::new(&ProbeSettings::default()).unwrap();

        let outcome = checker.check("not a url", Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Invalid target URL"));

        let outcome = checker.check("ftp://example.com", Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Invalid target URL"));
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("example.com").unwrap(), "example.com");
        assert_eq!(extract_host(" example.com:8080 ").unwrap(), "example.com");
        assert_eq!(extract_host("https://example.com/health").unwrap(), "example.com");
        assert_eq!(extract_host("10.0.0.1").unwrap(), "10.0.0.1");
        assert_eq!(extract_host("[::1]:443").unwrap(), "::1");
        assert_eq!(extract_host("2001:db8::1").unwrap(), "2001:db8::1");
        assert_eq!(extract_host("http://[::1]:8080/").unwrap(), "::1");

        assert!(extract_host("").is_err());
        assert!(extract_host("exa mple.com").is_err());
        assert!(extract_host("http://").is_err());
    }

    #[test]
    fn test_parse_ping_latency() {
        let linux = "PING example.com (93.184.216.34) 56(84) bytes of data.\n\
                     64 bytes from 93.184.216.34: icmp_seq=1 ttl=56 time=11.7 ms\n";
        assert_eq!(parse_ping_latency(linux), Some(11.7));
        assert_eq!(parse_ping_latency("reply from 10.0.0.1: time<1 ms"), Some(1.0));
        assert_eq!(parse_ping_latency("1 packets transmitted, 0 received"), None);
    }

    #[test]
    fn test_command_args_substitution() {
        let checker = ReachabilityChecker::new(&ProbeSettings::default());
        let args = checker.command_args("example.com", Duration::from_millis(2500));
        assert_eq!(args, vec!["-c", "1", "-W", "3", "example.com"]);
    }

    #[tokio::test]
    async fn test_reachability_success_uses_reported_latency() {
        let settings =
            settings_with_command("echo", &["64 bytes from {host}: icmp_seq=1 ttl=57 time=12.3 ms"]);
        let checker = ReachabilityChecker::new(&settings);

        let outcome = checker.check("example.com", Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert_eq!(outcome.latency_ms, Some(12.3));
        assert_eq!(outcome.status_code, None);
    }

    #[tokio::test]
    async fn test_reachability_non_zero_exit() {
        let settings = settings_with_command("false", &[]);
        let checker = ReachabilityChecker::new(&settings);

        let outcome = checker.check("example.com", Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("unreachable"));
        assert!(outcome.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_reachability_timeout_reports_elapsed() {
        let settings = settings_with_command("sleep", &["30"]);
        let checker = ReachabilityChecker::new(&settings);

        let started = Instant::now();
        let outcome = checker.check("example.com", Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!outcome.success);
        assert!(outcome.message.contains("Timed out"));
        let latency = outcome.latency_ms.unwrap();
        assert!(latency >= 300.0, "latency was {latency}");
    }

    #[tokio::test]
    async fn test_reachability_missing_program() {
        let settings = settings_with_command("pulsewatch-no-such-ping", &["{host}"]);
        let checker = ReachabilityChecker::new(&settings);

        let outcome = checker.check("example.com", Duration::from_secs(1)).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Failed to run"));
    }
}
