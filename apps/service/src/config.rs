use std::{env, fmt, fs, io, path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid value for {name}: {value:?}")]
    InvalidOverride { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: Log,
    pub database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
    pub probe: ProbeSettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    /// Default level directive, overridden by `RUST_LOG`
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of checks allowed to run at the same time
    pub workers: usize,
    /// How late a tick may start before it is dropped as missed
    pub misfire_grace_seconds: u64,
    /// How long shutdown waits for in-flight checks
    pub shutdown_grace_seconds: u64,
}

/// Which probe every monitor in this deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStrategy {
    Http,
    Reachability,
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStrategy::Http => write!(f, "http"),
            ProbeStrategy::Reachability => write!(f, "reachability"),
        }
    }
}

impl FromStr for ProbeStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(ProbeStrategy::Http),
            "reachability" | "ping" | "icmp" => Ok(ProbeStrategy::Reachability),
            other => Err(format!("unknown probe strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub strategy: ProbeStrategy,
    pub user_agent: String,
    pub max_redirects: usize,
    /// Program used by the reachability probe
    pub ping_program: String,
    /// Arguments for `ping_program`; `{host}` and `{timeout}` are substituted
    pub ping_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub telegram_bot_token: Option<String>,
    pub telegram_default_chat_id: Option<String>,
    pub telegram_api_base: String,
    pub webhooks_enabled: bool,
    pub request_timeout_seconds: u64,
    /// Email is sent only when a relay host is set
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub email_from: String,
    /// Receives email for owners without email preferences of their own
    pub email_fallback_recipient: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: "pulsewatch.db".into(), max_connections: 8 }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { workers: 4, misfire_grace_seconds: 15, shutdown_grace_seconds: 10 }
    }
}

impl SchedulerSettings {
    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            strategy: ProbeStrategy::Http,
            user_agent: concat!("PulseWatch/", env!("CARGO_PKG_VERSION")).into(),
            max_redirects: 10,
            ping_program: "ping".into(),
            ping_args: ["-c", "1", "-W", "{timeout}", "{host}"].map(String::from).to_vec(),
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_default_chat_id: None,
            telegram_api_base: "https://api.telegram.org".into(),
            webhooks_enabled: true,
            request_timeout_seconds: 10,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            email_from: "PulseWatch <pulsewatch@localhost>".into(),
            email_fallback_recipient: None,
        }
    }
}

impl NotificationSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulsewatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home_dir) = env::var("HOME") {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulsewatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let secret = |value: &Option<String>| if value.is_some() { "<set>" } else { "<unset>" };

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Log")?;
        write_1(f, "Level", &self.log.level)?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Workers", &self.scheduler.workers)?;
        write_1(f, "Misfire Grace (s)", &self.scheduler.misfire_grace_seconds)?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Strategy", &self.probe.strategy)?;
        write_1(f, "User Agent", &self.probe.user_agent)?;
        write_1(f, "Max Redirects", &self.probe.max_redirects)?;
        write_1(f, "Ping Command", &format!("{} {}", self.probe.ping_program, self.probe.ping_args.join(" ")))?;
        write_title_1(f, "Notifications")?;
        write_1(f, "Telegram Token", &secret(&self.notifications.telegram_bot_token))?;
        write_1(
            f,
            "Telegram Default Chat",
            &self.notifications.telegram_default_chat_id.as_deref().unwrap_or("<unset>"),
        )?;
        write_1(f, "Webhooks", &self.notifications.webhooks_enabled)?;
        write_1(f, "Request Timeout (s)", &self.notifications.request_timeout_seconds)?;
        write_1(
            f,
            "SMTP Relay",
            &match &self.notifications.smtp_host {
                Some(host) => format!("{host}:{}", self.notifications.smtp_port),
                None => "<unset>".into(),
            },
        )?;
        write_1(f, "SMTP Password", &secret(&self.notifications.smtp_password))?;
        write_1(f, "Email From", &self.notifications.email_from)?;
        write_1(
            f,
            "Email Fallback",
            &self.notifications.email_fallback_recipient.as_deref().unwrap_or("<unset>"),
        )?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pulsewatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// let cfg = pulsewatch::config::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), pulsewatch::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Load the file and apply environment overrides on top of it
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(path) = lookup("PULSEWATCH_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(value) = lookup("PULSEWATCH_PROBE_STRATEGY") {
            self.probe.strategy = value
                .parse()
                .map_err(|_| Error::InvalidOverride { name: "PULSEWATCH_PROBE_STRATEGY", value })?;
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.notifications.telegram_bot_token = Some(token);
        }
        if let Some(chat_id) = lookup("TELEGRAM_DEFAULT_CHAT_ID").filter(|c| !c.trim().is_empty()) {
            self.notifications.telegram_default_chat_id = Some(chat_id);
        }
        if let Some(host) = lookup("SMTP_HOST").filter(|h| !h.trim().is_empty()) {
            self.notifications.smtp_host = Some(host);
        }
        if let Some(username) = lookup("SMTP_USERNAME").filter(|u| !u.trim().is_empty()) {
            self.notifications.smtp_username = Some(username);
        }
        if let Some(password) = lookup("SMTP_PASSWORD").filter(|p| !p.is_empty()) {
            self.notifications.smtp_password = Some(password);
        }
        Ok(())
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");

        let created = Config::from_config(Some(&path)).unwrap();
        assert!(dir.path().join("config.toml").exists());

        let reloaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(created, reloaded);
        assert_eq!(reloaded.scheduler.workers, 4);
        assert_eq!(reloaded.scheduler.misfire_grace_seconds, 15);
        assert_eq!(reloaded.probe.strategy, ProbeStrategy::Http);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[probe]\nstrategy = \"reachability\"\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.probe.strategy, ProbeStrategy::Reachability);
        assert_eq!(config.probe.ping_program, "ping");
        assert_eq!(config.database.path, "pulsewatch.db");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PULSEWATCH_DATABASE_PATH", "/tmp/pw.db"),
            ("PULSEWATCH_PROBE_STRATEGY", "ping"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_DEFAULT_CHAT_ID", ""),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PASSWORD", "hunter2"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.database.path, "/tmp/pw.db");
        assert_eq!(config.probe.strategy, ProbeStrategy::Reachability);
        assert_eq!(config.notifications.telegram_bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.notifications.telegram_default_chat_id, None);
        assert_eq!(config.notifications.smtp_host.as_deref(), Some("smtp.example.com"));
        assert_eq!(config.notifications.smtp_password.as_deref(), Some("hunter2"));
        assert_eq!(config.notifications.smtp_username, None);
    }

    #[test]
    fn test_invalid_strategy_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "PULSEWATCH_PROBE_STRATEGY").then(|| "carrier-pigeon".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidOverride { .. })));
    }

    #[test]
    fn test_display_hides_token() {
        let mut config = Config::default();
        config.notifications.telegram_bot_token = Some("secret-token".into());
        config.notifications.smtp_password = Some("smtp-secret".into());
        let rendered = config.to_string();
        assert!(rendered.contains("Telegram Token: <set>"));
        assert!(rendered.contains("SMTP Password: <set>"));
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("smtp-secret"));
    }
}
