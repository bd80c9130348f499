//! Server configuration.
//!
//! Loaded from a TOML file at startup. Every field has a default, so the
//! relay runs without a file at all.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ServerError;

pub const CONFIG_ENV: &str = "KNOCKRELAY_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub knock: KnockConfig,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the three knock listeners bind to.
    pub bind: String,
    /// Address connected to, to decide whether a port is free.
    pub check_host: String,
    pub port_lower: u16,
    pub port_upper: u16,
    pub check_timeout_ms: u64,
    pub backlog: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            check_host: "127.0.0.1".into(),
            port_lower: 30000,
            port_upper: 60000,
            check_timeout_ms: 200,
            backlog: 8,
        }
    }
}

impl ListenConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnockConfig {
    /// Time allowed between the first and the third knock.
    pub window_secs: u64,
    /// How often stale knock records are swept. 0 disables the sweep.
    pub sweep_interval_secs: u64,
}

impl Default for KnockConfig {
    fn default() -> Self {
        Self {
            window_secs: 120,
            sweep_interval_secs: 60,
        }
    }
}

impl KnockConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_frame: usize,
    /// Reply `ERROR <reason>` to bad commands and `FAIL` to messages for
    /// unknown users instead of dropping them.
    pub reply_errors: bool,
    /// Tear a connection down when its read side hits EOF. When off, only
    /// LEAVE removes a connection.
    pub close_on_hangup: bool,
    /// Lines queued per connection before further deliveries to it fail.
    pub outbox_lines: usize,
    /// Initials used for the identity generated at startup.
    pub initials: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame: 8192,
            reply_errors: false,
            close_on_hangup: true,
            outbox_lines: 64,
            initials: "THSS".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace / debug / info / warn / error, or any EnvFilter directive.
    pub level: String,
    /// text or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Config {
    /// Loads the config at `path`, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ServerError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let cfg = Config::default();
        assert_eq!(cfg.knock.window(), Duration::from_secs(120));
        assert_eq!(cfg.listen.port_lower, 30000);
        assert_eq!(cfg.listen.port_upper, 60000);
        assert!(!cfg.protocol.reply_errors);
        assert!(cfg.protocol.close_on_hangup);
        assert_eq!(cfg.protocol.outbox_lines, 64);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [knock]
            window_secs = 5

            [protocol]
            reply_errors = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.knock.window(), Duration::from_secs(5));
        assert_eq!(cfg.knock.sweep_interval(), Some(Duration::from_secs(60)));
        assert!(cfg.protocol.reply_errors);
        assert_eq!(cfg.protocol.max_frame, 8192);
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn zero_sweep_interval_disables_sweep() {
        let cfg: Config = toml::from_str("[knock]\nsweep_interval_secs = 0\n").unwrap();
        assert_eq!(cfg.knock.sweep_interval(), None);
    }

    #[test]
    fn example_file_parses() {
        let cfg: Config = toml::from_str(include_str!("../knockrelay.example.toml")).unwrap();
        assert_eq!(cfg.listen.bind, "0.0.0.0");
        assert_eq!(cfg.knock.window_secs, 120);
        assert_eq!(cfg.protocol.initials, "THSS");
    }

    #[test]
    fn missing_path_is_default() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.protocol.initials, "THSS");
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ServerError::ConfigRead { .. }));
    }
}
