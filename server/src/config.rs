use crate::protocol::GameRules;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_level: String,
    pub max_connections: usize,
    /// Largest accepted text frame; bigger frames close the connection
    pub max_message_bytes: usize,
    /// Consecutive unparseable messages before the connection is closed
    pub max_parse_errors: u32,
    /// Inbound messages per second per connection before it is closed
    pub max_messages_per_sec: u32,
    /// Reject throws inside `rules.throw_cooldown_secs` on the relay side.
    /// Off by default: the cooldown is a client-side timer.
    pub enforce_throw_cooldown: bool,
    /// Allowed `Origin` header values. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub command_capacity: usize,
    pub broadcast_capacity: usize,
    pub stats_interval: Duration,
    pub rules: GameRules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            log_level: "info".to_string(),
            max_connections: 256,
            max_message_bytes: 1024,
            max_parse_errors: 5,
            max_messages_per_sec: 60,
            enforce_throw_cooldown: false,
            allowed_origins: vec![],
            command_capacity: 1024,
            broadcast_capacity: 1024,
            stats_interval: Duration::from_secs(30),
            rules: GameRules::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidVar { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ServerConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // PORT wins over LISTEN_ADDR for hosts that only hand out a port
        if let Some(port) = parse_var::<u16, _>(&lookup, "PORT")? {
            config.listen_addr = format!("0.0.0.0:{}", port);
        } else if let Some(addr) = lookup("LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(v) = parse_var(&lookup, "MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_MESSAGE_BYTES")? {
            config.max_message_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_PARSE_ERRORS")? {
            config.max_parse_errors = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_MESSAGES_PER_SEC")? {
            config.max_messages_per_sec = v;
        }
        if let Some(v) = parse_var(&lookup, "ENFORCE_THROW_COOLDOWN")? {
            config.enforce_throw_cooldown = v;
        }
        if let Some(v) = parse_var(&lookup, "THROW_COOLDOWN_SECS")? {
            config.rules.throw_cooldown_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_THROW_SPEED")? {
            config.rules.max_throw_speed = v;
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.max_message_bytes == 0 {
            return Err("max_message_bytes must be > 0".to_string());
        }
        if self.max_parse_errors == 0 {
            return Err("max_parse_errors must be > 0".to_string());
        }
        if self.max_messages_per_sec == 0 {
            return Err("max_messages_per_sec must be > 0".to_string());
        }
        if self.command_capacity == 0 || self.broadcast_capacity == 0 {
            return Err("channel capacities must be > 0".to_string());
        }
        if self.stats_interval.is_zero() {
            return Err("stats_interval must be > 0".to_string());
        }
        self.rules.validate()
    }

    /// Relay-side throw cooldown, if enforced.
    pub fn throw_cooldown(&self) -> Option<Duration> {
        if !self.enforce_throw_cooldown {
            return None;
        }
        Duration::try_from_secs_f64(self.rules.throw_cooldown_secs).ok()
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
        assert!(ServerConfig::default().throw_cooldown().is_none());
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.max_connections, 256);
    }

    #[test]
    fn port_overrides_listen_addr() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PORT", "8080"),
            ("LISTEN_ADDR", "127.0.0.1:1"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("LISTEN_ADDR", "127.0.0.1:4000"),
            ("MAX_CONNECTIONS", "8"),
            ("ENFORCE_THROW_COOLDOWN", "true"),
            ("THROW_COOLDOWN_SECS", "2.5"),
            ("ALLOWED_ORIGINS", "http://localhost:5173, https://example.org ,"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.throw_cooldown(), Some(Duration::from_millis(2500)));
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:5173", "https://example.org"]
        );
    }

    #[test]
    fn unparseable_var_is_an_error() {
        let err = ServerConfig::from_lookup(lookup_from(&[("MAX_CONNECTIONS", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                var: "MAX_CONNECTIONS",
                ..
            }
        ));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = ServerConfig::from_lookup(lookup_from(&[("MAX_THROW_SPEED", "-3")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = ServerConfig {
            max_parse_errors: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_cooldown_rejected_at_load() {
        let err = ServerConfig::from_lookup(lookup_from(&[
            ("ENFORCE_THROW_COOLDOWN", "true"),
            ("THROW_COOLDOWN_SECS", "1e30"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn throw_cooldown_never_panics_on_unvalidated_rules() {
        let mut config = ServerConfig {
            enforce_throw_cooldown: true,
            ..Default::default()
        };
        config.rules.throw_cooldown_secs = 1e30;
        assert!(config.throw_cooldown().is_none());
        config.rules.throw_cooldown_secs = f64::NAN;
        assert!(config.throw_cooldown().is_none());
    }
}
