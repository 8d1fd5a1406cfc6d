//! Backend MySQL server configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ConfigError;

/// Configuration for the connection to the real database server.
///
/// These credentials are held by the agent only. Clients authenticate against
/// [`ClientCredential`](super::ClientCredential) entries and never see them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Hostname of the backend MySQL server.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the backend MySQL server.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for the backend connection.
    #[serde(default = "default_username")]
    pub username: String,

    /// Password for the backend connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the backend password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Default database selected at connect time, unless the client names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Connect and authentication timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Transaction isolation level applied to every backend session.
    #[serde(default)]
    pub isolation_level: IsolationLevel,

    /// Extra statements run on each backend session after authentication.
    #[serde(default)]
    pub init_commands: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            password_env: None,
            database: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            isolation_level: IsolationLevel::default(),
            init_commands: Vec::new(),
        }
    }
}

impl BackendConfig {
    /// `host:port` string for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the backend password from the inline value or the environment.
    ///
    /// An empty password is returned when neither is configured.
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        if let Some(env_var) = &self.password_env {
            return std::env::var(env_var).map_err(|_| {
                ConfigError::Config(format!("backend password variable '{env_var}' is not set"))
            });
        }
        Ok(self.password.clone().unwrap_or_default())
    }

    /// Session initialization statements, isolation level first.
    pub fn session_init_statements(&self) -> Vec<String> {
        let mut statements = vec![format!(
            "SET SESSION TRANSACTION ISOLATION LEVEL {}",
            self.isolation_level
        )];
        statements.extend(self.init_commands.iter().cloned());
        statements
    }
}

/// Transaction isolation levels understood by MySQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            Self::ReadCommitted => write!(f, "READ COMMITTED"),
            Self::RepeatableRead => write!(f, "REPEATABLE READ"),
            Self::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = ConfigError;

    /// Accepts `READ COMMITTED`, `read-committed`, `READ_COMMITTED` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == '-' || c == '_' { ' ' } else { c.to_ascii_uppercase() })
            .collect();
        let words: Vec<&str> = normalized.split_whitespace().collect();
        match words.as_slice() {
            ["READ", "UNCOMMITTED"] => Ok(Self::ReadUncommitted),
            ["READ", "COMMITTED"] => Ok(Self::ReadCommitted),
            ["REPEATABLE", "READ"] => Ok(Self::RepeatableRead),
            ["SERIALIZABLE"] => Ok(Self::Serializable),
            _ => Err(ConfigError::Config(format!("unknown isolation level '{s}'"))),
        }
    }
}

impl TryFrom<String> for IsolationLevel {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IsolationLevel> for String {
    fn from(level: IsolationLevel) -> Self {
        level.to_string()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_username() -> String {
    "root".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_spellings() {
        assert_eq!(
            "read-committed".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "REPEATABLE_READ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            " serializable ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Serializable
        );
        assert!("snapshot".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_isolation_level_yaml() {
        let config: BackendConfig =
            serde_yaml::from_str("isolation_level: repeatable read\n").unwrap();
        assert_eq!(config.isolation_level, IsolationLevel::RepeatableRead);

        let bad = serde_yaml::from_str::<BackendConfig>("isolation_level: dirty\n");
        assert!(bad.is_err());
    }

    #[test]
    fn test_session_init_statements() {
        let config = BackendConfig {
            init_commands: vec!["SET NAMES utf8mb4".to_string()],
            ..Default::default()
        };
        assert_eq!(
            config.session_init_statements(),
            vec![
                "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string(),
                "SET NAMES utf8mb4".to_string(),
            ]
        );
    }

    #[test]
    fn test_resolve_password_from_env() {
        let config = BackendConfig {
            password_env: Some("YACHT_TEST_BACKEND_PASSWORD_UNSET".to_string()),
            ..Default::default()
        };
        assert!(config.resolve_password().is_err());

        let config = BackendConfig {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_password().unwrap(), "hunter2");
    }
}
