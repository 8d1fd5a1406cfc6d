//! Credentials accepted from proxied clients.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// A username the agent accepts from clients, with exactly one secret source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredential {
    pub username: String,

    /// Clear-text password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// MySQL-style stored hash: `*` followed by the uppercase hex of
    /// SHA1(SHA1(password)), as found in `mysql.user.authentication_string`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// The resolved secret for a client credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSecret {
    Password(String),
    /// SHA1(SHA1(password)).
    NativeHash([u8; 20]),
}

impl ClientCredential {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_empty() {
            return Err(ConfigError::Config("username must not be empty".to_string()));
        }

        let sources = [
            self.password.is_some(),
            self.password_env.is_some(),
            self.password_hash.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if sources != 1 {
            return Err(ConfigError::Config(format!(
                "user '{}' must set exactly one of password, password_env or password_hash",
                self.username
            )));
        }

        if let Some(hash) = &self.password_hash {
            parse_native_hash(hash)?;
        }
        Ok(())
    }

    /// Resolve the configured secret.
    pub fn secret(&self) -> Result<ClientSecret, ConfigError> {
        if let Some(hash) = &self.password_hash {
            return parse_native_hash(hash).map(ClientSecret::NativeHash);
        }
        if let Some(env_var) = &self.password_env {
            return std::env::var(env_var)
                .map(ClientSecret::Password)
                .map_err(|_| {
                    ConfigError::Config(format!(
                        "password variable '{env_var}' for user '{}' is not set",
                        self.username
                    ))
                });
        }
        Ok(ClientSecret::Password(
            self.password.clone().unwrap_or_default(),
        ))
    }
}

fn parse_native_hash(hash: &str) -> Result<[u8; 20], ConfigError> {
    let digits = hash
        .strip_prefix('*')
        .ok_or_else(|| ConfigError::Config("password_hash must start with '*'".to_string()))?;

    let mut out = [0u8; 20];
    hex::decode_to_slice(digits, &mut out).map_err(|_| {
        ConfigError::Config("password_hash must be '*' followed by 40 hex digits".to_string())
    })?;
    Ok(out)
}
