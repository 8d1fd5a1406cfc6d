//! Operational control endpoint configuration.

use serde::{Deserialize, Serialize};

/// Loopback HTTP endpoint used by operational tooling to moor, unmoor and
/// reload the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Whether the control endpoint is started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address the control endpoint binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_listen_addr() -> String {
    "127.0.0.1:3308".to_string()
}
