//! Node configuration.
//!
//! A plain `serde`-derived struct with one default function per field
//! and a matching `Default` impl. It has no notion of a default
//! filesystem path or environment override — loading from a specific
//! TOML file or string is the whole surface; where to find that file
//! is a process-lifecycle concern.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// All tunables the core recognizes, with sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwimConfig {
    /// Emit structured diagnostic events to the tap sink.
    #[serde(default = "default_enable_diag_tap")]
    pub enable_diag_tap: bool,
    /// Hard size limit for outgoing frames.
    #[serde(default = "default_max_udp_size")]
    pub max_udp_size: usize,
    /// Skip the size check at send time.
    #[serde(default)]
    pub ignore_max_udp_size: bool,
    /// Max bytes of per-node opaque payload.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Neighbours per AntiEntropy event.
    #[serde(default = "default_max_anti_entropy_items")]
    pub max_anti_entropy_items: usize,
    /// Direct ping attempts before suspect.
    #[serde(default = "default_max_ping_without_ack_before_suspect")]
    pub max_ping_without_ack_before_suspect: u32,
    /// Total attempts before dead.
    #[serde(default = "default_max_ping_without_ack_before_dead")]
    pub max_ping_without_ack_before_dead: u32,
    /// Heartbeat period, milliseconds.
    #[serde(default = "default_ping_heartbeat_ms")]
    pub ping_heartbeat_ms: u64,
    /// Ack wait per attempt, milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Join confirmation wait, milliseconds.
    #[serde(default = "default_max_join_time_ms")]
    pub max_join_time_ms: u64,
    /// Auto-rejoin when declared dead.
    #[serde(default = "default_rejoin_if_dead")]
    pub rejoin_if_dead: bool,
    /// Max rejoin tries.
    #[serde(default = "default_rejoin_max_attempts")]
    pub rejoin_max_attempts: u32,
}

fn default_enable_diag_tap() -> bool {
    true
}

fn default_max_udp_size() -> usize {
    1432
}

fn default_max_payload_size() -> usize {
    256
}

fn default_max_anti_entropy_items() -> usize {
    2
}

fn default_max_ping_without_ack_before_suspect() -> u32 {
    2
}

fn default_max_ping_without_ack_before_dead() -> u32 {
    4
}

fn default_ping_heartbeat_ms() -> u64 {
    1000
}

fn default_ack_timeout_ms() -> u64 {
    200
}

fn default_max_join_time_ms() -> u64 {
    500
}

fn default_rejoin_if_dead() -> bool {
    true
}

fn default_rejoin_max_attempts() -> u32 {
    10
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            enable_diag_tap: default_enable_diag_tap(),
            max_udp_size: default_max_udp_size(),
            ignore_max_udp_size: false,
            max_payload_size: default_max_payload_size(),
            max_anti_entropy_items: default_max_anti_entropy_items(),
            max_ping_without_ack_before_suspect: default_max_ping_without_ack_before_suspect(),
            max_ping_without_ack_before_dead: default_max_ping_without_ack_before_dead(),
            ping_heartbeat_ms: default_ping_heartbeat_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_join_time_ms: default_max_join_time_ms(),
            rejoin_if_dead: default_rejoin_if_dead(),
            rejoin_max_attempts: default_rejoin_max_attempts(),
        }
    }
}

impl SwimConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CoreError::Validation(format!("invalid config: {e}")))
    }

    /// Serialize configuration to a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| CoreError::Validation(format!("config serialize: {e}")))
    }
}
