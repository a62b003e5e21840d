//! Receiver configuration
//!
//! The configuration is exposed to, not owned by, the core: the host layer
//! loads it (from its own preference store or a JSON file) and hands a
//! validated copy to the session.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RigError, RigResult};

/// Default streaming port
pub const DEFAULT_PORT: u16 = 14043;

/// Default tick rate (Hz)
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Maximum supported tick rate (Hz)
pub const MAX_TICK_RATE_HZ: u32 = 100;

/// What to do with a timestamp delta that is zero or negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaPolicy {
    /// Use the delta as-is; the time cursor may move backwards
    #[default]
    PassThrough,
    /// Negative deltas become zero
    ClampToZero,
    /// Frames with a negative delta are skipped as schema errors
    Reject,
}

impl DeltaPolicy {
    /// Apply the policy to a raw delta. `None` means the frame is rejected.
    pub fn apply(self, delta: i64) -> Option<i64> {
        match self {
            DeltaPolicy::PassThrough => Some(delta),
            DeltaPolicy::ClampToZero => Some(delta.max(0)),
            DeltaPolicy::Reject if delta < 0 => None,
            DeltaPolicy::Reject => Some(delta),
        }
    }
}

/// Receiver configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Interface to listen on
    pub bind_host: IpAddr,
    /// Well-known streaming port (1-65535)
    pub bind_port: u16,
    /// Tick rate in Hz (1-100)
    pub tick_rate_hz: u32,
    /// Apply bone-length rescaling
    pub enable_scale: bool,
    /// Reset skeletons to rest pose when the session stops
    pub reset_on_stop: bool,
    /// Maximum number of inbound messages buffered between ticks
    pub queue_capacity: usize,
    /// Index into a hand's `xyz` array supplying the root position
    pub root_position_index: usize,
    /// Multiplier from timestamp seconds to time-cursor ticks
    pub timestamp_scale: f64,
    pub delta_policy: DeltaPolicy,
    /// Delay before restoring the rest pose after stopping mid-recording
    pub restore_delay_ms: u64,
    /// Name of the full-body rig's root object in the host scene
    pub body_root: String,
    pub body_rig_resource: String,
    pub hand_rig_resource: String,
    pub left_hand_prefix: String,
    pub right_hand_prefix: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: DEFAULT_PORT,
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            enable_scale: false,
            reset_on_stop: true,
            queue_capacity: 4096,
            root_position_index: 0,
            timestamp_scale: 100.0,
            delta_policy: DeltaPolicy::PassThrough,
            restore_delay_ms: 250,
            body_root: "root".to_string(),
            body_rig_resource: "body".to_string(),
            hand_rig_resource: "hands".to_string(),
            left_hand_prefix: "left_".to_string(),
            right_hand_prefix: "right_".to_string(),
        }
    }
}

impl ReceiverConfig {
    /// Configuration for a loopback-only receiver
    pub fn loopback() -> Self {
        ReceiverConfig {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        }
    }

    /// Parse a JSON document and validate it
    pub fn from_json_str(s: &str) -> RigResult<Self> {
        let config: ReceiverConfig =
            serde_json::from_str(s).map_err(|e| RigError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> RigResult<()> {
        if self.bind_port == 0 {
            return Err(RigError::InvalidConfig(
                "bind_port must be in 1..=65535".into(),
            ));
        }
        if !(1..=MAX_TICK_RATE_HZ).contains(&self.tick_rate_hz) {
            return Err(RigError::InvalidConfig(format!(
                "tick_rate_hz must be in 1..={}, got {}",
                MAX_TICK_RATE_HZ, self.tick_rate_hz
            )));
        }
        if self.queue_capacity == 0 {
            return Err(RigError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if !(self.timestamp_scale.is_finite() && self.timestamp_scale > 0.0) {
            return Err(RigError::InvalidConfig(
                "timestamp_scale must be a positive number".into(),
            ));
        }
        if self.body_root.is_empty() {
            return Err(RigError::InvalidConfig("body_root must not be empty".into()));
        }
        Ok(())
    }

    /// Address the transport binds first
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.bind_port)
    }

    /// Interval between scheduler ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    /// Consecutive failing ticks before a non-fatal error becomes visible
    pub fn debounce_threshold(&self) -> u32 {
        self.tick_rate_hz
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }
}
