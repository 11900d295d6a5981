//! Engine configuration
//!
//! Timeouts, the INIT collision policy and the identity reported in INIT
//! responses are all configurable. [`EngineConfig`] can be built in code with
//! [`EngineConfig::builder`] or deserialized by the surrounding application
//! (durations are expressed in milliseconds).
//!
//! # Example
//!
//! ```
//! use softu2f_hid::{EngineConfig, InitCollisionPolicy};
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .message_timeout(Duration::from_millis(500))
//!     .init_collision(InitCollisionPolicy::RejectBusy)
//!     .lock_capability(false)
//!     .build();
//! assert_eq!(config.capabilities.flags(), 0x01);
//! ```

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// U2FHID interface version reported in INIT responses
pub const U2FHID_IF_VERSION: u8 = 2;
/// Capability flag: device implements WINK
pub const CAPFLAG_WINK: u8 = 0x01;
/// Capability flag: device implements LOCK
pub const CAPFLAG_LOCK: u8 = 0x02;

/// Message deadline from the U2FHID protocol
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(3);
/// Tighter message deadline expected by conformance test tools
pub const CONFORMANCE_MESSAGE_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause between run loop cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do with an INIT frame for a channel that already has a message in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitCollisionPolicy {
    /// Drop the in-flight message and start over with the new one
    #[default]
    Reset,
    /// Keep the in-flight message and answer the new INIT with `ERR_CHANNEL_BUSY`
    RejectBusy,
}

/// Capabilities advertised in INIT responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub wink: bool,
    pub lock: bool,
}

impl Capabilities {
    /// Capability byte as sent on the wire
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.wink {
            flags |= CAPFLAG_WINK;
        }
        if self.lock {
            flags |= CAPFLAG_LOCK;
        }
        flags
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            wink: true,
            lock: true,
        }
    }
}

/// Version numbers reported in INIT responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceVersion {
    pub interface: u8,
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

impl Default for DeviceVersion {
    fn default() -> Self {
        Self {
            interface: U2FHID_IF_VERSION,
            major: 0,
            minor: 0,
            build: 0,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a message may stay incomplete before `ERR_MSG_TIMEOUT`
    #[serde(rename = "message_timeout_ms", with = "millis")]
    pub message_timeout: Duration,

    /// Pause between run loop cycles
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Behaviour on a second INIT for a channel with a message in flight
    pub init_collision: InitCollisionPolicy,

    /// Capabilities advertised to clients
    pub capabilities: Capabilities,

    /// Version numbers advertised to clients
    pub version: DeviceVersion,

    /// First channel id handed out by the handshake
    pub first_channel_id: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            init_collision: InitCollisionPolicy::default(),
            capabilities: Capabilities::default(),
            version: DeviceVersion::default(),
            first_channel_id: 1,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for constructing configuration
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Defaults with the short message deadline used by conformance tools
    pub fn conformance() -> Self {
        Self {
            message_timeout: CONFORMANCE_MESSAGE_TIMEOUT,
            ..Self::default()
        }
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Set the incomplete-message deadline
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.config.message_timeout = timeout;
        self
    }

    /// Set the pause between run loop cycles
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the INIT collision policy
    pub fn init_collision(mut self, policy: InitCollisionPolicy) -> Self {
        self.config.init_collision = policy;
        self
    }

    /// Advertise (or not) WINK support
    pub fn wink_capability(mut self, enabled: bool) -> Self {
        self.config.capabilities.wink = enabled;
        self
    }

    /// Advertise (or not) LOCK support
    pub fn lock_capability(mut self, enabled: bool) -> Self {
        self.config.capabilities.lock = enabled;
        self
    }

    /// Set the version numbers reported to clients
    pub fn version(mut self, version: DeviceVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Set the first channel id handed out
    pub fn first_channel_id(mut self, cid: u32) -> Self {
        self.config.first_channel_id = cid;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
