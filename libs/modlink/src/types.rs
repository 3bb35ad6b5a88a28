//! Session data types and configuration
//!
//! Register space tags, per-connection configuration, poll specifications
//! and the snapshot/history records handed to the embedding UI.

use chrono::{DateTime, Utc};
use errors::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Addressable register spaces a device exposes.
///
/// `Holding` and `Input` yield unsigned 16-bit register values,
/// `Coils` and `Discrete` yield bit values canonically reported as 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterSpace {
    Holding,
    Input,
    Coils,
    Discrete,
}

impl RegisterSpace {
    /// Write capability marker: only holding registers and coils accept writes
    pub fn writable(self) -> bool {
        matches!(self, RegisterSpace::Holding | RegisterSpace::Coils)
    }

    /// Bit-valued spaces (coil/discrete) vs register-valued spaces
    pub fn is_bit_space(self) -> bool {
        matches!(self, RegisterSpace::Coils | RegisterSpace::Discrete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegisterSpace::Holding => "holding",
            RegisterSpace::Input => "input",
            RegisterSpace::Coils => "coils",
            RegisterSpace::Discrete => "discrete",
        }
    }
}

impl std::fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value payload for a write: single-value and multi-value writes are
/// dispatched to distinct wire operations, some devices only accept one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteValue {
    Single(u16),
    Multiple(Vec<u16>),
}

impl From<u16> for WriteValue {
    fn from(value: u16) -> Self {
        WriteValue::Single(value)
    }
}

impl From<Vec<u16>> for WriteValue {
    fn from(values: Vec<u16>) -> Self {
        WriteValue::Multiple(values)
    }
}

/// Connection parameters for one device endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Device hostname or IP address
    pub host: String,
    /// TCP port (Modbus default: 502)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unit id (sub-device address behind the endpoint)
    #[serde(default = "default_unit")]
    pub unit: u8,
    /// Transport connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-operation I/O timeout (milliseconds)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Extra connect attempts after the first failure
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Linear backoff unit between connect attempts (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}
fn default_unit() -> u8 {
    1
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_operation_timeout_ms() -> u64 {
    3000
}
fn default_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            unit: default_unit(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    /// `host:port` label used in logs and fault context
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Per-device protocol limits governing request chunking and probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Maximum holding registers per read request
    #[serde(default = "default_max_per_request")]
    pub max_read_holding: u16,
    /// Maximum input registers per read request
    #[serde(default = "default_max_per_request")]
    pub max_read_input: u16,
    /// Maximum coils per read request
    #[serde(default = "default_max_per_request")]
    pub max_read_coils: u16,
    /// Maximum discrete inputs per read request
    #[serde(default = "default_max_per_request")]
    pub max_read_discrete: u16,
    /// Delay between chunked sub-requests (milliseconds)
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,
    /// Maximum offset tried by the address-fallback probe
    #[serde(default = "default_probe_radius")]
    pub probe_radius: u16,
}

fn default_max_per_request() -> u16 {
    100
}
fn default_inter_request_delay_ms() -> u64 {
    20
}
fn default_probe_radius() -> u16 {
    8
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_read_holding: default_max_per_request(),
            max_read_input: default_max_per_request(),
            max_read_coils: default_max_per_request(),
            max_read_discrete: default_max_per_request(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            probe_radius: default_probe_radius(),
        }
    }
}

impl DeviceLimits {
    /// Per-request maximum for the given register space
    pub fn max_for(&self, space: RegisterSpace) -> u16 {
        match space {
            RegisterSpace::Holding => self.max_read_holding,
            RegisterSpace::Input => self.max_read_input,
            RegisterSpace::Coils => self.max_read_coils,
            RegisterSpace::Discrete => self.max_read_discrete,
        }
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }
}

/// Creation parameters accepted by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    #[serde(flatten)]
    pub config: ConnectionConfig,
    /// Display name (defaults to `host:port`)
    #[serde(default)]
    pub name: Option<String>,
    /// Device protocol limits
    #[serde(default)]
    pub limits: DeviceLimits,
    /// Attempt a best-effort connect at creation time
    #[serde(default)]
    pub eager_connect: bool,
}

impl ConnectionSpec {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: ConnectionConfig::new(host),
            name: None,
            limits: DeviceLimits::default(),
            eager_connect: false,
        }
    }
}

/// One read request, as driven through the chunking/probing path
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    pub space: RegisterSpace,
    pub address: u16,
    pub count: u16,
    /// Allow one reconnect attempt when the session is closed
    pub allow_reconnect: bool,
    /// Opt-in address-fallback probe on illegal-address faults
    pub try_alternatives: bool,
}

impl ReadRequest {
    pub fn new(space: RegisterSpace, address: u16, count: u16) -> Self {
        Self {
            space,
            address,
            count,
            allow_reconnect: false,
            try_alternatives: false,
        }
    }

    pub fn allow_reconnect(mut self, allow: bool) -> Self {
        self.allow_reconnect = allow;
        self
    }

    pub fn try_alternatives(mut self, probe: bool) -> Self {
        self.try_alternatives = probe;
        self
    }
}

/// Read result with the probe adjustment tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutcome {
    /// Values in address order; bit spaces report 0/1
    pub values: Vec<u16>,
    /// Original base address, when the probe rebased the read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_from: Option<u16>,
    /// Effective base address after probing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_to: Option<u16>,
}

impl ReadOutcome {
    pub fn plain(values: Vec<u16>) -> Self {
        Self {
            values,
            adjusted_from: None,
            adjusted_to: None,
        }
    }
}

/// Background polling configuration for one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSpec {
    pub space: RegisterSpace,
    pub address: u16,
    pub count: u16,
    /// Polling interval (milliseconds)
    pub interval_ms: u64,
    /// History bound; oldest entries are evicted first
    pub max_history: usize,
    /// Opt-in address-fallback probe per cycle
    #[serde(default)]
    pub try_alternatives: bool,
}

impl PollSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(LinkError::Validation(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.max_history == 0 {
            return Err(LinkError::Validation(
                "max_history must be >= 1".to_string(),
            ));
        }
        validate_range(self.address, self.count)
    }
}

/// One poll cycle record: either values or the fault that cycle hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollEntry {
    pub timestamp: DateTime<Utc>,
    pub space: RegisterSpace,
    pub address: u16,
    pub count: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_from: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_to: Option<u16>,
}

/// Point-in-time copy of a connection's identity and state.
/// A copy, not a live reference: UI reads never race with mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit: u8,
    pub connected: bool,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
    /// Whether a poller is currently attached
    pub polling: bool,
}

/// Shared request validation: count must be >= 1 and the addressed range
/// must stay inside the 16-bit register space.
pub(crate) fn validate_range(address: u16, count: u16) -> Result<()> {
    if count == 0 {
        return Err(LinkError::Validation("count must be >= 1".to_string()));
    }
    if u32::from(address) + u32::from(count) > 0x1_0000 {
        return Err(LinkError::Validation(format!(
            "address range {}..{} exceeds register space",
            address,
            u32::from(address) + u32::from(count)
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // ========== RegisterSpace tests ==========

    #[test]
    fn test_register_space_writability() {
        assert!(RegisterSpace::Holding.writable());
        assert!(RegisterSpace::Coils.writable());
        assert!(!RegisterSpace::Input.writable());
        assert!(!RegisterSpace::Discrete.writable());
    }

    #[test]
    fn test_register_space_serde_tags() {
        let json = serde_json::to_string(&RegisterSpace::Discrete).unwrap();
        assert_eq!(json, r#""discrete""#);

        let space: RegisterSpace = serde_json::from_str(r#""holding""#).unwrap();
        assert_eq!(space, RegisterSpace::Holding);
    }

    // ========== ConnectionConfig tests ==========

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::new("192.168.1.50");

        assert_eq!(config.port, 502);
        assert_eq!(config.unit, 1);
        assert_eq!(config.connect_timeout_ms, 3000);
        assert_eq!(config.operation_timeout_ms, 3000);
        assert_eq!(config.retries, 2);
        assert_eq!(config.retry_backoff_ms, 500);
        assert_eq!(config.endpoint(), "192.168.1.50:502");
    }

    #[test]
    fn test_connection_config_deserialization_minimal() {
        let json = r#"{ "host": "plc7" }"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.host, "plc7");
        assert_eq!(config.port, 502);
        assert_eq!(config.retries, 2);
    }

    // ========== DeviceLimits tests ==========

    #[test]
    fn test_device_limits_default_values() {
        let limits = DeviceLimits::default();

        for space in [
            RegisterSpace::Holding,
            RegisterSpace::Input,
            RegisterSpace::Coils,
            RegisterSpace::Discrete,
        ] {
            assert_eq!(limits.max_for(space), 100);
        }
        assert_eq!(limits.inter_request_delay_ms, 20);
        assert_eq!(limits.probe_radius, 8);
    }

    #[test]
    fn test_device_limits_per_space_override() {
        let limits = DeviceLimits {
            max_read_coils: 16,
            ..Default::default()
        };

        assert_eq!(limits.max_for(RegisterSpace::Coils), 16);
        assert_eq!(limits.max_for(RegisterSpace::Holding), 100);
    }

    // ========== PollSpec tests ==========

    #[test]
    fn test_poll_spec_validation() {
        let spec = PollSpec {
            space: RegisterSpace::Holding,
            address: 0,
            count: 4,
            interval_ms: 1000,
            max_history: 20,
            try_alternatives: false,
        };
        assert!(spec.validate().is_ok());

        let bad_interval = PollSpec {
            interval_ms: 0,
            ..spec.clone()
        };
        assert!(matches!(
            bad_interval.validate(),
            Err(LinkError::Validation(_))
        ));

        let bad_history = PollSpec {
            max_history: 0,
            ..spec
        };
        assert!(matches!(
            bad_history.validate(),
            Err(LinkError::Validation(_))
        ));
    }

    // ========== Range validation tests ==========

    #[test]
    fn test_validate_range_rejects_zero_count() {
        assert!(validate_range(0, 0).is_err());
    }

    #[test]
    fn test_validate_range_rejects_overflow() {
        assert!(validate_range(65535, 2).is_err());
        assert!(validate_range(65535, 1).is_ok());
        assert!(validate_range(65436, 101).is_err());
        assert!(validate_range(65435, 101).is_ok());
    }

    // ========== Serialization tests ==========

    #[test]
    fn test_poll_entry_skips_empty_fields() {
        let entry = PollEntry {
            timestamp: Utc::now(),
            space: RegisterSpace::Input,
            address: 10,
            count: 2,
            values: Some(vec![1, 2]),
            error: None,
            adjusted_from: None,
            adjusted_to: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("error"));
        assert!(!json.contains("adjusted_from"));
        assert!(json.contains("values"));
    }

    #[test]
    fn test_write_value_from_conversions() {
        assert_eq!(WriteValue::from(7u16), WriteValue::Single(7));
        assert_eq!(
            WriteValue::from(vec![1u16, 2]),
            WriteValue::Multiple(vec![1, 2])
        );
    }

    #[test]
    fn test_connection_spec_defaults() {
        let spec = ConnectionSpec::new("plc1");
        assert!(spec.name.is_none());
        assert!(!spec.eager_connect);
        assert_eq!(spec.limits.probe_radius, 8);
    }
}
