//! Gateway configuration
//!
//! Read once at startup from a TOML file and treated as immutable afterwards.
//! Rewrite rules for a network are a single ordered `[[network.rewrite]]`
//! array so declaration order, which is rule precedence, survives across
//! rule kinds.
//!
//! ```toml
//! [repeater]
//! port = 62031
//!
//! [[network]]
//! name = "BM"
//! address = "2341.master.brandmeister.network"
//! password = "passw0rd"
//!
//! [[network.rewrite]]
//! kind = "tg"
//! from_slot = 2
//! from_tg = 9
//! to_slot = 2
//! to_tg = 9
//! ```

use std::path::Path;
use std::time::Duration;

use dmr_protocol::{Slot, MAX_ID, WILDCARD_ID};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub repeater: RepeaterConfig,

    /// Upstream network cores, in precedence order
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkConfig>,

    #[serde(default)]
    pub reflector: Option<ReflectorConfig>,

    /// Text socket accepting `DynTG <slot> <tg>`
    #[serde(default)]
    pub dynamic_control: Option<ControlSocketConfig>,

    /// Text socket accepting enable/disable/status/hosts
    #[serde(default)]
    pub remote_control: Option<ControlSocketConfig>,

    #[serde(default)]
    pub log: LogConfig,
}

/// Timing and diagnostics shared by all links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Slot hold time after repeater traffic (seconds)
    #[serde(default = "default_slot_timeout")]
    pub rf_timeout_secs: u64,

    /// Slot hold time after network traffic (seconds)
    #[serde(default = "default_slot_timeout")]
    pub net_timeout_secs: u64,

    /// Keep-alive and login retry interval (seconds)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Silence after which a session is torn down and retried (seconds)
    #[serde(default = "default_link_timeout")]
    pub link_timeout_secs: u64,

    /// Log every rewrite rule decision
    #[serde(default)]
    pub trace: bool,
}

fn default_slot_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    10
}

fn default_link_timeout() -> u64 {
    60
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            rf_timeout_secs: default_slot_timeout(),
            net_timeout_secs: default_slot_timeout(),
            ping_interval_secs: default_ping_interval(),
            link_timeout_secs: default_link_timeout(),
            trace: false,
        }
    }
}

impl GeneralConfig {
    pub fn rf_timeout(&self) -> Duration {
        Duration::from_secs(self.rf_timeout_secs)
    }

    pub fn net_timeout(&self) -> Duration {
        Duration::from_secs(self.net_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.link_timeout_secs)
    }
}

/// Where the local repeater connects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeaterConfig {
    #[serde(default = "default_bind_address")]
    pub address: String,

    #[serde(default = "default_repeater_port")]
    pub port: u16,

    /// Hex-dump every datagram
    #[serde(default)]
    pub debug: bool,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_repeater_port() -> u16 {
    62031
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            address: default_bind_address(),
            port: default_repeater_port(),
            debug: false,
        }
    }
}

/// One upstream network core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub address: String,

    #[serde(default = "default_network_port")]
    pub port: u16,

    /// Local UDP port, 0 for any
    #[serde(default)]
    pub local_port: u16,

    /// Id presented to this core; defaults to the repeater's own id
    #[serde(default)]
    pub id: Option<u32>,

    pub password: String,

    /// Options text sent after the configuration block
    #[serde(default)]
    pub options: Option<String>,

    /// Send the repeater's position in the configuration block
    #[serde(default = "default_true")]
    pub location: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub rewrite: Vec<RewriteConfig>,
}

fn default_true() -> bool {
    true
}

fn default_network_port() -> u16 {
    62031
}

fn default_range() -> u32 {
    1
}

fn default_relay_tg() -> u32 {
    9
}

fn default_disconnect_pc() -> u32 {
    4000
}

fn default_status_pc() -> u32 {
    5000
}

/// One rewrite rule declaration
///
/// `tg`, `pc` and `type` rules also install the reverse rule for traffic
/// coming back from the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewriteConfig {
    /// Talkgroup remap
    Tg {
        from_slot: Slot,
        from_tg: u32,
        to_slot: Slot,
        to_tg: u32,
        #[serde(default = "default_range")]
        range: u32,
    },
    /// Private call remap
    Pc {
        from_slot: Slot,
        from_id: u32,
        to_slot: Slot,
        to_id: u32,
        #[serde(default = "default_range")]
        range: u32,
    },
    /// Group call out as a private call, and back
    Type {
        from_slot: Slot,
        from_tg: u32,
        to_slot: Slot,
        to_id: u32,
        #[serde(default = "default_range")]
        range: u32,
    },
    /// Private calls from a source range land on a talkgroup
    Src {
        from_slot: Slot,
        from_id: u32,
        to_slot: Slot,
        to_tg: u32,
        #[serde(default = "default_range")]
        range: u32,
    },
    /// Dynamic talkgroup selection behind a relay talkgroup
    Dynamic {
        slot: Slot,
        from_tg: u32,
        range: u32,
        #[serde(default = "default_relay_tg")]
        relay_tg: u32,
        #[serde(default = "default_disconnect_pc")]
        disconnect_pc: u32,
        #[serde(default = "default_status_pc")]
        status_pc: u32,
        #[serde(default)]
        exclude: Vec<u32>,
    },
    /// Every group call on a slot, unchanged
    PassAllTg { slot: Slot },
    /// Every private call on a slot, unchanged
    PassAllPc { slot: Slot },
}

/// Reflector (room) network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory of reflectors, one `number;address;room` per line
    pub hosts_file: String,

    #[serde(default = "default_reload_hours")]
    pub reload_hours: u64,

    #[serde(default = "default_reflector_port")]
    pub port: u16,

    #[serde(default)]
    pub local_port: u16,

    #[serde(default)]
    pub id: Option<u32>,

    #[serde(default = "default_reflector_password")]
    pub password: String,

    #[serde(default)]
    pub options: Option<String>,

    /// Repeater slot carrying reflector traffic
    #[serde(default = "default_reflector_slot")]
    pub slot: Slot,

    /// Repeater talkgroup carrying reflector traffic
    #[serde(default = "default_reflector_tg")]
    pub tg: u32,

    /// Private call id that unlinks; base + N selects reflector N
    #[serde(default = "default_reflector_base")]
    pub base: u32,

    /// Reflector linked at startup and after inactivity
    #[serde(default)]
    pub startup: Option<u32>,

    /// Room used when a reflector is selected without one
    #[serde(default = "default_room")]
    pub room: u32,

    /// Minutes of inactivity before returning to the startup reflector, 0 to never
    #[serde(default = "default_relink_minutes")]
    pub relink_minutes: u64,

    /// Let radios link and unlink with private calls
    #[serde(default = "default_true")]
    pub user_control: bool,

    #[serde(default)]
    pub debug: bool,
}

fn default_reload_hours() -> u64 {
    24
}

fn default_reflector_port() -> u16 {
    62030
}

fn default_reflector_password() -> String {
    "passw0rd".to_string()
}

fn default_reflector_slot() -> Slot {
    Slot::One
}

fn default_reflector_tg() -> u32 {
    6
}

fn default_reflector_base() -> u32 {
    64000
}

fn default_room() -> u32 {
    4001
}

fn default_relink_minutes() -> u64 {
    60
}

impl ReflectorConfig {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_hours * 3600)
    }

    pub fn relink(&self) -> Duration {
        Duration::from_secs(self.relink_minutes * 60)
    }
}

/// Local UDP text socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSocketConfig {
    #[serde(default = "default_bind_address")]
    pub address: String,

    pub port: u16,
}

/// Logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing-subscriber` filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "dmrgateway=info,dmr_gateway=info,dmr_protocol=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Lowest and highest room ids a reflector accepts
pub const ROOM_FIRST: u32 = 4001;
pub const ROOM_LAST: u32 = 4026;

/// Largest reflector number selectable as base + N
pub const MAX_REFLECTOR: u32 = 999;

fn check_id(what: &str, id: u32) -> Result<(), ConfigError> {
    if id > MAX_ID {
        return Err(ConfigError::Invalid(format!(
            "{what} {id} does not fit in 24 bits"
        )));
    }
    Ok(())
}

fn check_range(what: &str, start: u32, range: u32) -> Result<(), ConfigError> {
    check_id(what, start)?;
    if range == 0 {
        return Err(ConfigError::Invalid(format!("{what} {start} has an empty range")));
    }
    if start != WILDCARD_ID && start as u64 + range as u64 - 1 > MAX_ID as u64 {
        return Err(ConfigError::Invalid(format!(
            "{what} {start} with range {range} runs past the 24-bit id space"
        )));
    }
    Ok(())
}

impl RewriteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            RewriteConfig::Tg {
                from_tg, to_tg, range, ..
            }
            | RewriteConfig::Type {
                from_tg,
                to_id: to_tg,
                range,
                ..
            } => {
                check_range("source talkgroup", *from_tg, *range)?;
                check_range("target", *to_tg, *range)
            }
            RewriteConfig::Pc {
                from_id, to_id, range, ..
            } => {
                check_range("source id", *from_id, *range)?;
                check_range("target id", *to_id, *range)
            }
            RewriteConfig::Src {
                from_id, to_tg, range, ..
            } => {
                check_range("source id", *from_id, *range)?;
                check_id("target talkgroup", *to_tg)
            }
            RewriteConfig::Dynamic {
                from_tg,
                range,
                relay_tg,
                disconnect_pc,
                status_pc,
                ..
            } => {
                check_range("dynamic talkgroup", *from_tg, *range)?;
                check_id("relay talkgroup", *relay_tg)?;
                check_id("disconnect id", *disconnect_pc)?;
                check_id("status id", *status_pc)?;
                if *relay_tg >= *from_tg && (*relay_tg as u64) < *from_tg as u64 + *range as u64 {
                    return Err(ConfigError::Invalid(format!(
                        "relay talkgroup {relay_tg} lies inside its own dynamic range"
                    )));
                }
                Ok(())
            }
            RewriteConfig::PassAllTg { .. } | RewriteConfig::PassAllPc { .. } => Ok(()),
        }
    }
}

impl GatewayConfig {
    /// Load and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("ping_interval_secs must be positive".into()));
        }
        if self.general.link_timeout_secs <= self.general.ping_interval_secs {
            return Err(ConfigError::Invalid(
                "link_timeout_secs must exceed ping_interval_secs".into(),
            ));
        }

        for (i, network) in self.networks.iter().enumerate() {
            if network.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("network {} has no name", i + 1)));
            }
            if network.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "network {} has no address",
                    network.name
                )));
            }
            if let Some(id) = network.id {
                check_id("network id", id)?;
            }
            for rule in &network.rewrite {
                rule.validate().map_err(|e| match e {
                    ConfigError::Invalid(msg) => {
                        ConfigError::Invalid(format!("network {}: {msg}", network.name))
                    }
                    other => other,
                })?;
            }
        }

        let names: Vec<_> = self.networks.iter().map(|n| n.name.as_str()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(ConfigError::Invalid(format!("duplicate network name {name}")));
            }
        }

        if let Some(reflector) = &self.reflector {
            if reflector.hosts_file.trim().is_empty() {
                return Err(ConfigError::Invalid("reflector hosts_file is empty".into()));
            }
            if reflector.reload_hours == 0 {
                return Err(ConfigError::Invalid("reflector reload_hours must be positive".into()));
            }
            check_id("reflector talkgroup", reflector.tg)?;
            check_id("reflector base", reflector.base)?;
            if !(ROOM_FIRST..=ROOM_LAST).contains(&reflector.room) {
                return Err(ConfigError::Invalid(format!(
                    "reflector room {} outside {ROOM_FIRST}..={ROOM_LAST}",
                    reflector.room
                )));
            }
            if let Some(startup) = reflector.startup {
                if startup == 0 || startup > MAX_REFLECTOR {
                    return Err(ConfigError::Invalid(format!(
                        "startup reflector {startup} outside 1..={MAX_REFLECTOR}"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[general]
rf_timeout_secs = 5
trace = true

[repeater]
port = 62032

[[network]]
name = "BM"
address = "127.0.0.1"
password = "secret"
options = "TS2=91"

[[network.rewrite]]
kind = "tg"
from_slot = 2
from_tg = 9
to_slot = 2
to_tg = 9

[[network.rewrite]]
kind = "dynamic"
slot = 2
from_tg = 100
range = 900
exclude = [4000]

[[network.rewrite]]
kind = "pass_all_pc"
slot = 1

[[network]]
name = "DMR+"
address = "127.0.0.2"
password = "PASSWORD"
location = false
enabled = false

[reflector]
hosts_file = "XLXHosts.txt"
startup = 950

[remote_control]
port = 7643
"#;

    #[test]
    fn test_full_config() {
        let config = GatewayConfig::parse(FULL).unwrap();
        assert_eq!(config.general.rf_timeout(), Duration::from_secs(5));
        assert_eq!(config.general.net_timeout(), Duration::from_secs(10));
        assert!(config.general.trace);
        assert_eq!(config.repeater.port, 62032);
        assert_eq!(config.networks.len(), 2);

        let bm = &config.networks[0];
        assert!(bm.enabled);
        assert_eq!(bm.port, 62031);
        assert_eq!(bm.options.as_deref(), Some("TS2=91"));
        assert_eq!(bm.rewrite.len(), 3);
        assert_eq!(
            bm.rewrite[0],
            RewriteConfig::Tg {
                from_slot: Slot::Two,
                from_tg: 9,
                to_slot: Slot::Two,
                to_tg: 9,
                range: 1
            }
        );
        assert!(matches!(
            &bm.rewrite[1],
            RewriteConfig::Dynamic { relay_tg: 9, disconnect_pc: 4000, exclude, .. } if exclude == &vec![4000]
        ));
        assert_eq!(bm.rewrite[2], RewriteConfig::PassAllPc { slot: Slot::One });

        assert!(!config.networks[1].location);
        assert!(!config.networks[1].enabled);

        let reflector = config.reflector.unwrap();
        assert_eq!(reflector.startup, Some(950));
        assert_eq!(reflector.room, 4001);
        assert_eq!(reflector.relink(), Duration::from_secs(3600));
        assert_eq!(config.remote_control.unwrap().address, "127.0.0.1");
        assert!(config.dynamic_control.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::parse("").unwrap();
        assert!(config.networks.is_empty());
        assert_eq!(config.repeater.port, 62031);
        assert_eq!(config.log.filter, default_log_filter());
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let text = r#"
[[network]]
name = "BM"
address = "h"
password = "p"
[[network.rewrite]]
kind = "pass_all_tg"
slot = 3
"#;
        assert!(matches!(GatewayConfig::parse(text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_errors() {
        let range_overflow = r#"
[[network]]
name = "BM"
address = "h"
password = "p"
[[network.rewrite]]
kind = "tg"
from_slot = 1
from_tg = 16777200
to_slot = 1
to_tg = 1
range = 100
"#;
        assert!(matches!(
            GatewayConfig::parse(range_overflow),
            Err(ConfigError::Invalid(_))
        ));

        let duplicate = r#"
[[network]]
name = "BM"
address = "h"
password = "p"
[[network]]
name = "BM"
address = "h2"
password = "p"
"#;
        assert!(matches!(GatewayConfig::parse(duplicate), Err(ConfigError::Invalid(_))));

        let bad_room = r#"
[reflector]
hosts_file = "x"
room = 4100
"#;
        assert!(matches!(GatewayConfig::parse(bad_room), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_reload_interval_rejected() {
        let text = r#"
[reflector]
hosts_file = "x"
reload_hours = 0
"#;
        assert!(matches!(GatewayConfig::parse(text), Err(ConfigError::Invalid(_))));

        let hourly = GatewayConfig::parse("[reflector]\nhosts_file = \"x\"\nreload_hours = 1\n").unwrap();
        let reflector = hourly.reflector.unwrap();
        assert_eq!(reflector.reload_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_wildcard_range_accepted() {
        let text = r#"
[[network]]
name = "BM"
address = "h"
password = "p"
[[network.rewrite]]
kind = "pc"
from_slot = 1
from_id = 16777215
to_slot = 1
to_id = 16777215
range = 1
"#;
        assert!(GatewayConfig::parse(text).is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.networks[0].name, "BM");

        let missing = GatewayConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
