//! Bridge configuration
//!
//! Raw values come from wherever the platform keeps them (NVS, build-time
//! environment); [`BridgeConfig::from_raw`] validates them.

use intellilight_proto::sysinfo::DeviceIdentity;
use intellilight_proto::KASA_PORT;

use crate::gatt::{AddrParseError, BdAddr};

/// Access point name used while no WiFi network is configured
pub const SETUP_AP_SSID: &str = "IntelliLight-Setup";

const MAX_SSID_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no bulb address configured")]
    MissingPeripheral,
    #[error(transparent)]
    InvalidPeripheral(#[from] AddrParseError),
    #[error("SSID {0:?} is longer than 32 bytes")]
    SsidTooLong(String),
    #[error("WiFi password must be 8 to 64 characters")]
    InvalidPassword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiMode {
    Station { ssid: String, password: String },
    /// Open network for first-time setup
    AccessPoint { ssid: String },
}

/// Unvalidated settings, every entry optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub wifi_ssid: Option<String>,
    pub wifi_pass: Option<String>,
    pub ap_ssid: Option<String>,
    pub bulb_mac: Option<String>,
    pub alias: Option<String>,
}

impl RawConfig {
    /// Fill entries missing (or empty) here from `fallback`
    pub fn or(self, fallback: RawConfig) -> RawConfig {
        fn pick(value: Option<String>, fallback: Option<String>) -> Option<String> {
            value.filter(|v| !v.is_empty()).or(fallback.filter(|v| !v.is_empty()))
        }
        RawConfig {
            wifi_ssid: pick(self.wifi_ssid, fallback.wifi_ssid),
            wifi_pass: pick(self.wifi_pass, fallback.wifi_pass),
            ap_ssid: pick(self.ap_ssid, fallback.ap_ssid),
            bulb_mac: pick(self.bulb_mac, fallback.bulb_mac),
            alias: pick(self.alias, fallback.alias),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Address of the BLE bulb
    pub peripheral: BdAddr,
    pub port: u16,
    pub wifi: WifiMode,
    pub identity: DeviceIdentity,
}

impl BridgeConfig {
    /// Validate raw settings; `mac` is the interface MAC the bridge reports
    pub fn from_raw(raw: RawConfig, mac: [u8; 6]) -> Result<Self, ConfigError> {
        let peripheral = raw
            .bulb_mac
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::MissingPeripheral)?
            .parse::<BdAddr>()?;

        let wifi = match raw.wifi_ssid.filter(|s| !s.is_empty()) {
            Some(ssid) => {
                let password = raw.wifi_pass.unwrap_or_default();
                if !password.is_empty() && !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
                    return Err(ConfigError::InvalidPassword);
                }
                WifiMode::Station { ssid: check_ssid(ssid)?, password }
            }
            None => WifiMode::AccessPoint {
                ssid: check_ssid(raw.ap_ssid.unwrap_or_else(|| SETUP_AP_SSID.to_string()))?,
            },
        };

        let identity = match raw.alias.as_deref() {
            Some(alias) if !alias.is_empty() => DeviceIdentity::from_mac(mac, alias),
            _ => {
                let default = DeviceIdentity::default();
                DeviceIdentity::from_mac(mac, &default.alias)
            }
        };

        Ok(Self { peripheral, port: KASA_PORT, wifi, identity })
    }
}

fn check_ssid(ssid: String) -> Result<String, ConfigError> {
    if ssid.len() > MAX_SSID_LEN {
        return Err(ConfigError::SsidTooLong(ssid));
    }
    Ok(ssid)
}
