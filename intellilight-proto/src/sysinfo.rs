//! Synthesized device descriptor for `system.get_sysinfo`
//!
//! The bridge answers as a KL130 colour bulb. Static identity fields come from
//! [`DeviceIdentity`]; the `light_state` part is filled from the live model.

use data_encoding::HEXUPPER;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::message::LightStateReply;

/// Static identity reported to LAN clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub sw_ver: String,
    pub hw_ver: String,
    pub model: String,
    pub device_id: String,
    pub oem_id: String,
    pub hw_id: String,
    pub alias: String,
    pub description: String,
    pub mac: [u8; 6],
}

/// Interface MAC the bridge reports (and spoofs on its WiFi interface)
pub const DEFAULT_MAC: [u8; 6] = [0xC0, 0xC9, 0xE3, 0xAD, 0x7C, 0x1C];

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            sw_ver: "1.0.0 Build 000001 Rel.000001".to_string(),
            hw_ver: "1.0".to_string(),
            model: "KL130B(UN)".to_string(),
            device_id: "80121C1874CF2DEA94DF3127F8DDF7D71DD7112F".to_string(),
            oem_id: "E45F76AD3AF13E60B58D6F68739CD7E5".to_string(),
            hw_id: "1E97141B9F0E939BD8F9679F0B6167C8".to_string(),
            alias: "Back Light".to_string(),
            description: "WiFi BLE Smart Bulb Bridge".to_string(),
            mac: DEFAULT_MAC,
        }
    }
}

impl DeviceIdentity {
    /// Identity with ids derived from the interface MAC
    ///
    /// Two bridges on the same LAN must not share a `deviceId`, so the ids are
    /// hashed from the MAC instead of using the fixed template values.
    pub fn from_mac(mac: [u8; 6], alias: &str) -> Self {
        let device_id = HEXUPPER.encode(&digest(b"deviceId", &mac)[..20]);
        let hw_id = HEXUPPER.encode(&digest(b"hwId", &mac)[..16]);
        Self {
            device_id,
            hw_id,
            alias: alias.to_string(),
            mac,
            ..Self::default()
        }
    }

    /// `mic_mac` as reported by real bulbs: upper-case hex, no separators
    pub fn mic_mac(&self) -> String {
        HEXUPPER.encode(&self.mac)
    }
}

fn digest(label: &[u8], mac: &[u8; 6]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(mac);
    hasher.finalize().into()
}

#[derive(Debug, Clone, Serialize)]
pub struct CtrlProtocols {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PreferredState {
    pub index: u8,
    pub hue: u16,
    pub saturation: u8,
    pub color_temp: u16,
    pub brightness: u8,
}

/// Preset buttons shown by the app
pub const PREFERRED_STATES: [PreferredState; 4] = [
    PreferredState { index: 0, hue: 0, saturation: 0, color_temp: 2700, brightness: 50 },
    PreferredState { index: 1, hue: 0, saturation: 100, color_temp: 0, brightness: 100 },
    PreferredState { index: 2, hue: 120, saturation: 100, color_temp: 0, brightness: 100 },
    PreferredState { index: 3, hue: 240, saturation: 100, color_temp: 0, brightness: 100 },
];

/// Body of `{"system":{"get_sysinfo":{...}}}`
#[derive(Debug, Clone, Serialize)]
pub struct SysInfo {
    pub sw_ver: String,
    pub hw_ver: String,
    pub model: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "oemId")]
    pub oem_id: String,
    #[serde(rename = "hwId")]
    pub hw_id: String,
    pub rssi: i32,
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub alias: String,
    pub status: &'static str,
    pub description: String,
    pub mic_type: &'static str,
    pub mic_mac: String,
    pub dev_state: &'static str,
    pub is_factory: bool,
    pub disco_ver: &'static str,
    pub ctrl_protocols: CtrlProtocols,
    pub active_mode: &'static str,
    pub is_dimmable: u8,
    pub is_color: u8,
    pub is_variable_color_temp: u8,
    pub light_state: LightStateReply,
    pub preferred_state: Vec<PreferredState>,
    pub err_code: i32,
}

impl SysInfo {
    pub fn new(identity: &DeviceIdentity, light_state: LightStateReply) -> Self {
        Self {
            sw_ver: identity.sw_ver.clone(),
            hw_ver: identity.hw_ver.clone(),
            model: identity.model.clone(),
            device_id: identity.device_id.clone(),
            oem_id: identity.oem_id.clone(),
            hw_id: identity.hw_id.clone(),
            rssi: -71,
            latitude_i: 0,
            longitude_i: 0,
            alias: identity.alias.clone(),
            status: "new",
            description: identity.description.clone(),
            mic_type: "IOT.SMARTBULB",
            mic_mac: identity.mic_mac(),
            dev_state: "normal",
            is_factory: false,
            disco_ver: "1.0",
            ctrl_protocols: CtrlProtocols { name: "Linkie", version: "1.0" },
            active_mode: "none",
            is_dimmable: 1,
            is_color: 1,
            is_variable_color_temp: 1,
            light_state,
            preferred_state: PREFERRED_STATES.to_vec(),
            err_code: 0,
        }
    }
}

/// Body of `{"smartlife.iot.common.cloud":{"get_info":{...}}}`
///
/// Claims a bound, connected cloud account so the app does not nag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInfo {
    pub username: &'static str,
    pub server: &'static str,
    pub binded: u8,
    #[serde(rename = "cld_connection")]
    pub cld_connection: u8,
    pub illegal_type: u8,
    pub stop_connect: u8,
    pub tcsp_status: u8,
    pub fw_dl_page: &'static str,
    pub tcsp_info: &'static str,
    pub fw_notify_type: i32,
    #[serde(rename = "err_code")]
    pub err_code: i32,
}

pub const CLOUD_INFO: CloudInfo = CloudInfo {
    username: "",
    server: "n-devs.tplinkcloud.com",
    binded: 1,
    cld_connection: 1,
    illegal_type: 0,
    stop_connect: 0,
    tcsp_status: 1,
    fw_dl_page: "",
    tcsp_info: "",
    fw_notify_type: -1,
    err_code: 0,
};
