//! Bridge configuration from NVS, falling back to build-time environment

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use intellilight_bridge::{BridgeConfig, RawConfig};
use intellilight_proto::sysinfo::DEFAULT_MAC;
use log::*;

const NVS_NAMESPACE: &str = "intellilight";
const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";
const KEY_AP_SSID: &str = "ap_ssid";
const KEY_BULB_MAC: &str = "bulb_mac";
const KEY_ALIAS: &str = "alias";

/// Values baked in with `INTELLILIGHT_*` variables at build time
fn built_in() -> RawConfig {
    RawConfig {
        wifi_ssid: option_env!("INTELLILIGHT_WIFI_SSID").map(String::from),
        wifi_pass: option_env!("INTELLILIGHT_WIFI_PASS").map(String::from),
        ap_ssid: None,
        bulb_mac: option_env!("INTELLILIGHT_BULB_MAC").map(String::from),
        alias: None,
    }
}

pub fn load(partition: &EspNvsPartition<NvsDefault>) -> anyhow::Result<BridgeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;

    let stored = RawConfig {
        wifi_ssid: get_str(&nvs, KEY_WIFI_SSID),
        wifi_pass: get_str(&nvs, KEY_WIFI_PASS),
        ap_ssid: get_str(&nvs, KEY_AP_SSID),
        bulb_mac: get_str(&nvs, KEY_BULB_MAC),
        alias: get_str(&nvs, KEY_ALIAS),
    };
    if stored == RawConfig::default() {
        info!("nothing stored in NVS namespace {NVS_NAMESPACE}, using built-in settings");
    }

    Ok(BridgeConfig::from_raw(stored.or(built_in()), DEFAULT_MAC)?)
}

fn get_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    let mut buf = [0u8; 128];
    match nvs.get_str(key, &mut buf) {
        Ok(value) => value.map(String::from),
        Err(e) => {
            warn!("reading {key} from NVS failed: {e:?}");
            None
        }
    }
}
