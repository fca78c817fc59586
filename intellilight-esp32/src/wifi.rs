//! WiFi bring-up as station or setup access point

use std::time::Duration;

use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi, WifiDeviceId,
};
use intellilight_bridge::WifiMode;
use log::*;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Configure, spoof the interface MAC and start; stations also wait for an IP
pub fn start(wifi: &mut BlockingWifi<EspWifi<'static>>, mode: &WifiMode, mac: [u8; 6]) -> anyhow::Result<()> {
    let (config, interface) = match mode {
        WifiMode::Station { ssid, password } => {
            let auth_method = if password.is_empty() { AuthMethod::None } else { AuthMethod::WPA2Personal };
            let config = Configuration::Client(ClientConfiguration {
                ssid: ssid.as_str().try_into().map_err(|_| anyhow::anyhow!("SSID too long: {ssid}"))?,
                password: password.as_str().try_into().map_err(|_| anyhow::anyhow!("password too long"))?,
                auth_method,
                ..Default::default()
            });
            (config, WifiDeviceId::Sta)
        }
        WifiMode::AccessPoint { ssid } => {
            let config = Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid.as_str().try_into().map_err(|_| anyhow::anyhow!("SSID too long: {ssid}"))?,
                auth_method: AuthMethod::None,
                channel: 1,
                ..Default::default()
            });
            (config, WifiDeviceId::Ap)
        }
    };

    wifi.set_configuration(&config)?;
    wifi.wifi_mut().set_mac(interface, mac)?;
    wifi.start()?;

    match mode {
        WifiMode::Station { ssid, .. } => {
            info!("WiFi started, joining {}...", ssid);
            join(wifi)?;
        }
        WifiMode::AccessPoint { ssid } => {
            wifi.wait_netif_up()?;
            info!("Access point \"{}\" up, IP: {:?}", ssid, wifi.wifi().ap_netif().get_ip_info()?);
        }
    }

    Ok(())
}

/// Associate and wait for DHCP
fn join(wifi: &mut BlockingWifi<EspWifi<'static>>) -> anyhow::Result<()> {
    wifi.connect()?;
    wifi.wait_netif_up()?;
    info!("WiFi connected, IP: {:?}", wifi.wifi().sta_netif().get_ip_info()?);
    Ok(())
}

/// Rejoin the station network, backing off up to a minute between attempts
pub fn ensure_connected(wifi: &mut BlockingWifi<EspWifi<'static>>) {
    if wifi.is_connected().unwrap_or(false) {
        return;
    }
    warn!("WiFi link lost");

    let mut backoff = Duration::from_secs(1);
    while let Err(e) = join(wifi) {
        warn!("rejoin failed: {:?}, next attempt in {:?}", e, backoff);
        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
