//! IntelliLight bridge firmware for ESP32
//!
//! Shows up on the LAN as a TP-Link Kasa KL130 colour bulb and forwards what
//! it is told to a BLE bulb over GATT.

mod ble;
mod config;
mod wifi;

use std::net::{TcpListener, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use intellilight_bridge::server::{serve_discovery, serve_tcp};
use intellilight_bridge::{Bridge, SharedState, WifiMode};
use log::*;

const TASK_STACK_SIZE: usize = 8 * 1024;

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("IntelliLight v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load(&nvs)?;
    info!(
        "Bulb {}, presenting as \"{}\" ({})",
        config.peripheral,
        config.identity.alias,
        config.identity.mic_mac()
    );

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs.clone()))?,
        sys_loop,
    )?;
    wifi::start(&mut wifi, &config.wifi, config.identity.mac)?;

    let state = SharedState::shared(config.peripheral);
    let (actions, action_rx) = mpsc::channel();
    let bridge = Bridge::new(state.clone(), actions, config.identity.clone());

    thread::Builder::new()
        .name("ble".into())
        .stack_size(TASK_STACK_SIZE)
        .spawn(move || {
            if let Err(e) = ble::run(state, action_rx) {
                error!("BLE driver stopped: {:?}", e);
            }
        })?;

    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    let tcp_bridge = bridge.clone();
    thread::Builder::new()
        .name("kasa-tcp".into())
        .stack_size(TASK_STACK_SIZE)
        .spawn(move || {
            if let Err(e) = serve_tcp(listener, &tcp_bridge) {
                error!("TCP server stopped: {:?}", e);
            }
        })?;

    let socket = UdpSocket::bind(("0.0.0.0", config.port))?;
    thread::Builder::new()
        .name("kasa-udp".into())
        .stack_size(TASK_STACK_SIZE)
        .spawn(move || {
            if let Err(e) = serve_discovery(socket, &bridge) {
                error!("Discovery server stopped: {:?}", e);
            }
        })?;

    info!("Listening for Kasa requests on port {}", config.port);

    // Keep the station link alive; the setup access point needs no care
    let station = matches!(config.wifi, WifiMode::Station { .. });
    loop {
        if station {
            wifi::ensure_connected(&mut wifi);
        }
        thread::sleep(Duration::from_secs(10));
    }
}
