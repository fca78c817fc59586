//! IntelliLight bridge core
//!
//! Everything between the network sockets and the BLE stack:
//! - [`gatt`]: GATT client state machine for the bulb
//! - [`light`]: last commanded bulb state
//! - [`bridge`]: Kasa request handling on top of both
//! - [`server`]: blocking TCP and UDP discovery servers
//!
//! The firmware crate supplies the BLE driver (feeding [`SharedState::dispatch`])
//! and a [`BulbLink`] through which the bridge reaches it.

pub mod bridge;
pub mod colour;
pub mod config;
pub mod gatt;
pub mod light;
pub mod server;
pub mod state;

pub use bridge::{Bridge, BulbLink, LinkError};
pub use colour::{Hsv, Rgb};
pub use config::{BridgeConfig, ConfigError, RawConfig, WifiMode};
pub use gatt::{BdAddr, GattAction, GattClient, GattError, GattEvent, GattState, GattStatus};
pub use light::LightState;
pub use state::{Shared, SharedState};
