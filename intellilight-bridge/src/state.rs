//! State shared between the BLE driver and the LAN bridge

use std::sync::{Arc, Mutex};

use intellilight_proto::ble::BulbCommand;
use log::*;

use crate::gatt::{BdAddr, GattAction, GattClient, GattEvent, GattStatus};
use crate::light::LightState;

/// Light model and GATT machine behind one lock
#[derive(Debug, Clone)]
pub struct SharedState {
    pub light: LightState,
    pub gatt: GattClient,
}

pub type Shared = Arc<Mutex<SharedState>>;

impl SharedState {
    pub fn new(target: BdAddr) -> Self {
        Self {
            light: LightState::default(),
            gatt: GattClient::new(target),
        }
    }

    pub fn shared(target: BdAddr) -> Shared {
        Arc::new(Mutex::new(Self::new(target)))
    }

    /// Feed one stack event, returning what the driver has to do next
    ///
    /// Read completions carrying a bulb command also update the light model.
    pub fn dispatch(&mut self, event: GattEvent) -> Vec<GattAction> {
        if let GattEvent::ReadComplete { status: GattStatus::Ok, value } = &event {
            match BulbCommand::from_bytes(value) {
                Some(command) => self.light.apply_read(command),
                None => debug!("ignoring unexpected characteristic value {value:02x?}"),
            }
        }
        self.gatt.handle(event)
    }
}
