//! BLE driver: runs the GATT state machine on top of esp32-nimble
//!
//! NimBLE's client API is coarser than the machine's events (one `connect`
//! covers open and MTU exchange, one `get_service` covers a whole search), so
//! the driver reports each step as the event the machine expects.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAddress, BLEAddressType, BLEClient, BLEDevice, BLEError, BLERemoteCharacteristic, BLEScan};
use esp_idf_svc::hal::task::block_on;
use intellilight_bridge::gatt::{AddrType, GattState, HandleRange, ScanParams};
use intellilight_bridge::{BdAddr, GattAction, GattEvent, GattStatus, Shared, SharedState};
use intellilight_proto::ble::{CHARACTERISTIC_UUID, SERVICE_UUID};
use log::*;

/// How often the driver checks the link while idle
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Longest a connect or discovery step may take
const WATCHDOG: Duration = Duration::from_secs(15);

const BLE_HS_ENOMEM: u32 = 6;

struct Driver {
    state: Shared,
    device: &'static BLEDevice,
    scan: BLEScan,
    client: BLEClient,
    queue: VecDeque<GattAction>,
    linked: bool,
    last_progress: Instant,
}

/// Drive the bulb until the bridge side hangs up
pub fn run(state: Shared, actions: Receiver<GattAction>) -> anyhow::Result<()> {
    let mut driver = Driver {
        device: BLEDevice::take(),
        scan: BLEScan::new(),
        client: BLEClient::new(),
        queue: VecDeque::new(),
        linked: false,
        last_progress: Instant::now(),
        state,
    };

    let start = lock(&driver.state).gatt.start();
    driver.queue.extend(start);

    loop {
        while let Some(action) = driver.queue.pop_front() {
            driver.execute(action);
        }
        driver.supervise();

        match actions.recv_timeout(POLL_INTERVAL) {
            Ok(action) => driver.queue.push_back(action),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("bridge dropped the action channel"),
        }
    }
}

fn lock(state: &Shared) -> MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status(e: &BLEError) -> GattStatus {
    match e.code() {
        BLE_HS_ENOMEM => GattStatus::NoResources,
        code => GattStatus::Failed(code as i32),
    }
}

impl Driver {
    fn feed(&mut self, event: GattEvent) {
        let actions = lock(&self.state).dispatch(event);
        self.last_progress = Instant::now();
        self.queue.extend(actions);
    }

    fn execute(&mut self, action: GattAction) {
        debug!("{action:?}");
        match action {
            GattAction::Register { app_id } => {
                info!("BLE stack up, local address {:?}", self.device.get_addr());
                self.feed(GattEvent::Registered { status: GattStatus::Ok, interface: app_id });
            }
            GattAction::SetScanParams(params) => {
                self.configure_scan(params);
                self.feed(GattEvent::ScanParamsSet { status: GattStatus::Ok });
            }
            GattAction::StartScan { duration_secs } => self.run_scan(duration_secs),
            // the scan callback already ended the scan on a match
            GattAction::StopScan => {}
            GattAction::Open { address, addr_type } => self.open(address, addr_type),
            GattAction::RequestMtu { conn_id, .. } => {
                // NimBLE exchanges the MTU while connecting
                let mtu = unsafe { esp_idf_svc::sys::ble_att_mtu(conn_id) };
                self.feed(GattEvent::MtuConfigured { status: GattStatus::Ok, mtu });
            }
            GattAction::SearchService { uuid, .. } => {
                let result = block_on(self.client.get_service(BleUuid::from_uuid16(uuid))).map(|_| ());
                match result {
                    Ok(()) => {
                        self.feed(GattEvent::ServiceFound { uuid, range: HandleRange::ALL });
                        self.feed(GattEvent::SearchComplete { status: GattStatus::Ok });
                    }
                    Err(e) => self.feed(GattEvent::SearchComplete { status: status(&e) }),
                }
            }
            GattAction::QueryCharacteristic { uuid, .. } => {
                let result = block_on(async {
                    let service = self.client.get_service(BleUuid::from_uuid16(SERVICE_UUID)).await?;
                    let characteristic = service.get_characteristic(BleUuid::from_uuid16(uuid)).await?;
                    Ok::<_, BLEError>(characteristic.handle())
                });
                let event = match result {
                    Ok(handle) => GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 1, handle },
                    Err(e) => GattEvent::CharacteristicLookup { status: status(&e), count: 0, handle: 0 },
                };
                self.feed(event);
            }
            GattAction::Write { payload, no_response, .. } => {
                let result = block_on(async {
                    self.characteristic().await?.write_value(&payload, !no_response).await
                });
                let status = result.map_or_else(|e| status(&e), |()| GattStatus::Ok);
                self.feed(GattEvent::WriteComplete { status });
            }
            GattAction::Read { .. } => {
                let result = block_on(async { self.characteristic().await?.read_value().await });
                let event = match result {
                    Ok(value) => GattEvent::ReadComplete { status: GattStatus::Ok, value },
                    Err(e) => GattEvent::ReadComplete { status: status(&e), value: Vec::new() },
                };
                self.feed(event);
            }
            GattAction::Close { .. } => {
                if let Err(e) = self.client.disconnect() {
                    warn!("disconnect failed: {e:?}");
                }
                self.linked = false;
                self.feed(GattEvent::Disconnected { reason: 0 });
            }
        }
    }

    async fn characteristic(&mut self) -> Result<&mut BLERemoteCharacteristic, BLEError> {
        self.client
            .get_service(BleUuid::from_uuid16(SERVICE_UUID))
            .await?
            .get_characteristic(BleUuid::from_uuid16(CHARACTERISTIC_UUID))
            .await
    }

    fn configure_scan(&mut self, params: ScanParams) {
        self.scan
            .active_scan(params.active)
            .filter_duplicates(params.filter_duplicates)
            .interval(params.interval)
            .window(params.window);
    }

    /// Scan until the machine wants to connect or the window ends
    fn run_scan(&mut self, duration_secs: u32) {
        self.feed(GattEvent::ScanStarted { status: GattStatus::Ok });

        let state = self.state.clone();
        let duration_ms = (duration_secs * 1000) as i32;
        let result = block_on(self.scan.start(self.device, duration_ms, |device, _data| {
            let address = device.addr().to_string().parse::<BdAddr>().ok()?;
            let addr_type = match device.addr().addr_type() {
                BLEAddressType::Public => AddrType::Public,
                _ => AddrType::Random,
            };
            let actions = lock(&state).dispatch(GattEvent::Advertisement { address, addr_type });
            (!actions.is_empty()).then_some(actions)
        }));

        match result {
            Ok(Some(actions)) => {
                self.last_progress = Instant::now();
                self.queue.extend(actions);
            }
            Ok(None) => self.feed(GattEvent::ScanComplete),
            Err(e) => {
                error!("scan failed: {e:?}");
                std::thread::sleep(Duration::from_secs(1));
                self.feed(GattEvent::ScanComplete);
            }
        }
    }

    fn open(&mut self, address: BdAddr, addr_type: AddrType) {
        let kind = match addr_type {
            AddrType::Public => BLEAddressType::Public,
            AddrType::Random => BLEAddressType::Random,
        };
        let Some(remote) = BLEAddress::from_str(&address.to_string(), kind) else {
            self.feed(GattEvent::OpenFailed { status: GattStatus::Failed(-1) });
            return;
        };

        match block_on(self.client.connect(&remote)) {
            Ok(()) => {
                self.linked = true;
                let conn_id = self.client.conn_handle();
                self.feed(GattEvent::Connected { conn_id, remote: address });
            }
            Err(e) => self.feed(GattEvent::OpenFailed { status: status(&e) }),
        }
    }

    /// Notice dropped links and stalled discovery
    fn supervise(&mut self) {
        if self.linked && !self.client.connected() {
            self.linked = false;
            self.feed(GattEvent::Disconnected { reason: 0 });
            return;
        }

        let stalled = matches!(
            lock(&self.state).gatt.state(),
            GattState::Connecting
                | GattState::MtuNegotiating
                | GattState::DiscoveringServices
                | GattState::DiscoveringCharacteristics
        );
        if stalled && self.last_progress.elapsed() > WATCHDOG {
            self.feed(GattEvent::Watchdog);
        }
    }
}
