//! GATT client state machine for the BLE bulb
//!
//! The machine never touches a BLE stack. The driver feeds it [`GattEvent`]s
//! and executes the [`GattAction`]s it returns, which keeps the whole
//! scan → connect → discover → ready walk testable on the host.

use std::fmt;
use std::str::FromStr;

use intellilight_proto::ble::{BulbCommand, CHARACTERISTIC_UUID, COMMAND_LEN, SERVICE_UUID};
use log::*;

use crate::colour::Rgb;

/// GATT client application id registered with the stack
pub const APP_ID: u16 = 0;

/// MTU offered to the bulb
pub const LOCAL_MTU: u16 = 500;

/// Length of one scan window
pub const SCAN_DURATION_SECS: u32 = 30;

/// 6-byte Bluetooth device address, most significant byte first
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddr({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bluetooth address: {0:?}")]
pub struct AddrParseError(pub String);

impl FromStr for BdAddr {
    type Err = AddrParseError;

    /// Accepts `aa:bb:cc:dd:ee:ff` (or `-` separated), any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddrParseError(s.to_string());
        let mut addr = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for byte in addr.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 || !part.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(err());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(BdAddr(addr))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrType {
    #[default]
    Public,
    Random,
}

/// Completion status reported by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Ok,
    /// Stack ran out of memory or table slots
    NoResources,
    Failed(i32),
}

impl GattStatus {
    pub fn is_ok(self) -> bool {
        self == GattStatus::Ok
    }
}

/// Inclusive attribute handle range of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    pub const ALL: HandleRange = HandleRange { start: 0x0001, end: 0xFFFF };

    pub fn contains(&self, handle: u16) -> bool {
        (self.start..=self.end).contains(&handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub active: bool,
    pub own_addr: AddrType,
    pub accept_all: bool,
    /// In 0.625 ms units
    pub interval: u16,
    /// In 0.625 ms units
    pub window: u16,
    pub filter_duplicates: bool,
}

impl ScanParams {
    pub const DEFAULT: ScanParams = ScanParams {
        active: true,
        own_addr: AddrType::Public,
        accept_all: true,
        interval: 0x50,
        window: 0x30,
        filter_duplicates: false,
    };
}

/// Link to the one bulb; handles are zero while unknown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralConnection {
    pub interface: Option<u16>,
    pub conn_id: u16,
    pub service_range: Option<HandleRange>,
    pub characteristic_handle: u16,
    pub remote: Option<BdAddr>,
    pub connected: bool,
}

impl PeripheralConnection {
    pub fn is_ready(&self) -> bool {
        self.characteristic_handle != 0
    }

    fn tear_down(&mut self) {
        *self = PeripheralConnection {
            interface: self.interface,
            ..Default::default()
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GattState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    MtuNegotiating,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnected,
}

/// Something the BLE stack reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    Registered { status: GattStatus, interface: u16 },
    ScanParamsSet { status: GattStatus },
    ScanStarted { status: GattStatus },
    Advertisement { address: BdAddr, addr_type: AddrType },
    /// Scan window elapsed or the scan was stopped
    ScanComplete,
    Connected { conn_id: u16, remote: BdAddr },
    OpenFailed { status: GattStatus },
    MtuConfigured { status: GattStatus, mtu: u16 },
    ServiceFound { uuid: u16, range: HandleRange },
    SearchComplete { status: GattStatus },
    CharacteristicLookup { status: GattStatus, count: u16, handle: u16 },
    WriteComplete { status: GattStatus },
    ReadComplete { status: GattStatus, value: Vec<u8> },
    Disconnected { reason: i32 },
    /// Driver timer: connect or discovery made no progress
    Watchdog,
}

/// Something the driver has to ask the BLE stack to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattAction {
    Register { app_id: u16 },
    SetScanParams(ScanParams),
    StartScan { duration_secs: u32 },
    StopScan,
    Open { address: BdAddr, addr_type: AddrType },
    RequestMtu { conn_id: u16, mtu: u16 },
    SearchService { conn_id: u16, uuid: u16 },
    QueryCharacteristic { conn_id: u16, range: HandleRange, uuid: u16 },
    Write { conn_id: u16, handle: u16, payload: [u8; COMMAND_LEN], no_response: bool },
    Read { conn_id: u16, handle: u16 },
    Close { conn_id: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GattError {
    #[error("bulb characteristic not discovered yet")]
    NotReady,
}

/// Drives one fixed-address bulb
#[derive(Debug, Clone)]
pub struct GattClient {
    target: BdAddr,
    state: GattState,
    conn: PeripheralConnection,
    connecting: bool,
    service_found: bool,
}

impl GattClient {
    pub fn new(target: BdAddr) -> Self {
        Self {
            target,
            state: GattState::Idle,
            conn: PeripheralConnection::default(),
            connecting: false,
            service_found: false,
        }
    }

    pub fn target(&self) -> BdAddr {
        self.target
    }

    pub fn state(&self) -> GattState {
        self.state
    }

    pub fn connection(&self) -> &PeripheralConnection {
        &self.conn
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_ready()
    }

    /// First action after the stack is up
    pub fn start(&mut self) -> Vec<GattAction> {
        info!("registering GATT client, target {}", self.target);
        self.state = GattState::Idle;
        vec![GattAction::Register { app_id: APP_ID }]
    }

    pub fn handle(&mut self, event: GattEvent) -> Vec<GattAction> {
        match event {
            GattEvent::Registered { status, interface } => {
                if !status.is_ok() {
                    error!("GATT client registration failed: {status:?}");
                    return vec![];
                }
                self.conn.interface = Some(interface);
                vec![GattAction::SetScanParams(ScanParams::DEFAULT)]
            }
            GattEvent::ScanParamsSet { status } => {
                if !status.is_ok() {
                    error!("setting scan params failed: {status:?}");
                    return vec![];
                }
                vec![scan()]
            }
            GattEvent::ScanStarted { status } => {
                if !status.is_ok() {
                    error!("scan start failed: {status:?}");
                    return vec![];
                }
                if matches!(self.state, GattState::Idle | GattState::Disconnected | GattState::Scanning) {
                    info!("scanning for {}", self.target);
                    self.state = GattState::Scanning;
                }
                vec![]
            }
            GattEvent::Advertisement { address, addr_type } => {
                if address != self.target || self.connecting || self.conn.connected {
                    return vec![];
                }
                info!("found bulb {address}, connecting");
                self.connecting = true;
                self.state = GattState::Connecting;
                vec![GattAction::StopScan, GattAction::Open { address, addr_type }]
            }
            GattEvent::ScanComplete => {
                if self.state == GattState::Scanning && !self.connecting {
                    info!("bulb {} not seen, scanning again", self.target);
                    return vec![scan()];
                }
                vec![]
            }
            GattEvent::Connected { conn_id, remote } => {
                info!("connected to {remote}, conn_id {conn_id}");
                self.conn.conn_id = conn_id;
                self.conn.remote = Some(remote);
                self.conn.connected = true;
                self.state = GattState::MtuNegotiating;
                vec![GattAction::RequestMtu { conn_id, mtu: LOCAL_MTU }]
            }
            GattEvent::OpenFailed { status } => {
                warn!("open to {} failed: {status:?}", self.target);
                vec![]
            }
            GattEvent::MtuConfigured { status, mtu } => {
                if status.is_ok() {
                    info!("MTU {mtu}");
                } else {
                    warn!("MTU exchange failed: {status:?}, mtu {mtu}");
                }
                if self.state != GattState::MtuNegotiating {
                    return vec![];
                }
                self.service_found = false;
                self.state = GattState::DiscoveringServices;
                vec![GattAction::SearchService { conn_id: self.conn.conn_id, uuid: SERVICE_UUID }]
            }
            GattEvent::ServiceFound { uuid, range } => {
                if uuid == SERVICE_UUID {
                    debug!("service {uuid:#06x} at {:#06x}..={:#06x}", range.start, range.end);
                    self.service_found = true;
                    self.conn.service_range = Some(range);
                }
                vec![]
            }
            GattEvent::SearchComplete { status } => {
                if !status.is_ok() {
                    warn!("service search failed: {status:?}");
                    return vec![];
                }
                let range = match self.conn.service_range {
                    Some(range) if self.service_found => range,
                    _ => {
                        warn!("service {SERVICE_UUID:#06x} not found on {}", self.target);
                        return vec![];
                    }
                };
                self.state = GattState::DiscoveringCharacteristics;
                vec![GattAction::QueryCharacteristic {
                    conn_id: self.conn.conn_id,
                    range,
                    uuid: CHARACTERISTIC_UUID,
                }]
            }
            GattEvent::CharacteristicLookup { status, count, handle } => {
                let in_service = self.conn.service_range.is_some_and(|range| range.contains(handle));
                match status {
                    GattStatus::Ok if count > 0 && handle != 0 && !in_service => {
                        warn!("characteristic handle {handle:#06x} lies outside the service, ignoring");
                    }
                    GattStatus::Ok if count > 0 && handle != 0 => {
                        info!("bulb ready, characteristic handle {handle:#06x}");
                        self.conn.characteristic_handle = handle;
                        self.connecting = false;
                        self.state = GattState::Ready;
                    }
                    GattStatus::Ok => warn!("characteristic {CHARACTERISTIC_UUID:#06x} not found"),
                    GattStatus::NoResources => error!("characteristic lookup out of resources, giving up"),
                    GattStatus::Failed(code) => warn!("characteristic lookup failed: {code}"),
                }
                vec![]
            }
            GattEvent::WriteComplete { status } => {
                if !status.is_ok() {
                    warn!("write failed: {status:?}");
                }
                vec![]
            }
            GattEvent::ReadComplete { status, value } => {
                if !status.is_ok() {
                    warn!("read failed: {status:?}");
                } else {
                    debug!("read {} bytes", value.len());
                }
                vec![]
            }
            GattEvent::Disconnected { reason } => {
                info!("disconnected from {} (reason {reason:#x}), rescanning", self.target);
                self.conn.tear_down();
                self.connecting = false;
                self.service_found = false;
                self.state = GattState::Disconnected;
                vec![scan()]
            }
            GattEvent::Watchdog => self.on_watchdog(),
        }
    }

    fn on_watchdog(&mut self) -> Vec<GattAction> {
        match self.state {
            GattState::Connecting if !self.conn.connected => {
                warn!("connect to {} stalled, rescanning", self.target);
                self.connecting = false;
                self.state = GattState::Disconnected;
                vec![scan()]
            }
            GattState::Connecting
            | GattState::MtuNegotiating
            | GattState::DiscoveringServices
            | GattState::DiscoveringCharacteristics => {
                warn!("discovery on {} stalled in {:?}, closing", self.target, self.state);
                vec![GattAction::Close { conn_id: self.conn.conn_id }]
            }
            _ => vec![],
        }
    }

    pub fn set_color(&self, rgb: Rgb) -> Result<GattAction, GattError> {
        self.write(BulbCommand::Colour { r: rgb.r, g: rgb.g, b: rgb.b })
    }

    pub fn turn_off(&self) -> Result<GattAction, GattError> {
        self.write(BulbCommand::Off)
    }

    /// Read back the characteristic, answered by a `ReadComplete` event
    pub fn request_state(&self) -> Result<GattAction, GattError> {
        if !self.conn.is_ready() {
            return Err(GattError::NotReady);
        }
        Ok(GattAction::Read { conn_id: self.conn.conn_id, handle: self.conn.characteristic_handle })
    }

    fn write(&self, command: BulbCommand) -> Result<GattAction, GattError> {
        if !self.conn.is_ready() {
            return Err(GattError::NotReady);
        }
        Ok(GattAction::Write {
            conn_id: self.conn.conn_id,
            handle: self.conn.characteristic_handle,
            payload: command.to_bytes(),
            no_response: true,
        })
    }
}

fn scan() -> GattAction {
    GattAction::StartScan { duration_secs: SCAN_DURATION_SECS }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BULB: BdAddr = BdAddr([0xA4, 0xC1, 0x38, 0x12, 0x34, 0x56]);
    const OTHER: BdAddr = BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const RANGE: HandleRange = HandleRange { start: 0x0010, end: 0x0020 };

    fn scanning() -> GattClient {
        let mut client = GattClient::new(BULB);
        assert_eq!(client.start(), vec![GattAction::Register { app_id: 0 }]);
        assert_eq!(
            client.handle(GattEvent::Registered { status: GattStatus::Ok, interface: 3 }),
            vec![GattAction::SetScanParams(ScanParams::DEFAULT)]
        );
        assert_eq!(
            client.handle(GattEvent::ScanParamsSet { status: GattStatus::Ok }),
            vec![GattAction::StartScan { duration_secs: 30 }]
        );
        client.handle(GattEvent::ScanStarted { status: GattStatus::Ok });
        assert_eq!(client.state(), GattState::Scanning);
        client
    }

    fn ready() -> GattClient {
        let mut client = scanning();
        client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public });
        client.handle(GattEvent::Connected { conn_id: 7, remote: BULB });
        client.handle(GattEvent::MtuConfigured { status: GattStatus::Ok, mtu: 23 });
        client.handle(GattEvent::ServiceFound { uuid: SERVICE_UUID, range: RANGE });
        client.handle(GattEvent::SearchComplete { status: GattStatus::Ok });
        client.handle(GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 1, handle: 0x0012 });
        assert_eq!(client.state(), GattState::Ready);
        client
    }

    #[test]
    fn walk_to_ready() {
        let mut client = scanning();
        assert_eq!(client.connection().interface, Some(3));

        assert_eq!(
            client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public }),
            vec![GattAction::StopScan, GattAction::Open { address: BULB, addr_type: AddrType::Public }]
        );
        assert_eq!(client.state(), GattState::Connecting);
        assert!(client.handle(GattEvent::ScanComplete).is_empty());

        assert_eq!(
            client.handle(GattEvent::Connected { conn_id: 7, remote: BULB }),
            vec![GattAction::RequestMtu { conn_id: 7, mtu: 500 }]
        );
        assert_eq!(client.state(), GattState::MtuNegotiating);

        assert_eq!(
            client.handle(GattEvent::MtuConfigured { status: GattStatus::Failed(1), mtu: 23 }),
            vec![GattAction::SearchService { conn_id: 7, uuid: 0xFFB0 }]
        );
        assert_eq!(client.state(), GattState::DiscoveringServices);

        assert!(client.handle(GattEvent::ServiceFound { uuid: 0x1800, range: HandleRange::ALL }).is_empty());
        assert!(client.handle(GattEvent::ServiceFound { uuid: SERVICE_UUID, range: RANGE }).is_empty());
        assert_eq!(
            client.handle(GattEvent::SearchComplete { status: GattStatus::Ok }),
            vec![GattAction::QueryCharacteristic { conn_id: 7, range: RANGE, uuid: 0xFFB2 }]
        );
        assert_eq!(client.state(), GattState::DiscoveringCharacteristics);
        assert!(!client.is_ready());

        client.handle(GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 1, handle: 0x0012 });
        assert_eq!(client.state(), GattState::Ready);
        assert!(client.is_ready());
        assert_eq!(client.connection().remote, Some(BULB));
        assert_eq!(client.connection().service_range, Some(RANGE));
    }

    #[test]
    fn foreign_advertisements_are_ignored() {
        let mut client = scanning();
        assert!(client.handle(GattEvent::Advertisement { address: OTHER, addr_type: AddrType::Random }).is_empty());
        assert_eq!(client.state(), GattState::Scanning);
    }

    #[test]
    fn repeated_advertisements_open_once() {
        let mut client = scanning();
        let adv = GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public };
        assert_eq!(client.handle(adv.clone()).len(), 2);
        assert!(client.handle(adv).is_empty());
    }

    #[test]
    fn scan_without_target_restarts() {
        let mut client = scanning();
        assert_eq!(client.handle(GattEvent::ScanComplete), vec![GattAction::StartScan { duration_secs: 30 }]);
    }

    #[test]
    fn failures_hold_state() {
        let mut client = GattClient::new(BULB);
        client.start();
        assert!(client.handle(GattEvent::Registered { status: GattStatus::Failed(-1), interface: 0 }).is_empty());
        assert_eq!(client.connection().interface, None);

        let mut client = scanning();
        client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public });
        assert!(client.handle(GattEvent::OpenFailed { status: GattStatus::Failed(2) }).is_empty());
        assert_eq!(client.state(), GattState::Connecting);

        client.handle(GattEvent::Connected { conn_id: 1, remote: BULB });
        client.handle(GattEvent::MtuConfigured { status: GattStatus::Ok, mtu: 247 });
        assert!(client.handle(GattEvent::SearchComplete { status: GattStatus::Ok }).is_empty());
        assert_eq!(client.state(), GattState::DiscoveringServices);

        client.handle(GattEvent::ServiceFound { uuid: SERVICE_UUID, range: RANGE });
        client.handle(GattEvent::SearchComplete { status: GattStatus::Ok });
        client.handle(GattEvent::CharacteristicLookup { status: GattStatus::NoResources, count: 0, handle: 0 });
        assert_eq!(client.state(), GattState::DiscoveringCharacteristics);
        client.handle(GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 0, handle: 0 });
        assert_eq!(client.state(), GattState::DiscoveringCharacteristics);
        assert!(!client.is_ready());
    }

    #[test]
    fn characteristic_outside_service_is_rejected() {
        let mut client = scanning();
        client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public });
        client.handle(GattEvent::Connected { conn_id: 7, remote: BULB });
        client.handle(GattEvent::MtuConfigured { status: GattStatus::Ok, mtu: 500 });
        client.handle(GattEvent::ServiceFound { uuid: SERVICE_UUID, range: RANGE });
        client.handle(GattEvent::SearchComplete { status: GattStatus::Ok });

        client.handle(GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 1, handle: 0x0030 });
        assert_eq!(client.state(), GattState::DiscoveringCharacteristics);
        assert_eq!(client.connection().characteristic_handle, 0);
        assert_eq!(client.set_color(Rgb::new(1, 2, 3)), Err(GattError::NotReady));

        client.handle(GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 1, handle: RANGE.end });
        assert!(client.is_ready());
    }

    #[test]
    fn disconnect_clears_link_and_rescans() {
        let mut client = ready();
        assert_eq!(
            client.handle(GattEvent::Disconnected { reason: 0x13 }),
            vec![GattAction::StartScan { duration_secs: 30 }]
        );
        assert_eq!(client.state(), GattState::Disconnected);
        assert!(!client.is_ready());
        assert_eq!(
            client.connection(),
            &PeripheralConnection { interface: Some(3), ..Default::default() }
        );

        client.handle(GattEvent::ScanStarted { status: GattStatus::Ok });
        assert_eq!(client.state(), GattState::Scanning);
        assert_eq!(
            client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public }).len(),
            2
        );
    }

    #[test]
    fn watchdog_abandons_stalled_attempts() {
        let mut client = scanning();
        client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public });
        assert_eq!(client.handle(GattEvent::Watchdog), vec![GattAction::StartScan { duration_secs: 30 }]);
        assert_eq!(client.state(), GattState::Disconnected);

        client.handle(GattEvent::ScanStarted { status: GattStatus::Ok });
        client.handle(GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public });
        client.handle(GattEvent::Connected { conn_id: 9, remote: BULB });
        assert_eq!(client.handle(GattEvent::Watchdog), vec![GattAction::Close { conn_id: 9 }]);

        assert!(ready().handle(GattEvent::Watchdog).is_empty());
    }

    #[test]
    fn operations_need_a_characteristic() {
        let client = scanning();
        assert_eq!(client.set_color(Rgb::new(1, 2, 3)), Err(GattError::NotReady));
        assert_eq!(client.turn_off(), Err(GattError::NotReady));
        assert_eq!(client.request_state(), Err(GattError::NotReady));
    }

    #[test]
    fn operations_when_ready() {
        let client = ready();
        assert_eq!(
            client.set_color(Rgb::new(0, 204, 0)),
            Ok(GattAction::Write { conn_id: 7, handle: 0x0012, payload: [0xD0, 0, 204, 0], no_response: true })
        );
        assert_eq!(
            client.turn_off(),
            Ok(GattAction::Write { conn_id: 7, handle: 0x0012, payload: [0xD0, 0, 0, 0], no_response: true })
        );
        assert_eq!(client.request_state(), Ok(GattAction::Read { conn_id: 7, handle: 0x0012 }));
    }

    #[test]
    fn address_parsing() {
        let addr: BdAddr = "A4:c1:38:12:34:56".parse().unwrap();
        assert_eq!(addr, BULB);
        assert_eq!(addr.to_string(), "a4:c1:38:12:34:56");
        assert_eq!("a4-c1-38-12-34-56".parse::<BdAddr>(), Ok(BULB));

        assert!("a4:c1:38:12:34".parse::<BdAddr>().is_err());
        assert!("a4:c1:38:12:34:56:78".parse::<BdAddr>().is_err());
        assert!("a4:c1:38:12:34:zz".parse::<BdAddr>().is_err());
        assert!("a4:c1:38:12:34:5".parse::<BdAddr>().is_err());
    }

    #[test]
    fn handle_range() {
        assert!(RANGE.contains(0x0012));
        assert!(!RANGE.contains(0x0021));
        assert!(HandleRange::ALL.contains(0xFFFF));
    }
}
