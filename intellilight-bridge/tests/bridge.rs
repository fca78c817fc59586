//! End-to-end bridge behaviour: ciphered Kasa requests in, GATT actions out

use std::sync::{Arc, Mutex};

use intellilight_bridge::gatt::{AddrType, HandleRange};
use intellilight_bridge::{
    BdAddr, Bridge, BulbLink, GattAction, GattEvent, GattStatus, LinkError, Shared, SharedState,
};
use intellilight_proto::ble::SERVICE_UUID;
use intellilight_proto::sysinfo::DeviceIdentity;
use intellilight_proto::{decode, encode};
use serde_json::{json, Value};

const BULB: BdAddr = BdAddr([0xA4, 0xC1, 0x38, 0x5E, 0x11, 0x02]);
const HANDLE: u16 = 0x002A;

#[derive(Clone, Default)]
struct RecordingLink(Arc<Mutex<Vec<GattAction>>>);

impl RecordingLink {
    fn take(&self) -> Vec<GattAction> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl BulbLink for RecordingLink {
    fn submit(&self, action: GattAction) -> Result<(), LinkError> {
        self.0.lock().unwrap().push(action);
        Ok(())
    }
}

fn connect(state: &Shared) {
    let mut state = state.lock().unwrap();
    state.gatt.start();
    for event in [
        GattEvent::Registered { status: GattStatus::Ok, interface: 4 },
        GattEvent::ScanParamsSet { status: GattStatus::Ok },
        GattEvent::ScanStarted { status: GattStatus::Ok },
        GattEvent::Advertisement { address: BULB, addr_type: AddrType::Public },
        GattEvent::Connected { conn_id: 0, remote: BULB },
        GattEvent::MtuConfigured { status: GattStatus::Ok, mtu: 500 },
        GattEvent::ServiceFound { uuid: SERVICE_UUID, range: HandleRange { start: 0x28, end: 0x30 } },
        GattEvent::SearchComplete { status: GattStatus::Ok },
        GattEvent::CharacteristicLookup { status: GattStatus::Ok, count: 1, handle: HANDLE },
    ] {
        state.dispatch(event);
    }
}

fn setup(ready: bool) -> (Bridge<RecordingLink>, RecordingLink) {
    let state = SharedState::shared(BULB);
    if ready {
        connect(&state);
    }
    let link = RecordingLink::default();
    (Bridge::new(state, link.clone(), DeviceIdentity::default()), link)
}

fn send(bridge: &Bridge<RecordingLink>, request: Value) -> Value {
    let reply = bridge.handle_request(&encode(request.to_string().as_bytes(), true), true);
    assert!(!reply.is_empty(), "no reply to {request}");
    serde_json::from_slice(&decode(&reply, true)).unwrap()
}

fn transition(fields: Value) -> Value {
    json!({"smartlife.iot.smartbulb.lightingservice": {"transition_light_state": fields}})
}

fn write(payload: [u8; 4]) -> GattAction {
    GattAction::Write { conn_id: 0, handle: HANDLE, payload, no_response: true }
}

#[test]
fn green_at_eighty_percent() {
    let (bridge, link) = setup(true);
    let reply = send(&bridge, transition(json!({"hue":120,"saturation":100,"brightness":80,"on_off":1})));

    assert_eq!(link.take(), vec![write([0xD0, 0, 204, 0])]);
    assert_eq!(
        reply["smartlife.iot.smartbulb.lightingservice"]["transition_light_state"],
        json!({"on_off":1,"mode":"normal","hue":120,"saturation":100,"brightness":80,"color_temp":0,"err_code":0})
    );
}

#[test]
fn partial_updates_keep_other_fields() {
    let (bridge, link) = setup(true);
    send(&bridge, transition(json!({"hue":240,"saturation":100,"brightness":100})));
    send(&bridge, transition(json!({"brightness":50})));

    assert_eq!(link.take(), vec![write([0xD0, 0, 0, 255]), write([0xD0, 0, 0, 128])]);
    assert!(bridge.state().lock().unwrap().light.on_off);
}

#[test]
fn off_then_sysinfo_reports_remembered_colour() {
    let (bridge, link) = setup(true);
    send(&bridge, transition(json!({"hue":300,"saturation":50,"brightness":70,"on_off":1})));
    let off = send(&bridge, transition(json!({"on_off":0,"hue":10,"brightness":5})));
    assert_eq!(off["smartlife.iot.smartbulb.lightingservice"]["transition_light_state"], json!({"on_off":0,"err_code":0}));

    let info = send(&bridge, json!({"system":{"get_sysinfo":null}}));
    let light = &info["system"]["get_sysinfo"]["light_state"];
    assert_eq!(light["on_off"], 0);
    assert_eq!(light["dft_on_state"]["hue"], 300);
    assert_eq!(light["dft_on_state"]["saturation"], 50);
    assert_eq!(light["dft_on_state"]["brightness"], 70);
    assert!(light.get("hue").is_none());

    let actions = link.take();
    assert_eq!(actions[1], write([0xD0, 0, 0, 0]));
    assert_eq!(actions[2], GattAction::Read { conn_id: 0, handle: HANDLE });
}

#[test]
fn turning_on_resumes_colour() {
    let (bridge, link) = setup(true);
    send(&bridge, transition(json!({"hue":0,"saturation":100,"brightness":100})));
    send(&bridge, transition(json!({"on_off":0})));
    send(&bridge, transition(json!({"on_off":1})));

    assert_eq!(
        link.take(),
        vec![write([0xD0, 255, 0, 0]), write([0xD0, 0, 0, 0]), write([0xD0, 255, 0, 0])]
    );
}

#[test]
fn readiness_gate() {
    let (bridge, link) = setup(false);
    send(&bridge, transition(json!({"hue":60,"saturation":100,"brightness":100,"on_off":1})));
    send(&bridge, transition(json!({"on_off":0})));
    assert!(link.take().is_empty());

    let light = bridge.state().lock().unwrap().light;
    assert!(!light.on_off);
    assert_eq!(light.details().hue, 60);

    // becomes usable once discovery finishes
    connect(bridge.state());
    send(&bridge, transition(json!({"on_off":1})));
    assert_eq!(link.take(), vec![write([0xD0, 255, 255, 0])]);
}

#[test]
fn off_while_not_ready_reports_the_model() {
    let (bridge, link) = setup(false);
    bridge.state().lock().unwrap().light.on_off = true;

    let reply = send(&bridge, transition(json!({"on_off":0})));
    assert!(link.take().is_empty());

    let light = bridge.state().lock().unwrap().light;
    assert!(light.on_off);
    let body = &reply["smartlife.iot.smartbulb.lightingservice"]["transition_light_state"];
    assert_eq!(body["on_off"], 1);
    assert_eq!(body["err_code"], 0);

    let info = send(&bridge, json!({"system":{"get_sysinfo":{}}}));
    assert_eq!(info["system"]["get_sysinfo"]["light_state"]["on_off"], body["on_off"]);
}

#[test]
fn read_back_reaches_sysinfo() {
    let (bridge, _link) = setup(true);
    bridge
        .state()
        .lock()
        .unwrap()
        .dispatch(GattEvent::ReadComplete { status: GattStatus::Ok, value: vec![0xD0, 0, 0, 255] });

    let info = send(&bridge, json!({"system":{"get_sysinfo":{}}}));
    let light = &info["system"]["get_sysinfo"]["light_state"];
    assert_eq!(light["on_off"], 1);
    assert_eq!(light["hue"], 240);
    assert_eq!(light["brightness"], 100);
}

#[test]
fn disconnect_closes_the_gate_again() {
    let (bridge, link) = setup(true);
    let actions = bridge.state().lock().unwrap().dispatch(GattEvent::Disconnected { reason: 0x08 });
    assert_eq!(actions, vec![GattAction::StartScan { duration_secs: 30 }]);

    send(&bridge, transition(json!({"hue":10,"on_off":1})));
    assert!(link.take().is_empty());
}

#[test]
fn headerless_discovery_request() {
    let (bridge, _link) = setup(false);
    let raw = encode(br#"{"system":{"get_sysinfo":{}}}"#, false);
    let reply = bridge.handle_request(&raw, false);
    let info: Value = serde_json::from_slice(&decode(&reply, false)).unwrap();
    assert_eq!(info["system"]["get_sysinfo"]["mic_type"], "IOT.SMARTBULB");
    assert_eq!(info["system"]["get_sysinfo"]["alias"], "Back Light");
}
