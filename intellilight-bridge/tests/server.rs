//! TCP and UDP servers answering over loopback

use std::io::Write;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use intellilight_bridge::server::{serve_discovery, serve_tcp};
use intellilight_bridge::{BdAddr, Bridge, GattAction, SharedState};
use intellilight_proto::sysinfo::DeviceIdentity;
use intellilight_proto::{decode, encode, read_frame, write_frame};
use serde_json::Value;

const TIMEOUT: Duration = Duration::from_secs(5);

fn bridge() -> (Bridge<mpsc::Sender<GattAction>>, mpsc::Receiver<GattAction>) {
    let (tx, rx) = mpsc::channel();
    let identity = DeviceIdentity::from_mac([0x02, 0, 0, 0, 0, 0x01], "Loopback");
    (Bridge::new(SharedState::shared(BdAddr([1, 2, 3, 4, 5, 6])), tx, identity), rx)
}

#[test]
fn tcp_session_answers_every_request() {
    let (bridge, _rx) = bridge();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || serve_tcp(listener, &bridge));

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();

    write_frame(&mut stream, br#"{"system":{"get_sysinfo":{}}}"#).unwrap();
    let info: Value = serde_json::from_slice(&read_frame(&mut stream).unwrap()).unwrap();
    assert_eq!(info["system"]["get_sysinfo"]["alias"], "Loopback");
    assert_eq!(info["system"]["get_sysinfo"]["mic_mac"], "020000000001");

    // garbage gets no answer but keeps the connection open
    write_frame(&mut stream, b"{{{").unwrap();

    write_frame(&mut stream, br#"{"smartlife.iot.common.cloud":{"bind":{}}}"#).unwrap();
    let bind: Value = serde_json::from_slice(&read_frame(&mut stream).unwrap()).unwrap();
    assert_eq!(bind["smartlife.iot.common.cloud"]["bind"]["err_code"], 0);
}

#[test]
fn tcp_serves_clients_one_after_another() {
    let (bridge, _rx) = bridge();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || serve_tcp(listener, &bridge));

    for _ in 0..2 {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream.write_all(&encode(br#"{"smartlife.iot.smartbulb.lightingservice":{"get_light_state":{}}}"#, true)).unwrap();
        let reply: Value = serde_json::from_slice(&read_frame(&mut stream).unwrap()).unwrap();
        assert_eq!(reply["smartlife.iot.smartbulb.lightingservice"]["get_light_state"]["on_off"], 0);
    }
}

#[test]
fn udp_discovery_replies_without_header() {
    let (bridge, _rx) = bridge();
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    thread::spawn(move || serve_discovery(socket, &bridge));

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    client.send_to(&encode(br#"{"system":{"get_sysinfo":{}}}"#, false), addr).unwrap();

    let mut buf = [0u8; 4096];
    let (n, from) = client.recv_from(&mut buf).unwrap();
    assert_eq!(from, addr);
    let info: Value = serde_json::from_slice(&decode(&buf[..n], false)).unwrap();
    assert_eq!(info["system"]["get_sysinfo"]["model"], "KL130B(UN)");
}
