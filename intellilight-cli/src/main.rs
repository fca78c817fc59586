//! intellilight - talk to an IntelliLight bridge over the Kasa LAN protocol
//!
//! Works against any Kasa colour bulb as well, the bridge is indistinguishable.
//!
//! Usage:
//!   intellilight discover [--wait SECS]               - Broadcast a discovery request
//!   intellilight device <host> info                   - Print the device descriptor
//!   intellilight device <host> on                     - Turn the bulb on
//!   intellilight device <host> off                    - Turn the bulb off
//!   intellilight device <host> hsv <hue> <sat> <bri>  - Set a colour
//!   intellilight device <host> temp <kelvin> [bri]    - Set a white temperature
//!   intellilight device <host> raw '<json>'           - Send any request

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use intellilight_proto::async_io::{read_frame, write_frame};
use intellilight_proto::message::{GET_SYSINFO, LIGHTING_SERVICE, SYSTEM, TRANSITION_LIGHT_STATE};
use intellilight_proto::{decode, encode, KASA_PORT};
use serde_json::{json, Value};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "intellilight")]
#[command(about = "Control IntelliLight bridges over the Kasa LAN protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find bridges and Kasa devices on the local network
    Discover {
        /// How long to wait for answers, in seconds
        #[arg(short, long, default_value = "3")]
        wait: u64,
        /// Broadcast address to send to
        #[arg(long, default_value = "255.255.255.255")]
        broadcast: String,
    },
    /// Talk to one device
    Device {
        /// Host name or IP address
        host: String,
        /// TCP port
        #[arg(short, long, default_value_t = KASA_PORT)]
        port: u16,
        #[command(subcommand)]
        action: DeviceCommands,
    },
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// Print the device descriptor
    Info,
    /// Turn the bulb on at its last colour
    On,
    /// Turn the bulb off
    Off,
    /// Set hue (degrees), saturation and brightness (percent)
    Hsv {
        hue: u16,
        saturation: u8,
        brightness: u8,
    },
    /// Set a white colour temperature in Kelvin
    Temp {
        kelvin: u16,
        brightness: Option<u8>,
    },
    /// Send a raw JSON request and print the reply
    Raw { json: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover { wait, broadcast } => cmd_discover(&broadcast, Duration::from_secs(wait)).await?,
        Commands::Device { host, port, action } => run_device(&host, port, action).await?,
    }

    Ok(())
}

// ============================================================================
// Discovery
// ============================================================================

async fn cmd_discover(broadcast: &str, wait: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let request = json!({ SYSTEM: { GET_SYSINFO: {} } }).to_string();
    let target = format!("{broadcast}:{KASA_PORT}");
    socket.send_to(&encode(request.as_bytes(), false), &target).await?;
    println!("Discovering for {} seconds...", wait.as_secs());

    let mut found = 0;
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + wait;
    while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        let (n, from) = received?;
        match serde_json::from_slice::<Value>(&decode(&buf[..n], false)) {
            Ok(reply) => {
                found += 1;
                print_device(from, &reply[SYSTEM][GET_SYSINFO]);
            }
            Err(e) => println!("  {from}: unreadable reply ({e})"),
        }
    }

    if found == 0 {
        println!("No devices found.");
        println!("Make sure the bridge is on the same network and not behind a firewall.");
    }
    Ok(())
}

fn print_device(from: SocketAddr, info: &Value) {
    let alias = info["alias"].as_str().unwrap_or("?");
    let model = info["model"].as_str().unwrap_or("?");
    let mac = info["mic_mac"].as_str().unwrap_or("?");
    let on = info["light_state"]["on_off"].as_u64() == Some(1);
    println!("  {} - {} [{}] {} ({})", from.ip(), alias, model, mac, if on { "ON" } else { "OFF" });
}

// ============================================================================
// Device commands
// ============================================================================

async fn run_device(host: &str, port: u16, cmd: DeviceCommands) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        DeviceCommands::Info => {
            let reply = send(host, port, json!({ SYSTEM: { GET_SYSINFO: {} } })).await?;
            println!("{}", serde_json::to_string_pretty(&reply[SYSTEM][GET_SYSINFO])?);
        }
        DeviceCommands::On => {
            let reply = transition(host, port, json!({ "on_off": 1 })).await?;
            print_light(host, &reply);
        }
        DeviceCommands::Off => {
            let reply = transition(host, port, json!({ "on_off": 0 })).await?;
            print_light(host, &reply);
        }
        DeviceCommands::Hsv { hue, saturation, brightness } => {
            let reply = transition(
                host,
                port,
                json!({
                    "hue": hue % 360,
                    "saturation": saturation.min(100),
                    "brightness": brightness.min(100),
                    "color_temp": 0,
                    "on_off": 1
                }),
            )
            .await?;
            print_light(host, &reply);
        }
        DeviceCommands::Temp { kelvin, brightness } => {
            let mut fields = json!({ "color_temp": kelvin, "on_off": 1 });
            if let Some(brightness) = brightness {
                fields["brightness"] = json!(brightness.min(100));
            }
            let reply = transition(host, port, fields).await?;
            print_light(host, &reply);
        }
        DeviceCommands::Raw { json } => {
            let request: Value = serde_json::from_str(&json)?;
            let reply = send(host, port, request).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }

    Ok(())
}

async fn transition(host: &str, port: u16, fields: Value) -> Result<Value, Box<dyn std::error::Error>> {
    let reply = send(host, port, json!({ LIGHTING_SERVICE: { TRANSITION_LIGHT_STATE: fields } })).await?;
    Ok(reply[LIGHTING_SERVICE][TRANSITION_LIGHT_STATE].clone())
}

fn print_light(host: &str, state: &Value) {
    if state["on_off"].as_u64() == Some(1) {
        println!(
            "Bulb at {} is ON: hue {} saturation {} brightness {} color_temp {}",
            host, state["hue"], state["saturation"], state["brightness"], state["color_temp"]
        );
    } else {
        println!("Bulb at {} is OFF", host);
    }
}

/// One request/reply exchange over a fresh TCP connection
async fn send(host: &str, port: u16, request: Value) -> Result<Value, Box<dyn std::error::Error>> {
    let mut stream = timeout(REPLY_TIMEOUT, TcpStream::connect((host, port))).await??;
    write_frame(&mut stream, request.to_string().as_bytes()).await?;
    let reply = timeout(REPLY_TIMEOUT, read_frame(&mut stream)).await??;
    Ok(serde_json::from_slice(&reply)?)
}
