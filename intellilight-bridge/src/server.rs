//! Blocking LAN servers over std::net
//!
//! TCP clients are served one at a time; further connections wait in the
//! listen backlog. UDP discovery datagrams carry no length header.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};

use intellilight_proto::{HEADER_LEN, MAX_FRAME_LEN};
use log::*;

use crate::bridge::{Bridge, BulbLink};

const READ_CHUNK: usize = 4096;

/// Accept and serve TCP clients until the listener fails
pub fn serve_tcp<L: BulbLink>(listener: TcpListener, bridge: &Bridge<L>) -> io::Result<()> {
    info!("Kasa TCP server listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };
        info!("client {peer} connected");

        match serve_connection(stream, bridge) {
            Ok(()) => info!("client {peer} closed the connection"),
            Err(e) => warn!("client {peer}: {e}"),
        }
    }
}

/// Answer requests on one connection until the peer closes it
pub fn serve_connection<L: BulbLink>(mut stream: TcpStream, bridge: &Bridge<L>) -> io::Result<()> {
    let mut pending = Vec::new();
    while let Some(request) = next_request(&mut stream, &mut pending)? {
        let reply = bridge.handle_request(&request, true);
        if reply.is_empty() {
            continue;
        }
        stream.write_all(&reply)?;
        stream.flush()?;
    }
    Ok(())
}

/// Next framed request, `None` once the peer has closed
///
/// A request may arrive split across several reads, or several requests in
/// one read; bytes past the current frame stay in `pending`.
fn next_request<R: Read>(reader: &mut R, pending: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(request) = split_request(pending) {
            return Ok(Some(request));
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            // whatever is left goes to the codec as is
            return Ok((!pending.is_empty()).then(|| std::mem::take(pending)));
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}

fn split_request(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let header = pending.first_chunk::<HEADER_LEN>()?;
    let wanted = u32::from_be_bytes(*header) as usize;
    if wanted > MAX_FRAME_LEN {
        // not a header we can honour, let the codec decide
        return Some(std::mem::take(pending));
    }
    let total = HEADER_LEN + wanted;
    if pending.len() < total {
        return None;
    }
    let rest = pending.split_off(total);
    Some(std::mem::replace(pending, rest))
}

/// Answer Kasa discovery broadcasts until the socket fails
pub fn serve_discovery<L: BulbLink>(socket: UdpSocket, bridge: &Bridge<L>) -> io::Result<()> {
    info!("Kasa discovery listening on {}", socket.local_addr()?);

    let mut buf = [0u8; READ_CHUNK];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                warn!("discovery receive failed: {e}");
                continue;
            }
        };
        debug!("discovery datagram from {peer} ({n} bytes)");

        let reply = bridge.handle_request(&buf[..n], false);
        if reply.is_empty() {
            continue;
        }
        if let Err(e) = socket.send_to(&reply, peer) {
            warn!("discovery reply to {peer} failed: {e}");
        }
    }
}
