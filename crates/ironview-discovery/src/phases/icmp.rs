//! ICMP echo sweep (discovery phase 5).
//!
//! Uses unprivileged ICMP datagram sockets, so it works without elevation on
//! stock Linux (net.ipv4.ping_group_range permitting). Targets are probed in
//! chunks; each chunk sends its echoes and then listens until the chunk
//! deadline.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use ironview_core::{config::discovery, Error, Result};

const ECHO_REQUEST: u8 = 8;
const ECHO_REPLY: u8 = 0;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum = sum.wrapping_add(word as u32);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn echo_request(seq: u16) -> [u8; 16] {
    let mut packet = [0u8; 16];
    packet[0] = ECHO_REQUEST;
    // code 0, checksum 0 while computing; the kernel rewrites the id.
    packet[6] = (seq >> 8) as u8;
    packet[7] = (seq & 0xff) as u8;
    packet[8..].copy_from_slice(b"ironview");
    let sum = checksum(&packet);
    packet[2] = (sum >> 8) as u8;
    packet[3] = (sum & 0xff) as u8;
    packet
}

fn sweep_chunk(targets: &[Ipv4Addr], timeout: Duration) -> Result<HashSet<Ipv4Addr>> {
    let socket = match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
        Ok(socket) => socket,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(Error::Permission(format!("icmp datagram socket: {e}")))
        }
        Err(e) => return Err(Error::Transport(format!("icmp socket: {e}"))),
    };
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| Error::Transport(format!("icmp socket timeout: {e}")))?;

    for (seq, target) in targets.iter().enumerate() {
        let packet = echo_request(seq as u16);
        let addr = SocketAddr::V4(SocketAddrV4::new(*target, 0));
        if let Err(e) = socket.send_to(&packet, &addr.into()) {
            debug!("icmp send to {target} failed: {e}");
        }
    }

    let wanted: HashSet<Ipv4Addr> = targets.iter().copied().collect();
    let mut alive = HashSet::new();
    let deadline = Instant::now() + timeout;
    let mut buf = [MaybeUninit::<u8>::uninit(); 512];

    while Instant::now() < deadline && alive.len() < wanted.len() {
        match socket.recv_from(&mut buf) {
            Ok((size, addr)) => {
                if size == 0 {
                    continue;
                }
                // Datagram ICMP sockets deliver the ICMP header directly.
                let first = unsafe { buf[0].assume_init() };
                if first != ECHO_REPLY {
                    continue;
                }
                if let Some(v4) = addr.as_socket_ipv4() {
                    let ip = *v4.ip();
                    if wanted.contains(&ip) {
                        alive.insert(ip);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                debug!("icmp recv error: {e}");
                break;
            }
        }
    }

    Ok(alive)
}

/// Ping every target, chunked. Returns the set of responders.
pub async fn ping_sweep(targets: &[Ipv4Addr], timeout: Duration) -> Result<HashSet<Ipv4Addr>> {
    let mut alive = HashSet::new();
    for chunk in targets.chunks(discovery::ICMP_CHUNK) {
        let chunk = chunk.to_vec();
        let found = tokio::task::spawn_blocking(move || sweep_chunk(&chunk, timeout))
            .await
            .map_err(|e| Error::Transport(format!("icmp task: {e}")))??;
        alive.extend(found);
    }
    Ok(alive)
}
