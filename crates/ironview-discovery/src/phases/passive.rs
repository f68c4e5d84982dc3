//! Passive sniff (discovery phase 2).
//!
//! Listens on an interface for `timeout` and collects the source ips of ARP,
//! ICMP and TCP traffic. Needs the raw-socket capability; without it the
//! phase reports [`ironview_core::Error::Permission`] and the pipeline
//! continues without passive evidence.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pnet::datalink::{self, Channel};
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use tracing::debug;

use ironview_core::{Error, Result};

use crate::interfaces::NetInterface;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

fn interesting_source(packet: &EthernetPacket<'_>) -> Option<Ipv4Addr> {
    match packet.get_ethertype() {
        EtherTypes::Arp => {
            let arp = ArpPacket::new(packet.payload())?;
            Some(arp.get_sender_proto_addr())
        }
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(packet.payload())?;
            let proto = ipv4.get_next_level_protocol();
            if proto == IpNextHeaderProtocols::Tcp || proto == IpNextHeaderProtocols::Icmp {
                Some(ipv4.get_source())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn usable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_multicast() && !ip.is_broadcast() && !ip.is_unspecified()
}

/// Sniff one interface for `timeout`.
pub async fn sniff_interface(iface: &NetInterface, timeout: Duration) -> Result<HashSet<Ipv4Addr>> {
    let name = iface.name.clone();

    tokio::task::spawn_blocking(move || {
        let Some(raw_iface) = datalink::interfaces().into_iter().find(|i| i.name == name) else {
            return Err(Error::DiscoveryPartial {
                phase: "passive".into(),
                detail: format!("interface {name} disappeared"),
            });
        };

        let config = datalink::Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };
        let mut rx = match datalink::channel(&raw_iface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(Error::DiscoveryPartial {
                    phase: "passive".into(),
                    detail: format!("interface {name}: unsupported channel type"),
                })
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(Error::Permission(format!(
                    "raw socket on {name}: {e}"
                )))
            }
            Err(e) => {
                return Err(Error::Transport(format!("sniff channel on {name}: {e}")))
            }
        };

        let deadline = Instant::now() + timeout;
        let mut sources = HashSet::new();

        while Instant::now() < deadline {
            match rx.next() {
                Ok(frame) => {
                    let Some(packet) = EthernetPacket::new(frame) else {
                        continue;
                    };
                    if let Some(ip) = interesting_source(&packet) {
                        if usable(ip) {
                            sources.insert(ip);
                        }
                    }
                }
                // Read timeouts just advance the deadline check.
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("sniff read error on {name}: {e}");
                    break;
                }
            }
        }

        Ok(sources)
    })
    .await
    .map_err(|e| Error::Transport(format!("sniff task: {e}")))?
}
