//! Active ARP sweep (discovery phase 3).
//!
//! Broadcasts one ARP request per host address of the interface's CIDR and
//! collects the replies as (ip, mac) pairs. Needs the raw-socket capability.

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pnet::datalink::{self, Channel};
use pnet::packet::arp::{
    ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket,
};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use tracing::debug;

use ironview_core::{Error, Result};

use crate::interfaces::NetInterface;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Upper bound of addresses swept per interface; larger networks are
/// truncated and reported partial by the pipeline.
pub const MAX_SWEEP_ADDRESSES: usize = 4096;

/// One ARP answer.
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: String,
    pub network: String,
}

fn build_request(buffer: &mut [u8; 42], source_mac: MacAddr, source_ip: Ipv4Addr, target: Ipv4Addr) {
    let mut ethernet = MutableEthernetPacket::new(buffer).expect("42-byte frame");
    ethernet.set_destination(MacAddr::broadcast());
    ethernet.set_source(source_mac);
    ethernet.set_ethertype(EtherTypes::Arp);

    let mut arp = MutableArpPacket::new(ethernet.payload_mut()).expect("28-byte payload");
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(source_mac);
    arp.set_sender_proto_addr(source_ip);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(target);
}

/// Sweep one interface. Returns the replies collected within `timeout`.
pub async fn sweep_interface(iface: &NetInterface, timeout: Duration) -> Result<Vec<ArpEntry>> {
    let name = iface.name.clone();
    let network = iface.network;
    let source_ip = iface.ip;

    tokio::task::spawn_blocking(move || {
        let Some(raw_iface) = datalink::interfaces().into_iter().find(|i| i.name == name) else {
            return Err(Error::DiscoveryPartial {
                phase: "arp".into(),
                detail: format!("interface {name} disappeared"),
            });
        };
        let Some(source_mac) = raw_iface.mac else {
            return Err(Error::DiscoveryPartial {
                phase: "arp".into(),
                detail: format!("interface {name} has no MAC"),
            });
        };

        let config = datalink::Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };
        let (mut tx, mut rx) = match datalink::channel(&raw_iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => {
                return Err(Error::DiscoveryPartial {
                    phase: "arp".into(),
                    detail: format!("interface {name}: unsupported channel type"),
                })
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(Error::Permission(format!("raw socket on {name}: {e}")))
            }
            Err(e) => return Err(Error::Transport(format!("arp channel on {name}: {e}"))),
        };

        let mut buffer = [0u8; 42];
        let mut sent = 0usize;
        for target in network.iter() {
            if target == source_ip || target == network.network() || target == network.broadcast() {
                continue;
            }
            if sent >= MAX_SWEEP_ADDRESSES {
                break;
            }
            build_request(&mut buffer, source_mac, source_ip, target);
            if let Some(Err(e)) = tx.send_to(&buffer, None) {
                debug!("arp send on {name} failed: {e}");
                break;
            }
            sent += 1;
        }

        let deadline = Instant::now() + timeout;
        let mut entries = Vec::new();
        while Instant::now() < deadline {
            match rx.next() {
                Ok(frame) => {
                    let Some(packet) = EthernetPacket::new(frame) else {
                        continue;
                    };
                    if packet.get_ethertype() != EtherTypes::Arp {
                        continue;
                    }
                    let Some(arp) = ArpPacket::new(packet.payload()) else {
                        continue;
                    };
                    if arp.get_operation() != ArpOperations::Reply {
                        continue;
                    }
                    entries.push(ArpEntry {
                        ip: arp.get_sender_proto_addr(),
                        mac: arp.get_sender_hw_addr().to_string().to_ascii_lowercase(),
                        interface: name.clone(),
                        network: network.to_string(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("arp read error on {name}: {e}");
                    break;
                }
            }
        }

        debug!(
            "arp sweep on {name}: {sent} requests, {} replies",
            entries.len()
        );
        Ok(entries)
    })
    .await
    .map_err(|e| Error::Transport(format!("arp task: {e}")))?
}
