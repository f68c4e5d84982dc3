//! Quick TCP connect probe (discovery phase 6).
//!
//! Connect-scans the fixed industrial port set against every known ip.
//! Concurrency is bounded by the configured worker cap; each attempt carries
//! its own timeout.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;

/// Probe `targets` x `ports`. Returns the open ports per ip.
pub async fn probe_hosts(
    targets: &[Ipv4Addr],
    ports: &[u16],
    per_conn_timeout: Duration,
    max_workers: usize,
) -> HashMap<Ipv4Addr, Vec<u16>> {
    let attempts: Vec<(Ipv4Addr, u16)> = targets
        .iter()
        .flat_map(|ip| ports.iter().map(move |port| (*ip, *port)))
        .collect();

    let results = stream::iter(attempts)
        .map(|(ip, port)| async move {
            let addr = SocketAddr::from((ip, port));
            match tokio::time::timeout(per_conn_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => Some((ip, port)),
                _ => None,
            }
        })
        .buffer_unordered(max_workers.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut open: HashMap<Ipv4Addr, Vec<u16>> = HashMap::new();
    for (ip, port) in results.into_iter().flatten() {
        open.entry(ip).or_default().push(port);
    }
    for ports in open.values_mut() {
        ports.sort_unstable();
    }
    open
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_finds_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let targets = [Ipv4Addr::LOCALHOST];
        let open = probe_hosts(&targets, &[port], Duration::from_millis(500), 8).await;

        assert_eq!(open.get(&Ipv4Addr::LOCALHOST), Some(&vec![port]));
    }

    #[tokio::test]
    async fn test_closed_port_not_reported() {
        // Bind and drop to get a port that is almost surely closed.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let targets = [Ipv4Addr::LOCALHOST];
        let open = probe_hosts(&targets, &[port], Duration::from_millis(300), 8).await;
        assert!(open.is_empty());
    }
}
