//! Deep port scan (discovery phase 7, optional).
//!
//! Shells out to nmap for hosts that already showed an industrial port and
//! parses its greppable output. A missing nmap binary or a per-host timeout
//! degrades to no findings; the pipeline records the phase as partial.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use ironview_core::{Error, Result};

/// One port row from the deep scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepFinding {
    pub port: u16,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
}

/// Parse nmap's greppable (`-oG -`) output.
///
/// Port entries look like `502/open/tcp//mbap//Schneider PLC/` with fields
/// port/state/protocol/owner/service/rpc/version.
pub fn parse_greppable(output: &str) -> Vec<DeepFinding> {
    let mut findings = Vec::new();
    for line in output.lines() {
        let Some(ports_section) = line.split("Ports:").nth(1) else {
            continue;
        };
        let ports_section = ports_section.split("Ignored State:").next().unwrap_or("");
        for entry in ports_section.split(',') {
            let fields: Vec<&str> = entry.trim().split('/').collect();
            if fields.len() < 5 {
                continue;
            }
            let Ok(port) = fields[0].parse::<u16>() else {
                continue;
            };
            let service = (!fields[4].is_empty()).then(|| fields[4].to_string());
            let product = fields
                .get(6)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string());
            findings.push(DeepFinding {
                port,
                state: fields[1].to_string(),
                service,
                product,
            });
        }
    }
    findings
}

/// Run nmap against one host.
pub async fn scan_host(ip: Ipv4Addr, per_host_timeout: Duration) -> Result<Vec<DeepFinding>> {
    let child = Command::new("nmap")
        .args(["-p-", "-T4", "-sT", "-oG", "-"])
        .arg(ip.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(per_host_timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Error::DiscoveryPartial {
                phase: "deep".into(),
                detail: format!("nmap unavailable: {e}"),
            })
        }
        Err(_) => {
            return Err(Error::DiscoveryPartial {
                phase: "deep".into(),
                detail: format!("nmap timed out for {ip}"),
            })
        }
    };

    if !output.status.success() {
        debug!("nmap exited with {:?} for {ip}", output.status.code());
    }
    Ok(parse_greppable(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Nmap 7.94 scan initiated
Host: 10.0.0.5 ()\tStatus: Up
Host: 10.0.0.5 ()\tPorts: 102/open/tcp//iso-tsap///, 502/open/tcp//mbap//Schneider Electric PLC/, 80/open/tcp//http//lighttpd 1.4.59/\tIgnored State: closed (65532)
# Nmap done
";

    #[test]
    fn test_parse_greppable() {
        let findings = parse_greppable(SAMPLE);
        assert_eq!(findings.len(), 3);

        assert_eq!(findings[0].port, 102);
        assert_eq!(findings[0].state, "open");
        assert_eq!(findings[0].service.as_deref(), Some("iso-tsap"));
        assert_eq!(findings[0].product, None);

        assert_eq!(findings[1].port, 502);
        assert_eq!(findings[1].service.as_deref(), Some("mbap"));
        assert_eq!(findings[1].product.as_deref(), Some("Schneider Electric PLC"));

        assert_eq!(findings[2].port, 80);
        assert_eq!(findings[2].product.as_deref(), Some("lighttpd 1.4.59"));
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(parse_greppable("# comment only\nHost: x Status: Up\n").is_empty());
        assert!(parse_greppable("").is_empty());
    }
}
