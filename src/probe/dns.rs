//! DNS probe implementation using raw UDP packets.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use super::{FactSheet, ProbeError};
use crate::endpoint::DnsConfig;

/// Longest label a query name may carry.
pub const MAX_LABEL_LEN: usize = 63;

/// Record types a DNS endpoint may query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Mx,
    Aaaa,
}

impl RecordType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "NS" => Some(RecordType::Ns),
            "CNAME" => Some(RecordType::Cname),
            "MX" => Some(RecordType::Mx),
            "AAAA" => Some(RecordType::Aaaa),
            _ => None,
        }
    }

    fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Mx => 15,
            RecordType::Aaaa => 28,
        }
    }
}

/// Name of a response code as conditions spell it, e.g. `NOERROR`.
pub fn rcode_name(rcode: u8) -> String {
    let name = match rcode {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        6 => "YXDOMAIN",
        7 => "YXRRSET",
        8 => "NXRRSET",
        9 => "NOTAUTH",
        10 => "NOTZONE",
        other => return other.to_string(),
    };
    name.to_string()
}

/// A decoded DNS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub rcode: u8,
    /// Answer records of the queried type, rendered as text.
    pub records: Vec<String>,
}

/// Query the DNS server at `server` and record the outcome.
///
/// The first answer record becomes the body, so `[BODY]` conditions can
/// assert the resolved address.
pub async fn run_dns_query(server: &str, dns: &DnsConfig, timeout: Duration, facts: &mut FactSheet) {
    let start = Instant::now();
    let result = query(server, dns, timeout).await;
    facts.duration = start.elapsed();

    match result {
        Ok(answer) => {
            facts.connected = true;
            facts.dns_rcode = rcode_name(answer.rcode);
            if let Some(first) = answer.records.into_iter().next() {
                facts.body = Some(first.into_bytes());
            }
        }
        Err(e) => facts.add_error(e),
    }
}

/// Send a single query and decode the response.
pub async fn query(server: &str, dns: &DnsConfig, timeout: Duration) -> Result<DnsAnswer, ProbeError> {
    let record_type = RecordType::parse(&dns.query_type)
        .ok_or_else(|| ProbeError::Config(format!("unsupported query type: {}", dns.query_type)))?;

    // Ensure address has port
    let target = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:53", server)
    };
    let addr: SocketAddr = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to resolve {}: {}", target, e)))?
        .next()
        .ok_or_else(|| ProbeError::Network(format!("no address for {}", target)))?;

    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let tx_id: u16 = rand::random();
    let packet = build_dns_query(tx_id, &dns.query_name, record_type)?;
    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    let mut response = [0u8; 512];
    let n = tokio::time::timeout(timeout, socket.recv(&mut response))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;

    parse_dns_response(&response[..n], tx_id, record_type)
}

/// Build a query packet with recursion desired.
fn build_dns_query(tx_id: u16, name: &str, record_type: RecordType) -> Result<Vec<u8>, ProbeError> {
    let flags: u16 = 0x0100;
    let qd_count: u16 = 1;

    // Header (12 bytes)
    let mut packet = Vec::with_capacity(64);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&qd_count.to_be_bytes());
    packet.extend_from_slice(&[0; 6]); // an, ns, ar counts

    // Domain name encoding: length-prefixed labels
    for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        let len = u8::try_from(label.len())
            .ok()
            .filter(|&len| usize::from(len) <= MAX_LABEL_LEN)
            .ok_or_else(|| malformed("query name label longer than 63 bytes"))?;
        packet.push(len);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&record_type.code().to_be_bytes());
    // QCLASS: IN (1)
    packet.extend_from_slice(&1u16.to_be_bytes());

    Ok(packet)
}

fn malformed(what: &str) -> ProbeError {
    ProbeError::Dns(what.to_string())
}

fn read_u16(packet: &[u8], pos: usize) -> Result<u16, ProbeError> {
    packet
        .get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed("truncated packet"))
}

/// Read a possibly compressed domain name starting at `start`.
///
/// Returns the name with a trailing dot and the offset just past it.
fn read_name(packet: &[u8], start: usize) -> Result<(String, usize), ProbeError> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *packet.get(pos).ok_or_else(|| malformed("truncated name"))? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xC0 == 0xC0 {
            let low = *packet.get(pos + 1).ok_or_else(|| malformed("truncated pointer"))? as usize;
            end.get_or_insert(pos + 2);
            jumps += 1;
            if jumps > 16 {
                return Err(malformed("compression loop"));
            }
            pos = ((len & 0x3F) << 8) | low;
            continue;
        }
        let label = packet
            .get(pos + 1..pos + 1 + len)
            .ok_or_else(|| malformed("truncated label"))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len;
    }

    let mut name = labels.join(".");
    name.push('.');
    Ok((name, end.unwrap_or(pos)))
}

/// Decode a response, keeping answers of the queried type.
fn parse_dns_response(packet: &[u8], tx_id: u16, record_type: RecordType) -> Result<DnsAnswer, ProbeError> {
    if packet.len() < 12 {
        return Err(ProbeError::Dns(format!("response too short: {} bytes", packet.len())));
    }

    let resp_tx_id = read_u16(packet, 0)?;
    if resp_tx_id != tx_id {
        return Err(ProbeError::Dns(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        )));
    }

    // RCODE is the lower 4 bits of byte 3
    let rcode = packet[3] & 0x0F;
    let qd_count = read_u16(packet, 4)?;
    let an_count = read_u16(packet, 6)?;

    let mut pos = 12;
    for _ in 0..qd_count {
        let (_, next) = read_name(packet, pos)?;
        pos = next + 4;
    }

    let mut records = Vec::new();
    for _ in 0..an_count {
        let (_, next) = read_name(packet, pos)?;
        let rtype = read_u16(packet, next)?;
        let rdlength = read_u16(packet, next + 8)? as usize;
        let rdata_start = next + 10;
        let rdata = packet
            .get(rdata_start..rdata_start + rdlength)
            .ok_or_else(|| malformed("truncated record data"))?;
        pos = rdata_start + rdlength;

        if rtype != record_type.code() {
            continue;
        }
        let record = match record_type {
            RecordType::A if rdata.len() == 4 => {
                Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string()
            }
            RecordType::Aaaa if rdata.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                Ipv6Addr::from(octets).to_string()
            }
            RecordType::Cname | RecordType::Ns => read_name(packet, rdata_start)?.0,
            RecordType::Mx => read_name(packet, rdata_start + 2)?.0,
            _ => return Err(malformed("unexpected record length")),
        };
        records.push(record);
    }

    Ok(DnsAnswer { rcode, records })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a response to `query` carrying the given A records.
    fn a_response(query: &[u8], rcode: u8, addresses: &[[u8; 4]]) -> Vec<u8> {
        let mut packet = query.to_vec();
        packet[2] = 0x81;
        packet[3] = 0x80 | rcode;
        packet[6..8].copy_from_slice(&(addresses.len() as u16).to_be_bytes());
        for address in addresses {
            packet.extend_from_slice(&[0xC0, 0x0C]); // pointer to the question name
            packet.extend_from_slice(&1u16.to_be_bytes());
            packet.extend_from_slice(&1u16.to_be_bytes());
            packet.extend_from_slice(&300u32.to_be_bytes());
            packet.extend_from_slice(&4u16.to_be_bytes());
            packet.extend_from_slice(address);
        }
        packet
    }

    #[test]
    fn test_build_dns_query() {
        let packet = build_dns_query(7, "example.com.", RecordType::A).unwrap();
        // 12 (header) + 13 (question name) + 4 (type/class)
        assert_eq!(packet.len(), 29);
        assert_eq!(&packet[12..25], b"\x07example\x03com\x00");
        assert_eq!(read_name(&packet, 12).unwrap(), ("example.com.".to_string(), 25));
    }

    #[test]
    fn test_build_dns_query_rejects_long_label() {
        let longest = format!("{}.com.", "a".repeat(MAX_LABEL_LEN));
        assert!(build_dns_query(1, &longest, RecordType::A).is_ok());

        let too_long = format!("{}.com.", "a".repeat(MAX_LABEL_LEN + 1));
        assert!(matches!(build_dns_query(1, &too_long, RecordType::A), Err(ProbeError::Dns(_))));
        let wraps = format!("{}.com.", "a".repeat(256));
        assert!(build_dns_query(1, &wraps, RecordType::A).is_err());
    }

    #[test]
    fn test_parse_a_records() {
        let query = build_dns_query(42, "example.com.", RecordType::A).unwrap();
        let response = a_response(&query, 0, &[[93, 184, 216, 34], [10, 0, 0, 1]]);

        let answer = parse_dns_response(&response, 42, RecordType::A).unwrap();
        assert_eq!(answer.rcode, 0);
        assert_eq!(answer.records, vec!["93.184.216.34", "10.0.0.1"]);
    }

    #[test]
    fn test_parse_rejects_mismatched_id() {
        let query = build_dns_query(1, "example.com.", RecordType::A).unwrap();
        let response = a_response(&query, 0, &[]);
        assert!(parse_dns_response(&response, 2, RecordType::A).is_err());
        assert!(parse_dns_response(&response[..8], 1, RecordType::A).is_err());
    }

    #[test]
    fn test_rcode_names() {
        assert_eq!(rcode_name(0), "NOERROR");
        assert_eq!(rcode_name(3), "NXDOMAIN");
        assert_eq!(rcode_name(15), "15");
    }

    #[tokio::test]
    async fn test_query_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let response = a_response(&buf[..n], 3, &[]);
            server.send_to(&response, peer).await.unwrap();
        });

        let dns = DnsConfig {
            query_name: "missing.example.".to_string(),
            query_type: "A".to_string(),
        };
        let mut facts = FactSheet::default();
        run_dns_query(&addr.to_string(), &dns, Duration::from_secs(2), &mut facts).await;

        assert!(facts.errors.is_empty(), "{:?}", facts.errors);
        assert!(facts.connected);
        assert_eq!(facts.dns_rcode, "NXDOMAIN");
        assert!(facts.body.is_none());
    }
}
