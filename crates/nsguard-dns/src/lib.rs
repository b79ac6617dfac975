//! UDP DNS probe.
//!
//! Production [`DnsQuery`] implementation: builds an A query for the canary
//! record with `hickory-proto`, sends it straight to the provider's
//! nameserver over UDP, and reports whether a usable answer came back.
//! Recursion is not requested; the probe asks the authoritative server
//! itself.
//!
//! Every failure mode (resolution, socket, timeout, bad response) becomes
//! an unsuccessful [`QueryOutcome`] with a message; this primitive never
//! errors at the call boundary.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use nsguard_core::{DnsQuery, QueryOutcome};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

const DNS_PORT: u16 = 53;
const RECV_BUFFER: usize = 1500;

pub struct UdpDnsQuery {
    timeout: Duration,
}

impl UdpDnsQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn query_inner(&self, nameserver: &str, domain: &str) -> Result<QueryOutcome, String> {
        let target = resolve_target(nameserver)
            .await
            .map_err(|e| format!("resolving {nameserver}: {e}"))?;

        let (id, request) = build_query(domain).map_err(|e| format!("building query: {e}"))?;

        let socket = UdpSocket::bind(local_bind_for(&target))
            .await
            .map_err(|e| format!("binding probe socket: {e}"))?;
        socket
            .send_to(&request, target)
            .await
            .map_err(|e| format!("sending to {target}: {e}"))?;

        let mut buf = [0u8; RECV_BUFFER];
        let (len, _from) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| format!("timeout after {}ms", self.timeout.as_millis()))?
            .map_err(|e| format!("receiving from {target}: {e}"))?;

        let response =
            Message::from_vec(&buf[..len]).map_err(|e| format!("parsing response: {e}"))?;
        if response.id() != id {
            return Err(format!(
                "response id {} does not match query id {id}",
                response.id()
            ));
        }

        debug!(
            nameserver,
            domain,
            rcode = ?response.response_code(),
            answers = response.answers().len(),
            "probe response"
        );

        Ok(match response.response_code() {
            ResponseCode::NoError => QueryOutcome::ok(),
            ResponseCode::NXDomain => QueryOutcome::failed("NXDOMAIN for canary record"),
            other => QueryOutcome::failed(format!("server returned {other}")),
        })
    }
}

#[async_trait]
impl DnsQuery for UdpDnsQuery {
    async fn query(&self, nameserver: &str, domain: &str) -> QueryOutcome {
        match self.query_inner(nameserver, domain).await {
            Ok(outcome) => outcome,
            Err(message) => QueryOutcome::failed(message),
        }
    }
}

/// Serialize an A query for `domain` without requesting recursion.
/// Returns the message id for response matching along with the wire bytes.
fn build_query(domain: &str) -> Result<(u16, Vec<u8>), String> {
    let name = Name::from_str(domain).map_err(|e| format!("invalid domain '{domain}': {e}"))?;

    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(RecordType::A);
    query.set_query_class(DNSClass::IN);

    let id = fastrand::u16(..);
    let mut message = Message::new(id, MessageType::Query, OpCode::Query);
    message.set_recursion_desired(false);
    message.add_query(query);

    let mut buf = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut buf);
    message
        .emit(&mut encoder)
        .map_err(|e| format!("serializing query: {e}"))?;
    Ok((id, buf))
}

/// Nameserver hosts are plain hostnames or IPs; an explicit `host:port`
/// is honored as-is.
async fn resolve_target(nameserver: &str) -> std::io::Result<SocketAddr> {
    if let Ok(ip) = nameserver.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }
    if let Ok(addr) = nameserver.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let lookup = if nameserver
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
    {
        nameserver.to_string()
    } else {
        format!("{nameserver}:{DNS_PORT}")
    };

    tokio::net::lookup_host(lookup)
        .await?
        .next()
        .ok_or_else(|| std::io::Error::other("no address for nameserver"))
}

fn local_bind_for(target: &SocketAddr) -> &'static str {
    if target.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_wire_format_has_header_and_no_rd() {
        let (id, bytes) = build_query("_health-check.example.com").unwrap();
        assert!(bytes.len() > 12, "header plus question expected");
        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), id);
        // Byte 2 carries QR/Opcode/AA/TC/RD; the probe never asks for
        // recursion.
        assert_eq!(bytes[2] & 0x01, 0);
    }

    /// Minimal in-process DNS server: parses the query and answers with the
    /// scripted response code.
    async fn fake_server(rcode: ResponseCode) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; RECV_BUFFER];
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let request = Message::from_vec(&buf[..len]).unwrap();

            let mut response = Message::new(request.id(), MessageType::Response, OpCode::Query);
            response.set_response_code(rcode);
            for query in request.queries() {
                response.add_query(query.clone());
            }

            let mut out = Vec::with_capacity(512);
            let mut encoder = BinEncoder::new(&mut out);
            response.emit(&mut encoder).unwrap();
            socket.send_to(&out, from).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn noerror_response_is_a_success() {
        let addr = fake_server(ResponseCode::NoError).await;
        let probe = UdpDnsQuery::new(Duration::from_secs(2));
        let outcome = probe
            .query(&addr.to_string(), "_health-check.example.com")
            .await;
        assert!(outcome.success, "outcome: {outcome:?}");
    }

    #[tokio::test]
    async fn nxdomain_response_is_a_failure() {
        let addr = fake_server(ResponseCode::NXDomain).await;
        let probe = UdpDnsQuery::new(Duration::from_secs(2));
        let outcome = probe
            .query(&addr.to_string(), "_health-check.example.com")
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("NXDOMAIN"));
    }

    #[tokio::test]
    async fn servfail_response_is_a_failure() {
        let addr = fake_server(ResponseCode::ServFail).await;
        let probe = UdpDnsQuery::new(Duration::from_secs(2));
        let outcome = probe
            .query(&addr.to_string(), "_health-check.example.com")
            .await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Bound but never reads: the probe must time out, not hang.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let probe = UdpDnsQuery::new(Duration::from_millis(50));
        let outcome = probe
            .query(&addr.to_string(), "_health-check.example.com")
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timeout"));
        drop(socket);
    }
}
