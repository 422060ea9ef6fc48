// src/probe/dns.rs
// =============================================================================
// EDNS client-subnet probes over UDP.
//
// Each probe is a single A query for the CDN hostname carrying a
// client-subnet option (RFC 7871). The option tells the authoritative
// server "answer as if the client were in this subnet", which is what lets
// one vantage point see the whole CDN.
//
// hickory-proto does the wire encoding; the exchange itself (one datagram
// out, wait for the matching reply) is ours so that a timeout maps cleanly
// onto ProbeResult::Timeout with no hidden retries.
// =============================================================================

use super::{ProbeResult, Prober};
use crate::net::network_of;
use crate::store::PopKey;
use futures::future::BoxFuture;
use futures::FutureExt;
use hickory_proto::error::ProtoError;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsCode, EdnsOption};
use hickory_proto::rr::{Name, RData, RecordType};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

// Advertised UDP payload size; the common "DNS flag day" value.
const EDNS_PAYLOAD: u16 = 1232;
const RECV_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ProbeSetupError {
    #[error("invalid hostname {hostname:?}: {source}")]
    Hostname {
        hostname: String,
        #[source]
        source: ProtoError,
    },

    #[error("at least one resolver is required")]
    NoResolvers,
}

// Failures of a single exchange. These never leave this module: they are
// logged and folded into ProbeResult.
#[derive(Debug, Error)]
enum ExchangeError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed DNS message: {0}")]
    Proto(#[from] ProtoError),
}

pub struct DnsProber {
    hostname: Name,
    resolvers: Vec<SocketAddr>,
    timeout: Duration,
    next_id: AtomicU16,
}

impl DnsProber {
    // Parameters:
    //   hostname: the CDN name to resolve, e.g. "www.google.com"
    //   resolvers: public resolvers that forward client-subnet options
    //   timeout: how long to wait for each reply
    pub fn new(
        hostname: &str,
        resolvers: Vec<SocketAddr>,
        timeout: Duration,
    ) -> Result<Self, ProbeSetupError> {
        let mut name = Name::from_ascii(hostname).map_err(|source| ProbeSetupError::Hostname {
            hostname: hostname.to_string(),
            source,
        })?;
        name.set_fqdn(true);

        if resolvers.is_empty() {
            return Err(ProbeSetupError::NoResolvers);
        }

        // Start query ids somewhere unpredictable-ish; they only need to
        // differ between consecutive probes.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u16)
            .unwrap_or_default();

        Ok(Self {
            hostname: name,
            resolvers,
            timeout,
            next_id: AtomicU16::new(seed),
        })
    }

    fn resolver(&self, resolver_index: usize) -> SocketAddr {
        self.resolvers[resolver_index % self.resolvers.len()]
    }

    async fn run_probe(&self, ip: Ipv4Addr, mask: u8, resolver_index: usize) -> ProbeResult {
        // Round-robin over the resolver pool
        let server = self.resolver(resolver_index);

        // Fresh id per query, so a late reply to the previous probe is
        // never mistaken for this one
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let query = build_query(&self.hostname, ip, mask, id);

        // The timeout wraps the whole exchange: send, wait, decode
        match tokio::time::timeout(self.timeout, exchange(server, &query)).await {
            Err(_elapsed) => ProbeResult::Timeout,
            Ok(Ok(response)) => parse_response(&response),
            Ok(Err(e)) => {
                // Not a timeout, but nothing usable either; let the engine
                // back off as it would for an empty answer.
                warn!(%server, %ip, error = %e, "probe failed");
                ProbeResult::NoAnswer
            }
        }
    }
}

impl Prober for DnsProber {
    fn probe(&self, ip: Ipv4Addr, mask: u8, resolver_index: usize) -> BoxFuture<'_, ProbeResult> {
        self.run_probe(ip, mask, resolver_index).boxed()
    }

    fn resolver_name(&self, resolver_index: usize) -> String {
        self.resolver(resolver_index).to_string()
    }
}

// Builds an A query for `hostname` carrying the client subnet
// `ip/mask` (address truncated to `mask` bits, source prefix `mask`).
pub(crate) fn build_query(hostname: &Name, ip: Ipv4Addr, mask: u8, id: u16) -> Message {
    // The option must carry the network address, not the raw client
    let subnet = Ipv4Addr::from(network_of(u32::from(ip), mask));

    // EDNS0 with a single client-subnet option; scope is 0 on queries
    let mut edns = Edns::new();
    edns.set_max_payload(EDNS_PAYLOAD);
    edns.set_version(0);
    edns.options_mut()
        .insert(EdnsOption::Subnet(ClientSubnet::new(IpAddr::V4(subnet), mask, 0)));

    // Plain recursive A query
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(hostname.clone(), RecordType::A));
    message.set_edns(edns);
    message
}

// Sends one datagram and waits for the reply with the same id. Replies
// with other ids (late answers to earlier probes) are dropped.
async fn exchange(server: SocketAddr, query: &Message) -> Result<Message, ExchangeError> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    // Ephemeral port; connect() makes the kernel drop datagrams from
    // anyone but the resolver
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.send(&query.to_vec()?).await?;

    // Keep reading until our id shows up (or the caller's timeout fires)
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let len = socket.recv(&mut buf).await?;
        let response = Message::from_vec(&buf[..len])?;
        if response.id() == query.id() {
            return Ok(response);
        }
        debug!(%server, expected = query.id(), got = response.id(), "ignoring stray reply");
    }
}

// Layout of an encoded client-subnet option (RFC 7871 section 6):
//   FAMILY (2 bytes) | SOURCE PREFIX (1) | SCOPE PREFIX (1) | ADDRESS...
const SUBNET_SCOPE_OFFSET: usize = 3;

// ClientSubnet keeps its fields private, so the prefixes are read back
// from the option's own wire encoding.
fn subnet_bytes(subnet: &ClientSubnet) -> Option<Vec<u8>> {
    Vec::<u8>::try_from(subnet).ok()
}

// The scope prefix the server says it used, or None if the option
// cannot be encoded (which a parsed option always can).
fn subnet_scope(subnet: &ClientSubnet) -> Option<u8> {
    subnet_bytes(subnet)?.get(SUBNET_SCOPE_OFFSET).copied()
}

// Collapses a response into a ProbeResult: every A record becomes the /24
// PoP it belongs to, and the echoed client-subnet scope is extracted.
pub(crate) fn parse_response(response: &Message) -> ProbeResult {
    // CNAMEs and other record types say nothing about the PoP
    let pops: BTreeSet<PopKey> = response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(PopKey::from_answer(a.0)),
            _ => None,
        })
        .collect();

    // A reply without addresses is what a throttling resolver sends
    if pops.is_empty() {
        return ProbeResult::NoAnswer;
    }

    // Missing option and scope 0 both mean "no precision info"
    let echoed = response
        .extensions()
        .as_ref()
        .and_then(|edns| match edns.option(EdnsCode::Subnet) {
            Some(EdnsOption::Subnet(subnet)) => subnet_scope(subnet),
            _ => None,
        });

    ProbeResult::Answers {
        pops,
        scope: echoed.unwrap_or(0),
        scope_echoed: echoed.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, CNAME};
    use hickory_proto::rr::Record;

    fn host() -> Name {
        Name::from_ascii("www.google.com.").unwrap()
    }

    fn response_with(records: Vec<RData>, scope: Option<u8>) -> Message {
        let mut message = Message::new();
        message.set_id(7).set_message_type(MessageType::Response);
        for rdata in records {
            message.add_answer(Record::from_rdata(host(), 300, rdata));
        }
        if let Some(scope) = scope {
            let mut edns = Edns::new();
            edns.options_mut().insert(EdnsOption::Subnet(ClientSubnet::new(
                IpAddr::V4(Ipv4Addr::new(1, 0, 0, 0)),
                24,
                scope,
            )));
            message.set_edns(edns);
        }
        message
    }

    #[test]
    fn test_query_carries_truncated_client_subnet() {
        let query = build_query(&host(), Ipv4Addr::new(1, 2, 3, 4), 20, 42);

        assert_eq!(query.id(), 42);
        assert!(query.recursion_desired());
        assert_eq!(query.queries().len(), 1);
        assert_eq!(query.queries()[0].query_type(), RecordType::A);

        let edns = query.extensions().as_ref().expect("EDNS must be attached");
        match edns.option(EdnsCode::Subnet) {
            Some(EdnsOption::Subnet(subnet)) => {
                let bytes = subnet_bytes(subnet).unwrap();
                // family 1 (IPv4), source /20, scope 0
                assert_eq!(&bytes[..4], &[0, 1, 20, 0]);
                // 1.2.3.4 truncated to /20 is 1.2.0.0
                assert_eq!(&bytes[4..7], &[1, 2, 0]);
                assert_eq!(subnet_scope(subnet), Some(0));
            }
            other => panic!("expected client subnet option, got {other:?}"),
        }
    }

    #[test]
    fn test_scope_read_from_encoded_option() {
        for scope in [0u8, 17, 24, 32] {
            let subnet = ClientSubnet::new(IpAddr::V4(Ipv4Addr::new(1, 0, 0, 0)), 24, scope);
            assert_eq!(subnet_scope(&subnet), Some(scope));
        }
    }

    #[test]
    fn test_query_encodes() {
        let query = build_query(&host(), Ipv4Addr::new(1, 0, 0, 0), 24, 1);
        let bytes = query.to_vec().unwrap();
        let decoded = Message::from_vec(&bytes).unwrap();
        assert_eq!(decoded.queries()[0].name(), &host());
    }

    #[test]
    fn test_answers_collapse_to_slash_24() {
        let response = response_with(
            vec![
                RData::A(A::new(172, 217, 5, 4)),
                RData::A(A::new(172, 217, 5, 99)),
                RData::A(A::new(142, 250, 1, 1)),
            ],
            Some(18),
        );

        let expected: BTreeSet<PopKey> = [
            PopKey::from_answer(Ipv4Addr::new(172, 217, 5, 0)),
            PopKey::from_answer(Ipv4Addr::new(142, 250, 1, 0)),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            parse_response(&response),
            ProbeResult::Answers {
                pops: expected,
                scope: 18,
                scope_echoed: true,
            }
        );
    }

    #[test]
    fn test_missing_subnet_option_reports_scope_zero() {
        let response = response_with(vec![RData::A(A::new(10, 0, 0, 1))], None);
        match parse_response(&response) {
            ProbeResult::Answers { scope, scope_echoed, .. } => {
                assert_eq!(scope, 0);
                assert!(!scope_echoed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_a_records_is_no_answer() {
        let cname = RData::CNAME(CNAME(Name::from_ascii("edge.example.net.").unwrap()));
        assert_eq!(parse_response(&response_with(vec![cname], Some(24))), ProbeResult::NoAnswer);
        assert_eq!(parse_response(&response_with(vec![], None)), ProbeResult::NoAnswer);
    }

    #[test]
    fn test_resolvers_rotate() {
        let resolvers: Vec<SocketAddr> =
            vec!["8.8.8.8:53".parse().unwrap(), "8.8.4.4:53".parse().unwrap()];
        let prober = DnsProber::new("www.google.com", resolvers, Duration::from_millis(500)).unwrap();
        assert_eq!(prober.resolver_name(0), "8.8.8.8:53");
        assert_eq!(prober.resolver_name(1), "8.8.4.4:53");
        assert_eq!(prober.resolver_name(2), "8.8.8.8:53");
    }

    #[test]
    fn test_empty_resolver_pool_rejected() {
        let err = DnsProber::new("www.google.com", vec![], Duration::from_secs(1)).err();
        assert!(matches!(err, Some(ProbeSetupError::NoResolvers)));
    }

    #[tokio::test]
    async fn test_silent_resolver_times_out() {
        // A bound socket that never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let prober = DnsProber::new("www.google.com", vec![addr], Duration::from_millis(50)).unwrap();

        let result = prober.probe(Ipv4Addr::new(1, 0, 0, 0), 24, 0).await;
        assert_eq!(result, ProbeResult::Timeout);
    }
}
