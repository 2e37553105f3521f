//! Recursive resolution starting at the root servers.
//!
//! The search is depth-first: every referral is followed in the order the
//! name servers were listed, and the first authoritative answer wins. NS
//! targets that arrive without glue are themselves resolved from the root
//! before they can be queried. Two things keep the walk finite: a hop
//! budget (`max_depth`) and a per-branch record of which names were already
//! asked of which servers, which cuts delegation cycles.

use crate::config::Config;
use crate::error::ResolveError;
use crate::metrics::UPSTREAM_QUERIES_TOTAL;
use crate::transport::Transport;
use crate::types::{QType, RData, ResourceRecord, Site, RCODE_NXDOMAIN, TYPE_NS};
use crate::wire::{decode_message, encode_query};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

pub type StepResult = Result<Option<Vec<Site>>, ResolveError>;

#[derive(Clone, Debug)]
struct Hop {
    domain: String,
    server_ip: String,
    at_root: bool,
}

/// The chain of (name, server) questions leading to the current step.
///
/// Owned by each branch and cloned on descent, so sibling branches never see each other's hops.
#[derive(Clone, Debug, Default)]
pub struct Branch {
    hops: Vec<Hop>,
}

impl Branch {
    /// True when this branch already asked `server` about `domain`, or already
    /// restarted `domain` at the root set and is about to do so again.
    fn revisits(&self, domain: &str, server: &Site, roots: &[Site]) -> bool {
        let at_root = roots.iter().any(|r| r.ip == server.ip);
        self.hops.iter().any(|hop| {
            hop.domain.eq_ignore_ascii_case(domain) && (hop.server_ip == server.ip || (at_root && hop.at_root))
        })
    }

    fn descend(&self, domain: &str, server: &Site, roots: &[Site]) -> Branch {
        let mut next = self.clone();
        next.hops.push(Hop {
            domain: domain.to_string(),
            server_ip: server.ip.clone(),
            at_root: roots.iter().any(|r| r.ip == server.ip),
        });
        next
    }
}

/// Outcome of a top-level search. Empty `records` means the domain is unresolvable.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub records: Vec<Site>,
    pub trace: Vec<Site>,
}

pub struct Resolver<T: Transport> {
    transport: T,
    port: u16,
    max_depth: usize,
    roots: Vec<Site>,
}

impl<T: Transport> Resolver<T> {
    pub fn new(transport: T, port: u16, max_depth: usize, roots: Vec<Site>) -> Self {
        Self { transport, port, max_depth, roots }
    }

    pub fn from_config(transport: T, cfg: &Config) -> Self {
        Self::new(transport, cfg.dns_port, cfg.max_depth, cfg.roots.clone())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Tries each root in order, asking for A and then (with `ipv6`) AAAA records.
    /// The first root that yields anything wins.
    pub async fn resolve(&self, domain: &str, ipv6: bool) -> Resolution {
        let mut trace = Vec::new();
        for root in &self.roots {
            trace = Vec::new();

            let v4 = match self.resolve_step(domain, root, root, Branch::default(), &mut trace, 0, QType::A).await {
                Ok(found) => found.unwrap_or_default(),
                Err(e) => {
                    error!("Abandoning root {} for '{}': {}", root, domain, e);
                    continue;
                }
            };

            let v6 = if ipv6 {
                match self.resolve_step(domain, root, root, Branch::default(), &mut trace, 0, QType::AAAA).await {
                    Ok(found) => found.unwrap_or_default(),
                    Err(e) => {
                        error!("AAAA resolution of '{}' failed, keeping A records only: {}", domain, e);
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            let records: Vec<Site> = v4.into_iter().chain(v6).collect();
            if !records.is_empty() {
                info!("Resolved '{}' via root {} in {} hop(s): {} record(s)", domain, root.name, trace.len(), records.len());
                return Resolution { records, trace };
            }
            debug!("Root {} gave no records for '{}'", root.name, domain);
        }

        info!("'{}' is unresolvable from every root", domain);
        Resolution { records: Vec::new(), trace }
    }

    /// Asks `server` about `domain` and follows referrals from there.
    ///
    /// `Ok(None)` means this branch found nothing: depth exhausted, loop cut,
    /// server unreachable, NXDOMAIN, or every referral came up empty.
    /// Malformed responses are returned as errors.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_step<'a>(
        &'a self,
        domain: &'a str,
        server: &'a Site,
        root: &'a Site,
        branch: Branch,
        trace: &'a mut Vec<Site>,
        depth: usize,
        qtype: QType,
    ) -> BoxFuture<'a, StepResult> {
        async move {
            debug!(
                "Resolving {} '{}' at depth {} via {}, trace: {}",
                qtype, domain, depth, server, render_trace(trace)
            );
            if depth > self.max_depth {
                debug!("Depth bound {} exceeded for '{}'", self.max_depth, domain);
                return Ok(None);
            }
            if branch.revisits(domain, server, &self.roots) {
                warn!("Referral loop for '{}' at {}, cutting branch", domain, server);
                return Ok(None);
            }
            trace.push(server.clone());
            let branch = branch.descend(domain, server, &self.roots);

            let query = encode_query(domain, qtype)
                .map_err(|source| ResolveError::Query { domain: domain.to_string(), source })?;
            let qtype_label = qtype.to_string();

            let response = match self.transport.exchange(&query, &server.ip, self.port).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    UPSTREAM_QUERIES_TOTAL.with_label_values(&[qtype_label.as_str(), "transport_error"]).inc();
                    warn!("No answer from {} for '{}': {}", server, domain, e);
                    return Ok(None);
                }
            };

            let msg = decode_message(&response).map_err(|source| {
                UPSTREAM_QUERIES_TOTAL.with_label_values(&[qtype_label.as_str(), "protocol_error"]).inc();
                ResolveError::Protocol { server: server.to_string(), source }
            })?;
            UPSTREAM_QUERIES_TOTAL.with_label_values(&[qtype_label.as_str(), "ok"]).inc();

            if msg.header.flags.rcode == RCODE_NXDOMAIN {
                info!("Got NXDOMAIN for '{}' from {}", domain, server);
                return Ok(None);
            }

            if msg.header.flags.aa && !msg.answers.is_empty() {
                debug!("Authoritative answer for '{}' from {}", domain, server);
                return Ok(Some(msg.answers.iter().map(ResourceRecord::to_site).collect()));
            }

            let glue_len = match qtype { QType::A => Some(4), QType::AAAA => Some(16), QType::NS => None };
            let glue: HashMap<String, String> = msg
                .additional
                .iter()
                .filter(|rr| Some(rr.rdlength) == glue_len)
                .map(|rr| (rr.name.to_ascii_lowercase(), rr.rdata.to_string()))
                .collect();

            for ns in msg.authority.iter().filter(|rr| rr.rtype == TYPE_NS) {
                let RData::Name(ns_name) = &ns.rdata else { continue };

                let (next_hops, extra_depth) = match glue.get(&ns_name.to_ascii_lowercase()) {
                    Some(ip) => (vec![Site::new(ns_name.clone(), ip.clone())], 0),
                    None => {
                        debug!("No glue for {}, resolving it from {}", ns_name, root.name);
                        match self.resolve_step(ns_name, root, root, branch.clone(), &mut *trace, depth + 1, qtype).await? {
                            Some(sites) => (sites, 1),
                            None => continue,
                        }
                    }
                };

                for next in &next_hops {
                    let found = self
                        .resolve_step(domain, next, root, branch.clone(), &mut *trace, depth + 1 + extra_depth, qtype)
                        .await?;
                    if found.is_some() {
                        return Ok(found);
                    }
                }
            }

            Ok(None)
        }
        .boxed()
    }
}

fn render_trace(trace: &[Site]) -> String {
    trace.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testutil::ResponseBuilder;
    use crate::types::{TYPE_ALIAS_NAME, TYPE_CNAME};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Serves canned replies keyed by (server, name, qtype) and records every exchange.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: HashMap<(String, String, QType), Vec<u8>>,
        unreachable: HashSet<String>,
        calls: Mutex<Vec<(String, String, QType)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn reply(mut self, server: &str, name: &str, qtype: QType, bytes: Vec<u8>) -> Self {
            self.replies.insert((server.to_string(), name.to_string(), qtype), bytes);
            self
        }

        pub(crate) fn unreachable(mut self, server: &str) -> Self {
            self.unreachable.insert(server.to_string());
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, String, QType)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn exchange(&self, query: &[u8], server: &str, _port: u16) -> Result<Vec<u8>, TransportError> {
            let question = decode_message(query).unwrap().questions.remove(0);
            let key = (server.to_string(), question.name, QType::from(question.qtype));
            self.calls.lock().unwrap().push(key.clone());

            if self.unreachable.contains(server) {
                return Err(TransportError::Io {
                    server: server.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                });
            }
            self.replies
                .get(&key)
                .cloned()
                .ok_or(TransportError::Timeout { server: server.to_string(), millis: 0 })
        }
    }

    const ROOT: &str = "198.41.0.4";
    const GTLD: &str = "192.5.6.30";
    const NS1: &str = "10.0.0.53";

    fn root() -> Site {
        Site::new("a.root-servers.net", ROOT)
    }

    fn resolver(transport: ScriptedTransport, max_depth: usize) -> Resolver<ScriptedTransport> {
        Resolver::new(transport, 53, max_depth, vec![root()])
    }

    fn answer(name: &str, addr: [u8; 4]) -> Vec<u8> {
        ResponseBuilder::new(name, QType::A).authoritative().answer_a(name, addr, 300).build()
    }

    fn com_referral() -> Vec<u8> {
        ResponseBuilder::new("www.example.com", QType::A)
            .authority_ns("com", "a.gtld-servers.net", 172800)
            .additional_a("a.gtld-servers.net", [192, 5, 6, 30])
            .build()
    }

    async fn step(resolver: &Resolver<ScriptedTransport>, domain: &str, qtype: QType) -> (StepResult, Vec<Site>) {
        let mut trace = Vec::new();
        let root = root();
        let result = resolver.resolve_step(domain, &root, &root, Branch::default(), &mut trace, 0, qtype).await;
        (result, trace)
    }

    #[tokio::test]
    async fn authoritative_answer_ends_search() {
        let reply = ResponseBuilder::new("example.com", QType::A)
            .authoritative()
            .answer_a("example.com", [93, 184, 216, 34], 300)
            .authority_ns("example.com", "ns1.example.com", 300)
            .additional_a("ns1.example.com", [10, 0, 0, 53])
            .build();
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "example.com", QType::A, reply), 16);

        let (result, trace) = step(&resolver, "example.com", QType::A).await;
        assert_eq!(result.unwrap(), Some(vec![Site::with_ttl("example.com", "93.184.216.34", 300)]));
        assert_eq!(trace, vec![root()]);
        assert_eq!(resolver.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn glue_is_followed_without_extra_queries() {
        let example_referral = ResponseBuilder::new("www.example.com", QType::A)
            .authority_ns("example.com", "ns1.example.com", 172800)
            .additional_aaaa("ns1.example.com", "2001:db8::53".parse().unwrap())
            .additional_a("ns1.example.com", [10, 0, 0, 53])
            .build();
        let transport = ScriptedTransport::default()
            .reply(ROOT, "www.example.com", QType::A, com_referral())
            .reply(GTLD, "www.example.com", QType::A, example_referral)
            .reply(NS1, "www.example.com", QType::A, answer("www.example.com", [93, 184, 216, 34]));
        let resolver = resolver(transport, 16);

        let (result, trace) = step(&resolver, "www.example.com", QType::A).await;
        assert_eq!(result.unwrap().unwrap()[0].ip, "93.184.216.34");
        assert_eq!(trace, vec![
            root(),
            Site::new("a.gtld-servers.net", GTLD),
            Site::new("ns1.example.com", NS1),
        ]);
        let asked: Vec<String> = resolver.transport().calls().into_iter().map(|(_, name, _)| name).collect();
        assert_eq!(asked, vec!["www.example.com"; 3]);
    }

    #[tokio::test]
    async fn glue_must_match_query_type() {
        // Only IPv6 glue is offered for an A query, so the NS name has to be resolved first.
        let referral = ResponseBuilder::new("example.com", QType::A)
            .authority_ns("example.com", "ns1.example.net", 3600)
            .additional_aaaa("ns1.example.net", "2001:db8::53".parse().unwrap())
            .build();
        let transport = ScriptedTransport::default()
            .reply(ROOT, "example.com", QType::A, referral)
            .reply(ROOT, "ns1.example.net", QType::A, answer("ns1.example.net", [10, 0, 0, 53]))
            .reply(NS1, "example.com", QType::A, answer("example.com", [93, 184, 216, 34]));
        let resolver = resolver(transport, 16);

        let (result, trace) = step(&resolver, "example.com", QType::A).await;
        assert_eq!(result.unwrap().unwrap()[0].ip, "93.184.216.34");
        assert_eq!(resolver.transport().calls(), vec![
            (ROOT.to_string(), "example.com".to_string(), QType::A),
            (ROOT.to_string(), "ns1.example.net".to_string(), QType::A),
            (NS1.to_string(), "example.com".to_string(), QType::A),
        ]);
        assert_eq!(trace[2], Site::with_ttl("ns1.example.net", NS1, 300));
    }

    #[tokio::test]
    async fn depth_bound_stops_after_first_hop() {
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "www.example.com", QType::A, com_referral()), 0);

        let (result, trace) = step(&resolver, "www.example.com", QType::A).await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(trace.len(), 1);
        assert_eq!(resolver.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_falls_through_to_next_ns() {
        let referral = ResponseBuilder::new("example.com", QType::A)
            .authority_ns("example.com", "ns1.example.com", 3600)
            .authority_ns("example.com", "ns2.example.com", 3600)
            .additional_a("ns1.example.com", [10, 0, 0, 1])
            .additional_a("ns2.example.com", [10, 0, 0, 2])
            .build();
        let transport = ScriptedTransport::default()
            .reply(ROOT, "example.com", QType::A, referral)
            .unreachable("10.0.0.1")
            .reply("10.0.0.2", "example.com", QType::A, answer("example.com", [93, 184, 216, 34]));
        let resolver = resolver(transport, 16);

        let (result, _) = step(&resolver, "example.com", QType::A).await;
        assert_eq!(result.unwrap().unwrap().len(), 1);
        assert_eq!(resolver.transport().calls().len(), 3);
    }

    #[tokio::test]
    async fn first_answering_ns_short_circuits_the_rest() {
        let referral = ResponseBuilder::new("example.com", QType::A)
            .authority_ns("example.com", "ns1.example.com", 3600)
            .authority_ns("example.com", "ns2.example.com", 3600)
            .additional_a("ns1.example.com", [10, 0, 0, 1])
            .additional_a("ns2.example.com", [10, 0, 0, 2])
            .build();
        let transport = ScriptedTransport::default()
            .reply(ROOT, "example.com", QType::A, referral)
            .reply("10.0.0.1", "example.com", QType::A, answer("example.com", [1, 1, 1, 1]))
            .reply("10.0.0.2", "example.com", QType::A, answer("example.com", [2, 2, 2, 2]));
        let resolver = resolver(transport, 16);

        let (result, _) = step(&resolver, "example.com", QType::A).await;
        assert_eq!(result.unwrap().unwrap()[0].ip, "1.1.1.1");
        assert_eq!(resolver.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn self_referential_delegation_terminates() {
        let for_domain = ResponseBuilder::new("example.com", QType::A)
            .authority_ns("example.com", "ns.example.com", 3600)
            .build();
        let for_ns = ResponseBuilder::new("ns.example.com", QType::A)
            .authority_ns("example.com", "ns.example.com", 3600)
            .build();
        let transport = ScriptedTransport::default()
            .reply(ROOT, "example.com", QType::A, for_domain)
            .reply(ROOT, "ns.example.com", QType::A, for_ns);
        let resolver = resolver(transport, 16);

        let (result, _) = step(&resolver, "example.com", QType::A).await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(resolver.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn nxdomain_ends_branch() {
        let reply = ResponseBuilder::new("nope.example", QType::A)
            .rcode(RCODE_NXDOMAIN)
            .authority_name("example", 6, "ns.example", 3600)
            .build();
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "nope.example", QType::A, reply), 16);

        let (result, _) = step(&resolver, "nope.example", QType::A).await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(resolver.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn non_ns_authority_records_are_not_followed() {
        let reply = ResponseBuilder::new("example.com", QType::A)
            .authority_name("example.com", 6, "ns.example.com", 3600)
            .build();
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "example.com", QType::A, reply), 16);

        let (result, _) = step(&resolver, "example.com", QType::A).await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(resolver.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn malformed_response_is_an_error() {
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "example.com", QType::A, vec![0xAA; 5]), 16);

        let (result, trace) = step(&resolver, "example.com", QType::A).await;
        assert!(matches!(result, Err(ResolveError::Protocol { .. })));
        assert_eq!(trace.len(), 1);
    }

    #[tokio::test]
    async fn cname_answers_are_returned_as_is() {
        let reply = ResponseBuilder::new("www.example.com", QType::A)
            .authoritative()
            .answer_name("www.example.com", TYPE_CNAME, "example.com", 60)
            .answer_a("example.com", [93, 184, 216, 34], 300)
            .build();
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "www.example.com", QType::A, reply), 16);

        let (result, _) = step(&resolver, "www.example.com", QType::A).await;
        let sites = result.unwrap().unwrap();
        assert_eq!(sites[0], Site::with_ttl("www.example.com", "example.com", 60));
        assert_eq!(sites[1].ip, "93.184.216.34");
    }

    #[tokio::test]
    async fn type_16_answers_come_back_as_target_names() {
        let reply = ResponseBuilder::new("alias.example.com", QType::A)
            .authoritative()
            .answer_name("alias.example.com", TYPE_ALIAS_NAME, "example.com", 120)
            .build();
        let resolver = resolver(ScriptedTransport::default().reply(ROOT, "alias.example.com", QType::A, reply), 16);

        let (result, _) = step(&resolver, "alias.example.com", QType::A).await;
        assert_eq!(result.unwrap(), Some(vec![Site::with_ttl("alias.example.com", "example.com", 120)]));
    }

    #[tokio::test]
    async fn resolve_moves_to_next_root_and_survives_ipv6_failure() {
        let second = Site::new("b.root-servers.net", "199.9.14.201");
        let transport = ScriptedTransport::default()
            .unreachable(ROOT)
            .reply(&second.ip, "example.com", QType::A, answer("example.com", [93, 184, 216, 34]))
            .reply(&second.ip, "example.com", QType::AAAA, vec![0xAA; 3]);
        let resolver = Resolver::new(transport, 53, 16, vec![root(), second.clone()]);

        let resolution = resolver.resolve("example.com", true).await;
        assert_eq!(resolution.records, vec![Site::with_ttl("example.com", "93.184.216.34", 300)]);
        assert_eq!(resolution.trace, vec![second.clone(), second]);
    }

    #[tokio::test]
    async fn resolve_combines_a_and_aaaa() {
        let v6 = ResponseBuilder::new("example.com", QType::AAAA)
            .authoritative()
            .answer_aaaa("example.com", "2606:2800:220:1::248".parse().unwrap(), 300)
            .build();
        let transport = ScriptedTransport::default()
            .reply(ROOT, "example.com", QType::A, answer("example.com", [93, 184, 216, 34]))
            .reply(ROOT, "example.com", QType::AAAA, v6);
        let resolver = resolver(transport, 16);

        let records = resolver.resolve("example.com", true).await.records;
        let ips: Vec<&str> = records.iter().map(|s| s.ip.as_str()).collect();
        assert_eq!(ips, vec!["93.184.216.34", "2606:2800:220:1::248"]);

        let v4_only = resolver.resolve("example.com", false).await.records;
        assert_eq!(v4_only.len(), 1);
    }

    #[tokio::test]
    async fn protocol_error_abandons_that_root_only() {
        let second = Site::new("b.root-servers.net", "199.9.14.201");
        let transport = ScriptedTransport::default()
            .reply(ROOT, "example.com", QType::A, vec![0x00; 7])
            .reply(&second.ip, "example.com", QType::A, answer("example.com", [93, 184, 216, 34]));
        let resolver = Resolver::new(transport, 53, 16, vec![root(), second]);

        let resolution = resolver.resolve("example.com", false).await;
        assert_eq!(resolution.records.len(), 1);
    }

    #[tokio::test]
    async fn nothing_anywhere_is_unresolvable() {
        let second = Site::new("b.root-servers.net", "199.9.14.201");
        let transport = ScriptedTransport::default().unreachable(ROOT).unreachable(&second.ip);
        let resolver = Resolver::new(transport, 53, 16, vec![root(), second.clone()]);

        let resolution = resolver.resolve("example.com", true).await;
        assert!(resolution.records.is_empty());
        assert_eq!(resolution.trace, vec![second.clone(), second]);
    }
}
