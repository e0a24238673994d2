//! Peer discovery for outbound delivery
//!
//! Resolves a recipient domain to a dialable peer through:
//! - DNS SRV lookup of `_sharp._tcp.<domain>`, then an IPv4 lookup of its target
//! - An HTTP health check on the domain, which must advertise `SHARP/1.0`
//!
//! Both run concurrently and both must succeed. An address carrying an explicit port
//! skips discovery entirely.

use crate::core::Address;
use crate::network::message::{HealthReport, PROTOCOL_VERSION};
use crate::network::peer::Peer;
use futures::future::BoxFuture;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Service label prefixed to the domain for SRV lookups
pub const SRV_SERVICE: &str = "_sharp._tcp";

/// Path of the health check every SHARP host serves over HTTP
pub const HEALTH_PATH: &str = "/api/server/health";

/// Bound on a single health-check request
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Errors
// =============================================================================

/// Discovery errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("No SHARP server record for {0}")]
    NoServerRecord(String),
    #[error("Could not resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },
    #[error("{domain} is not a valid SHARP peer: {reason}")]
    InvalidPeer { domain: String, reason: String },
}

// =============================================================================
// Seams
// =============================================================================

/// One SRV answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
}

/// DNS queries discovery needs. Empty answers are `Ok(vec![])`, not errors.
pub trait DnsResolver: Send + Sync {
    fn lookup_srv<'a>(&'a self, name: &'a str)
        -> BoxFuture<'a, Result<Vec<SrvTarget>, DiscoveryError>>;

    fn lookup_ipv4<'a>(&'a self, host: &'a str)
        -> BoxFuture<'a, Result<Vec<Ipv4Addr>, DiscoveryError>>;
}

/// Fetches the protocol a domain advertises on its health check
pub trait HealthProbe: Send + Sync {
    fn advertised_protocol<'a>(&'a self, domain: &'a str)
        -> BoxFuture<'a, Result<String, DiscoveryError>>;
}

// =============================================================================
// System implementations
// =============================================================================

/// Resolver backed by the host's DNS configuration
pub struct SystemDns {
    resolver: TokioAsyncResolver,
}

impl SystemDns {
    pub fn from_system_conf() -> Result<Self, DiscoveryError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            DiscoveryError::ResolutionFailed {
                host: "<system resolver>".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { resolver })
    }
}

fn is_empty_answer(e: &ResolveError) -> bool {
    matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

impl DnsResolver for SystemDns {
    fn lookup_srv<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SrvTarget>, DiscoveryError>> {
        Box::pin(async move {
            match self.resolver.srv_lookup(name).await {
                Ok(lookup) => Ok(lookup
                    .iter()
                    .map(|srv| SrvTarget {
                        target: srv.target().to_utf8().trim_end_matches('.').to_string(),
                        port: srv.port(),
                    })
                    .collect()),
                Err(e) if is_empty_answer(&e) => Ok(Vec::new()),
                Err(e) => Err(DiscoveryError::ResolutionFailed {
                    host: name.to_string(),
                    reason: e.to_string(),
                }),
            }
        })
    }

    fn lookup_ipv4<'a>(
        &'a self,
        host: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Ipv4Addr>, DiscoveryError>> {
        Box::pin(async move {
            match self.resolver.ipv4_lookup(host).await {
                Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
                Err(e) if is_empty_answer(&e) => Ok(Vec::new()),
                Err(e) => Err(DiscoveryError::ResolutionFailed {
                    host: host.to_string(),
                    reason: e.to_string(),
                }),
            }
        })
    }
}

/// Health probe over HTTPS, falling back to plain HTTP
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| DiscoveryError::InvalidPeer {
                domain: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<HealthReport, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<HealthReport>()
            .await
    }
}

impl HealthProbe for HttpHealthProbe {
    fn advertised_protocol<'a>(
        &'a self,
        domain: &'a str,
    ) -> BoxFuture<'a, Result<String, DiscoveryError>> {
        Box::pin(async move {
            let https = format!("https://{}{}", domain, HEALTH_PATH);
            let report = match self.fetch(&https).await {
                Ok(report) => report,
                Err(e) => {
                    log::debug!("HTTPS health check of {} failed ({}), trying HTTP", domain, e);
                    let http = format!("http://{}{}", domain, HEALTH_PATH);
                    self.fetch(&http)
                        .await
                        .map_err(|e| DiscoveryError::InvalidPeer {
                            domain: domain.to_string(),
                            reason: e.to_string(),
                        })?
                }
            };
            Ok(report.protocol)
        })
    }
}

// =============================================================================
// Peer Discovery
// =============================================================================

/// Peer discovery coordinator
#[derive(Clone)]
pub struct PeerDiscovery {
    dns: Arc<dyn DnsResolver>,
    health: Arc<dyn HealthProbe>,
}

impl PeerDiscovery {
    pub fn new(dns: Arc<dyn DnsResolver>, health: Arc<dyn HealthProbe>) -> Self {
        Self { dns, health }
    }

    /// Discovery against the system resolver and real HTTP
    pub fn system() -> Result<Self, DiscoveryError> {
        Ok(Self::new(
            Arc::new(SystemDns::from_system_conf()?),
            Arc::new(HttpHealthProbe::new()?),
        ))
    }

    /// Peer to dial for `to`
    pub async fn resolve(&self, to: &Address) -> Result<Peer, DiscoveryError> {
        match to.port {
            Some(port) => Ok(Peer::direct(&to.domain, port)),
            None => self.discover(&to.domain).await,
        }
    }

    /// Locate and validate the SHARP host for `domain`
    pub async fn discover(&self, domain: &str) -> Result<Peer, DiscoveryError> {
        let (located, validated) = tokio::join!(self.locate(domain), self.validate(domain));

        let (host, port) = located?;
        let protocol_version = validated?;

        let peer = Peer {
            domain: domain.to_string(),
            host: host.to_string(),
            port,
            protocol_version,
        };
        log::debug!("Discovered peer {}", peer);
        Ok(peer)
    }

    async fn locate(&self, domain: &str) -> Result<(Ipv4Addr, u16), DiscoveryError> {
        let name = format!("{}.{}", SRV_SERVICE, domain);
        let records = self.dns.lookup_srv(&name).await?;
        let srv = records
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::NoServerRecord(domain.to_string()))?;

        let addrs = self.dns.lookup_ipv4(&srv.target).await?;
        let ip = addrs
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::ResolutionFailed {
                host: srv.target.clone(),
                reason: "no A records".to_string(),
            })?;

        Ok((ip, srv.port))
    }

    async fn validate(&self, domain: &str) -> Result<String, DiscoveryError> {
        let protocol = self.health.advertised_protocol(domain).await?;
        if protocol != PROTOCOL_VERSION {
            return Err(DiscoveryError::InvalidPeer {
                domain: domain.to_string(),
                reason: format!("advertises {:?}", protocol),
            });
        }
        Ok(protocol)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::message::HashcashPolicy;
    use axum::{routing::get, Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Fixed DNS answers
    #[derive(Default)]
    pub(crate) struct StaticDns {
        pub srv: HashMap<String, Vec<SrvTarget>>,
        pub a: HashMap<String, Vec<Ipv4Addr>>,
    }

    impl DnsResolver for StaticDns {
        fn lookup_srv<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Vec<SrvTarget>, DiscoveryError>> {
            let answer = self.srv.get(name).cloned().unwrap_or_default();
            Box::pin(async move { Ok(answer) })
        }

        fn lookup_ipv4<'a>(
            &'a self,
            host: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Ipv4Addr>, DiscoveryError>> {
            let answer = self.a.get(host).cloned().unwrap_or_default();
            Box::pin(async move { Ok(answer) })
        }
    }

    /// Health check answering with a fixed protocol, or failing when `None`
    pub(crate) struct StaticHealth(pub Option<&'static str>);

    impl HealthProbe for StaticHealth {
        fn advertised_protocol<'a>(
            &'a self,
            domain: &'a str,
        ) -> BoxFuture<'a, Result<String, DiscoveryError>> {
            let answer = match self.0 {
                Some(p) => Ok(p.to_string()),
                None => Err(DiscoveryError::InvalidPeer {
                    domain: domain.to_string(),
                    reason: "unreachable".to_string(),
                }),
            };
            Box::pin(async move { answer })
        }
    }

    fn dns_for(domain: &str, port: u16) -> StaticDns {
        let mut dns = StaticDns::default();
        dns.srv.insert(
            format!("{}.{}", SRV_SERVICE, domain),
            vec![
                SrvTarget {
                    target: "mx1.example.net".to_string(),
                    port,
                },
                SrvTarget {
                    target: "mx2.example.net".to_string(),
                    port: 1,
                },
            ],
        );
        dns.a
            .insert("mx1.example.net".to_string(), vec![Ipv4Addr::new(10, 0, 0, 7)]);
        dns
    }

    fn discovery(dns: StaticDns, health: StaticHealth) -> PeerDiscovery {
        PeerDiscovery::new(Arc::new(dns), Arc::new(health))
    }

    #[tokio::test]
    async fn test_discover_uses_first_srv_record() {
        let d = discovery(dns_for("b.example", 5100), StaticHealth(Some(PROTOCOL_VERSION)));

        let peer = d.discover("b.example").await.unwrap();
        assert_eq!(peer.host, "10.0.0.7");
        assert_eq!(peer.port, 5100);
        assert_eq!(peer.domain, "b.example");
    }

    #[tokio::test]
    async fn test_explicit_port_skips_discovery() {
        let d = discovery(StaticDns::default(), StaticHealth(None));
        let to = Address::with_port("bob", "127.0.0.1", 5002);

        let peer = d.resolve(&to).await.unwrap();
        assert_eq!(peer.dial_addr(), "127.0.0.1:5002");
    }

    #[tokio::test]
    async fn test_missing_srv_record() {
        let d = discovery(StaticDns::default(), StaticHealth(Some(PROTOCOL_VERSION)));
        let err = d.discover("b.example").await.unwrap_err();
        assert_eq!(err, DiscoveryError::NoServerRecord("b.example".to_string()));
    }

    #[tokio::test]
    async fn test_missing_a_record() {
        let mut dns = dns_for("b.example", 5000);
        dns.a.clear();
        let d = discovery(dns, StaticHealth(Some(PROTOCOL_VERSION)));

        assert!(matches!(
            d.discover("b.example").await,
            Err(DiscoveryError::ResolutionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_check_must_match_protocol() {
        let d = discovery(dns_for("b.example", 5000), StaticHealth(Some("SMTP")));
        assert!(matches!(
            d.discover("b.example").await,
            Err(DiscoveryError::InvalidPeer { .. })
        ));

        let d = discovery(dns_for("b.example", 5000), StaticHealth(None));
        assert!(matches!(
            d.discover("b.example").await,
            Err(DiscoveryError::InvalidPeer { .. })
        ));
    }

    /// Plain HTTP health endpoint advertising `protocol`
    async fn serve_health(protocol: &'static str) -> SocketAddr {
        let report = HealthReport {
            status: "ok".to_string(),
            protocol: protocol.to_string(),
            domain: "127.0.0.1".to_string(),
            hashcash: HashcashPolicy {
                min_bits: 5,
                recommended_bits: 18,
            },
        };
        let router = Router::new().route(
            HEALTH_PATH,
            get(move || {
                let report = report.clone();
                async move { Json(report) }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_http_health_falls_back_to_plain_http() {
        let addr = serve_health(PROTOCOL_VERSION).await;

        let protocol = HttpHealthProbe::new()
            .unwrap()
            .advertised_protocol(&addr.to_string())
            .await
            .unwrap();
        assert_eq!(protocol, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_http_health_wrong_protocol_rejects_peer() {
        let addr = serve_health("SMTP/1.0").await;
        let domain = addr.to_string();

        let d = PeerDiscovery::new(
            Arc::new(dns_for(&domain, addr.port())),
            Arc::new(HttpHealthProbe::new().unwrap()),
        );
        match d.discover(&domain).await {
            Err(DiscoveryError::InvalidPeer { domain: named, reason }) => {
                assert_eq!(named, domain);
                assert!(reason.contains("SMTP/1.0"));
            }
            other => panic!("expected InvalidPeer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_health_unreachable_host() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let err = HttpHealthProbe::new()
            .unwrap()
            .advertised_protocol(&addr.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidPeer { .. }));
    }
}
