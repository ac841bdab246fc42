//! DNS-over-HTTPS resolution with UDP fallback.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::select_ok;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::upstream::UpstreamResolver;
use crate::config::{DOH_PROVIDERS, DOH_TIMEOUT};
use crate::dns::{RCODE_REFUSED, RCODE_SERVFAIL, build_query, parse_reply};
use crate::domain::DomainName;
use crate::error::ResolveError;

const DNS_MESSAGE: &str = "application/dns-message";

/// One DoH endpoint.
#[async_trait]
pub trait DohProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Type-A lookup. Returns the A records of a successful answer.
    async fn query(&self, name: &DomainName) -> Result<Vec<Ipv4Addr>, ResolveError>;
}

/// RFC 8484 provider: wire-format query POSTed over HTTPS.
pub struct HttpsProvider {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpsProvider {
    pub fn new(name: &str, url: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client,
        }
    }

    /// The built-in provider pool sharing one HTTP client.
    pub fn pool(client: &reqwest::Client) -> Vec<Arc<dyn DohProvider>> {
        DOH_PROVIDERS
            .iter()
            .map(|(name, url)| {
                Arc::new(HttpsProvider::new(name, url, client.clone())) as Arc<dyn DohProvider>
            })
            .collect()
    }
}

#[async_trait]
impl DohProvider for HttpsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, name: &DomainName) -> Result<Vec<Ipv4Addr>, ResolveError> {
        let http_err = |source| ResolveError::Http {
            provider: self.name.clone(),
            source,
        };

        // RFC 8484 asks for id 0 so responses stay cacheable.
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(build_query(0, name))
            .send()
            .await
            .map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::HttpStatus {
                provider: self.name.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(http_err)?;
        let reply = parse_reply(0, &body).map_err(|source| ResolveError::Malformed {
            upstream: self.name.clone(),
            source,
        })?;

        if reply.rcode == RCODE_SERVFAIL || reply.rcode == RCODE_REFUSED {
            return Err(ResolveError::Rcode {
                provider: self.name.clone(),
                rcode: reply.rcode,
            });
        }

        Ok(reply.addrs)
    }
}

/// Races every provider and keeps the first successful answer.
///
/// When the race fails or exceeds the timeout, the name is resolved over UDP
/// against the list handed to `resolve`.
pub struct DohResolver {
    providers: Vec<Arc<dyn DohProvider>>,
    fallback: UpstreamResolver,
    timeout: Duration,
    verbose: bool,
}

impl DohResolver {
    pub fn new(
        providers: Vec<Arc<dyn DohProvider>>,
        fallback: UpstreamResolver,
        verbose: bool,
    ) -> Self {
        Self {
            providers,
            fallback,
            timeout: DOH_TIMEOUT,
            verbose,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `name` over DoH, falling back to `fallback_upstreams`.
    pub async fn resolve(&self, name: &DomainName, fallback_upstreams: &[String]) -> Vec<Ipv4Addr> {
        match self.race(name).await {
            Ok((provider, addrs)) => {
                if self.verbose {
                    info!("doh[{}] {} -> {:?}", provider, name, addrs);
                }
                addrs
            }
            Err(e) => {
                debug!("doh lookup for {} failed: {}, falling back to udp", name, e);
                self.fallback.resolve(name, fallback_upstreams).await
            }
        }
    }

    async fn race(&self, name: &DomainName) -> Result<(&str, Vec<Ipv4Addr>), ResolveError> {
        if self.providers.is_empty() {
            return Err(ResolveError::NoProviders);
        }

        let queries = self.providers.iter().map(|provider| {
            async move {
                let addrs = provider.query(name).await?;
                Ok::<_, ResolveError>((provider.name(), addrs))
            }
            .boxed()
        });

        match tokio::time::timeout(self.timeout, select_ok(queries)).await {
            Ok(Ok((winner, _))) => Ok(winner),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ResolveError::DohTimeout(self.timeout)),
        }
    }
}
