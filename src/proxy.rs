//! Resolver orchestration.
//!
//! Loads the cache and policy, wires resolvers into the query handler, binds
//! the UDP transport and runs the background tasks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::cache::RecordCache;
use crate::config::{DOH_TIMEOUT, policy_upstreams};
use crate::error::{CacheError, Error};
use crate::handler::{QueryHandler, UpstreamLists};
use crate::policy::RoutingPolicy;
use crate::resolver::{DohResolver, HttpsProvider, UdpExchange, UpstreamResolver};
use crate::stats::Stats;
use crate::transport::udp::UdpTransport;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the resolver.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local UDP address to serve on
    pub listen_addr: SocketAddr,
    /// Policy file listing names resolved over DoH
    pub pac_path: Option<PathBuf>,
    /// Backing file for the record cache
    pub cache_path: Option<PathBuf>,
    /// Upstream chain for names outside the policy, tried in order
    pub upstreams: Vec<String>,
    /// Per-query logging
    pub debug: bool,
}

/// Build the query handler described by `config`.
///
/// Fails only when the cache file cannot be read or created.
pub fn build_handler(config: &ProxyConfig) -> Result<QueryHandler, Error> {
    let cache = Arc::new(RecordCache::open(config.cache_path.clone())?);

    let policy = match &config.pac_path {
        Some(path) => RoutingPolicy::load_from(path),
        None => RoutingPolicy::new(),
    };

    let client = reqwest::Client::builder().timeout(DOH_TIMEOUT).build()?;
    let exchange = Arc::new(UdpExchange::default());
    let doh = DohResolver::new(
        HttpsProvider::pool(&client),
        UpstreamResolver::new(exchange.clone(), config.debug),
        config.debug,
    );
    let upstream = UpstreamResolver::new(exchange, config.debug);

    Ok(QueryHandler::new(
        cache,
        policy,
        doh,
        upstream,
        UpstreamLists {
            doh_fallback: policy_upstreams(),
            plain: config.upstreams.clone(),
        },
        config.debug,
    ))
}

/// Run the resolver with the given configuration.
///
/// Serves until the UDP transport stops or the cache persister fails.
pub async fn run(config: ProxyConfig) -> Result<(), Error> {
    let handler = build_handler(&config)?;

    let transport = UdpTransport::bind(config.listen_addr)
        .await
        .map_err(|source| Error::Bind {
            addr: config.listen_addr.to_string(),
            source,
        })?;

    info!(
        "DNS resolver listening on {} ({} cached records)",
        config.listen_addr,
        handler.cache().len()
    );
    info!("Non-policy upstreams: {}", config.upstreams.join(", "));

    let persister = tokio::spawn(Arc::clone(handler.cache()).persist());
    let stats = tokio::spawn(report_stats(
        Arc::clone(handler.stats()),
        Arc::clone(handler.cache()),
    ));
    let server = transport.start(handler);

    let result = tokio::select! {
        res = persister, if config.cache_path.is_some() => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Cache(e)),
            Err(e) => Err(Error::Cache(CacheError::Persister(e.to_string()))),
        },
        res = server => {
            error!("UDP transport stopped");
            res.map_err(|e| Error::Io(std::io::Error::other(e)))
        }
    };

    stats.abort();
    result
}

/// Log and reset the counters every minute.
async fn report_stats(stats: Arc<Stats>, cache: Arc<RecordCache>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let snapshot = stats.snapshot_and_reset();
        info!(
            "[stats] cache={} requests={} cached={} doh={} upstream={} unanswered={} avg_response={:?} slowest={:?}",
            cache.len(),
            snapshot.requests,
            snapshot.cached,
            snapshot.doh,
            snapshot.upstream,
            snapshot.unanswered,
            snapshot.avg_response,
            snapshot.slowest_response
        );
    }
}
