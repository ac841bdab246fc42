//! DNS query processing.
//!
//! Handles the pipeline for each A question:
//! 1. Cache lookup by exact name
//! 2. Route decision: policy-listed names go to DoH, the rest to the UDP chain
//! 3. Resolution, shared by every concurrent query for the same name
//! 4. Answer construction from whatever addresses are known
//!
//! Successful results are written back to the cache on a background task.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rustc_hash::FxHashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

use crate::cache::RecordCache;
use crate::dns::{DnsRecord, DnsRequest, DnsResponse, OPCODE_QUERY, TYPE_A};
use crate::domain::DomainName;
use crate::policy::RoutingPolicy;
use crate::resolver::{DohResolver, UpstreamResolver};
use crate::stats::{Source, Stats};

/// Which resolver a cache miss goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Doh,
    Upstream,
}

/// Upstream lists for the two routes.
#[derive(Debug, Clone)]
pub struct UpstreamLists {
    /// UDP pool used when DoH fails for a policy-listed name.
    pub doh_fallback: Vec<String>,
    /// Operator-configured chain for every other name.
    pub plain: Vec<String>,
}

type Flight = Shared<BoxFuture<'static, Vec<Ipv4Addr>>>;

/// Answers A questions from the cache or the routed resolver.
///
/// Cheap to clone; clones share the cache, resolvers and in-flight lookups.
#[derive(Clone)]
pub struct QueryHandler {
    inner: Arc<Inner>,
}

struct Inner {
    cache: Arc<RecordCache>,
    policy: RoutingPolicy,
    doh: DohResolver,
    upstream: UpstreamResolver,
    lists: UpstreamLists,
    /// One entry per name currently being resolved.
    inflight: Mutex<FxHashMap<DomainName, Flight>>,
    stats: Arc<Stats>,
    verbose: bool,
}

impl QueryHandler {
    pub fn new(
        cache: Arc<RecordCache>,
        policy: RoutingPolicy,
        doh: DohResolver,
        upstream: UpstreamResolver,
        lists: UpstreamLists,
        verbose: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                policy,
                doh,
                upstream,
                lists,
                inflight: Mutex::new(FxHashMap::default()),
                stats: Arc::new(Stats::new()),
                verbose,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.inner.stats
    }

    pub fn route(&self, name: &DomainName) -> Route {
        self.inner.route(name)
    }

    /// Build the reply to `request`.
    ///
    /// Only QUERY requests are processed and only A questions get answers.
    /// The reply is always NOERROR, with an empty answer section when nothing
    /// resolved.
    pub async fn handle(&self, request: &DnsRequest) -> DnsResponse {
        let mut response = request.reply();
        if request.opcode() != OPCODE_QUERY {
            return response;
        }

        for question in &request.questions {
            if question.qtype != TYPE_A {
                continue;
            }

            let start_time = Instant::now();
            let name = DomainName::new(&question.name);
            let (addrs, source) = self.lookup(&name).await;

            response.answers.extend(
                addrs
                    .iter()
                    .map(|addr| DnsRecord::a(&question.name, *addr)),
            );

            let elapsed = start_time.elapsed();
            self.inner.stats.record(source, !addrs.is_empty(), elapsed);
            if self.inner.verbose {
                info!(
                    "{} {} answers={} total={:?}",
                    name,
                    source.as_str(),
                    addrs.len(),
                    elapsed
                );
            }
        }

        response
    }

    /// Addresses for `name`, from the cache or a (shared) resolution.
    pub async fn lookup(&self, name: &DomainName) -> (Vec<Ipv4Addr>, Source) {
        if let Some(addrs) = self.inner.cache.get(name) {
            return (addrs, Source::Cache);
        }

        let flight = {
            let mut inflight = self.inner.inflight();
            match inflight.get(name) {
                Some(flight) => flight.clone(),
                None => {
                    // A flight that just landed has already filled the cache.
                    if let Some(addrs) = self.inner.cache.get(name) {
                        return (addrs, Source::Cache);
                    }
                    let flight = Arc::clone(&self.inner)
                        .resolve(name.clone())
                        .boxed()
                        .shared();
                    inflight.insert(name.clone(), flight.clone());
                    flight
                }
            }
        };

        let source = match self.inner.route(name) {
            Route::Doh => Source::Doh,
            Route::Upstream => Source::Upstream,
        };
        (flight.await, source)
    }
}

impl Inner {
    fn route(&self, name: &DomainName) -> Route {
        if self.policy.matches(name) {
            Route::Doh
        } else {
            Route::Upstream
        }
    }

    fn inflight(&self) -> MutexGuard<'_, FxHashMap<DomainName, Flight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve(self: Arc<Self>, name: DomainName) -> Vec<Ipv4Addr> {
        let addrs = match self.route(&name) {
            Route::Doh => {
                debug!("{} matches policy, resolving over doh", name);
                self.doh.resolve(&name, &self.lists.doh_fallback).await
            }
            Route::Upstream => self.upstream.resolve(&name, &self.lists.plain).await,
        };

        if addrs.is_empty() {
            self.inflight().remove(&name);
            return addrs;
        }

        // The in-flight entry goes away only once the cache holds the result,
        // so later lookups find one or the other.
        let stored = addrs.clone();
        tokio::task::spawn_blocking(move || {
            self.cache.set(name.clone(), stored);
            self.inflight().remove(&name);
        });

        addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::build_query;
    use crate::resolver::DohProvider;
    use crate::resolver::mock::{MockExchange, MockProvider};
    use std::time::Duration;

    const POLICY_POOL: &str = "policy:53";
    const PLAIN_POOL: &str = "plain:53";

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn handler(
        cache: Arc<RecordCache>,
        policy: &[&str],
        providers: Vec<Arc<dyn DohProvider>>,
        exchange: Arc<MockExchange>,
    ) -> QueryHandler {
        let doh = DohResolver::new(
            providers,
            UpstreamResolver::new(exchange.clone(), false),
            false,
        );
        QueryHandler::new(
            cache,
            RoutingPolicy::from_names(policy),
            doh,
            UpstreamResolver::new(exchange, false),
            UpstreamLists {
                doh_fallback: vec![POLICY_POOL.to_string()],
                plain: vec![PLAIN_POOL.to_string()],
            },
            false,
        )
    }

    fn a_request(name: &str) -> DnsRequest {
        DnsRequest::parse(&build_query(0x4242, &DomainName::new(name))).unwrap()
    }

    async fn wait_for_cache(cache: &RecordCache, name: &str) -> Option<Vec<Ipv4Addr>> {
        for _ in 0..200 {
            if let Some(addrs) = cache.get(&DomainName::new(name)) {
                return Some(addrs);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    #[tokio::test]
    async fn policy_names_use_doh_and_others_use_plain_chain() {
        let exchange = Arc::new(MockExchange::new().answering(PLAIN_POOL, &["10.0.0.1"]));
        let provider = Arc::new(MockProvider::answering("doh", &["10.0.0.2"]));
        let handler = handler(
            Arc::new(RecordCache::new()),
            &["example.com"],
            vec![provider.clone()],
            exchange.clone(),
        );

        assert_eq!(handler.route(&DomainName::new("example.com")), Route::Doh);
        assert_eq!(handler.route(&DomainName::new("other.org")), Route::Upstream);

        let (addrs, source) = handler.lookup(&DomainName::new("example.com")).await;
        assert_eq!(addrs, vec![ip("10.0.0.2")]);
        assert_eq!(source, Source::Doh);
        assert_eq!(provider.calls(), 1);
        assert!(exchange.calls().is_empty());

        let (addrs, source) = handler.lookup(&DomainName::new("other.org")).await;
        assert_eq!(addrs, vec![ip("10.0.0.1")]);
        assert_eq!(source, Source::Upstream);
        assert_eq!(provider.calls(), 1);
        assert_eq!(exchange.calls(), vec![PLAIN_POOL]);
    }

    #[tokio::test]
    async fn doh_failure_falls_back_to_policy_pool_only() {
        let exchange = Arc::new(
            MockExchange::new()
                .answering(POLICY_POOL, &["8.8.8.8"])
                .answering(PLAIN_POOL, &["114.114.114.114"]),
        );
        let handler = handler(
            Arc::new(RecordCache::new()),
            &["blocked.example"],
            vec![Arc::new(MockProvider::failing("doh"))],
            exchange.clone(),
        );

        let (addrs, _) = handler.lookup(&DomainName::new("blocked.example")).await;

        assert_eq!(addrs, vec![ip("8.8.8.8")]);
        assert_eq!(exchange.calls(), vec![POLICY_POOL]);
    }

    #[tokio::test]
    async fn policy_query_answers_and_fills_cache() {
        let cache = Arc::new(RecordCache::new());
        let handler = handler(
            Arc::clone(&cache),
            &["example.com"],
            vec![Arc::new(MockProvider::answering("doh", &["93.184.216.34"]))],
            Arc::new(MockExchange::new()),
        );

        let response = handler.handle(&a_request("example.com")).await;

        assert_eq!(response.rcode(), 0);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0], DnsRecord::a("example.com", ip("93.184.216.34")));
        assert_eq!(
            wait_for_cache(&cache, "example.com.").await,
            Some(vec![ip("93.184.216.34")])
        );
    }

    #[tokio::test]
    async fn cached_name_is_answered_without_resolvers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "test.local. 10.0.0.1\n").unwrap();
        let cache = Arc::new(RecordCache::open(Some(path)).unwrap());
        let exchange = Arc::new(MockExchange::new());
        let provider = Arc::new(MockProvider::failing("doh"));
        let handler = handler(cache, &[], vec![provider.clone()], exchange.clone());

        let response = handler.handle(&a_request("test.local")).await;

        assert_eq!(response.answers, vec![DnsRecord::a("test.local", ip("10.0.0.1"))]);
        assert!(exchange.calls().is_empty());
        assert_eq!(provider.calls(), 0);
        assert_eq!(handler.stats().snapshot_and_reset().cached, 1);
    }

    #[tokio::test]
    async fn resolved_names_are_served_from_cache_afterwards() {
        let cache = Arc::new(RecordCache::new());
        let exchange = Arc::new(MockExchange::new().answering(PLAIN_POOL, &["10.1.1.1"]));
        let handler = handler(Arc::clone(&cache), &[], Vec::new(), exchange.clone());

        handler.lookup(&DomainName::new("repeat.test")).await;
        wait_for_cache(&cache, "repeat.test").await;
        let (addrs, source) = handler.lookup(&DomainName::new("repeat.test")).await;

        assert_eq!(addrs, vec![ip("10.1.1.1")]);
        assert_eq!(source, Source::Cache);
        assert_eq!(exchange.calls().len(), 1);
    }

    #[tokio::test]
    async fn unanswerable_query_is_empty_noerror_and_not_cached() {
        let cache = Arc::new(RecordCache::new());
        let handler = handler(
            Arc::clone(&cache),
            &["example.com"],
            vec![Arc::new(MockProvider::failing("doh"))],
            Arc::new(MockExchange::new()),
        );

        let response = handler.handle(&a_request("example.com")).await;
        let response_plain = handler.handle(&a_request("nowhere.test")).await;

        assert_eq!(response.rcode(), 0);
        assert!(response.answers.is_empty());
        assert!(response_plain.answers.is_empty());
        assert!(cache.is_empty());
        assert_eq!(handler.stats().snapshot_and_reset().unanswered, 2);
    }

    #[tokio::test]
    async fn non_a_questions_get_no_answers() {
        let exchange = Arc::new(MockExchange::new().answering(PLAIN_POOL, &["10.0.0.1"]));
        let handler = handler(Arc::new(RecordCache::new()), &[], Vec::new(), exchange.clone());
        let mut packet = build_query(7, &DomainName::new("example.com"));
        let qtype_at = packet.len() - 4;
        packet[qtype_at..qtype_at + 2].copy_from_slice(&28u16.to_be_bytes()); // AAAA
        let request = DnsRequest::parse(&packet).unwrap();

        let response = handler.handle(&request).await;

        assert_eq!(response.rcode(), 0);
        assert!(response.answers.is_empty());
        assert_eq!(response.questions, request.questions);
        assert!(exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn non_query_opcode_is_not_processed() {
        let exchange = Arc::new(MockExchange::new().answering(PLAIN_POOL, &["10.0.0.1"]));
        let handler = handler(Arc::new(RecordCache::new()), &[], Vec::new(), exchange.clone());
        let mut packet = build_query(7, &DomainName::new("example.com"));
        packet[2] |= 0x10; // opcode 2 (STATUS)
        let request = DnsRequest::parse(&packet).unwrap();

        let response = handler.handle(&request).await;

        assert!(response.answers.is_empty());
        assert!(exchange.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_resolution() {
        let cache = Arc::new(RecordCache::new());
        let exchange = Arc::new(
            MockExchange::new()
                .answering(PLAIN_POOL, &["10.2.2.2"])
                .with_delay(Duration::from_millis(100)),
        );
        let handler = handler(Arc::clone(&cache), &[], Vec::new(), exchange.clone());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.lookup(&DomainName::new("popular.test")).await })
            })
            .collect();
        for task in tasks {
            let (addrs, _) = task.await.unwrap();
            assert_eq!(addrs, vec![ip("10.2.2.2")]);
        }

        assert_eq!(exchange.calls().len(), 1);
        assert_eq!(
            wait_for_cache(&cache, "popular.test").await,
            Some(vec![ip("10.2.2.2")])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_names_all_land_in_cache() {
        let mut exchange = MockExchange::new();
        let names: Vec<String> = (0..50).map(|i| format!("host{i}.test")).collect();
        let upstreams: Vec<String> = (0..50).map(|i| format!("up{i}:53")).collect();
        for (i, upstream) in upstreams.iter().enumerate() {
            exchange = exchange.answering(upstream, &[format!("10.3.0.{i}").as_str()]);
        }
        let exchange = Arc::new(exchange);
        let cache = Arc::new(RecordCache::new());

        // One handler per name, all sharing the cache, so every name maps to a
        // distinct address.
        let tasks: Vec<_> = names
            .iter()
            .zip(&upstreams)
            .map(|(name, up)| {
                let handler = QueryHandler::new(
                    Arc::clone(&cache),
                    RoutingPolicy::new(),
                    DohResolver::new(
                        Vec::new(),
                        UpstreamResolver::new(exchange.clone(), false),
                        false,
                    ),
                    UpstreamResolver::new(exchange.clone(), false),
                    UpstreamLists {
                        doh_fallback: Vec::new(),
                        plain: vec![up.clone()],
                    },
                    false,
                );
                let name = DomainName::new(name);
                tokio::spawn(async move { handler.lookup(&name).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        for (i, name) in names.iter().enumerate() {
            assert_eq!(
                wait_for_cache(&cache, name).await,
                Some(vec![Ipv4Addr::new(10, 3, 0, i as u8)])
            );
        }
        assert_eq!(cache.len(), 50);
    }
}
