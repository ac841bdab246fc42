//! Scripted resolvers for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{DohProvider, Exchange};
use crate::dns::{RCODE_NOERROR, Reply};
use crate::domain::DomainName;
use crate::error::ResolveError;

fn parse_all(addrs: &[&str]) -> Vec<Ipv4Addr> {
    addrs.iter().map(|a| a.parse().unwrap()).collect()
}

/// Exchange that answers per upstream and records every attempt.
/// Upstreams it has no script for fail with a timeout.
#[derive(Default)]
pub(crate) struct MockExchange {
    answers: HashMap<String, Vec<Ipv4Addr>>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl MockExchange {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn answering(mut self, upstream: &str, addrs: &[&str]) -> Self {
        self.answers.insert(upstream.to_string(), parse_all(addrs));
        self
    }

    pub(crate) fn failing(mut self, upstream: &str) -> Self {
        self.answers.remove(upstream);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Upstreams queried so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn exchange(&self, _name: &DomainName, upstream: &str) -> Result<Reply, ResolveError> {
        self.calls.lock().unwrap().push(upstream.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.answers.get(upstream) {
            Some(addrs) => Ok(Reply {
                rcode: RCODE_NOERROR,
                addrs: addrs.clone(),
            }),
            None => Err(ResolveError::Timeout(upstream.to_string())),
        }
    }
}

/// DoH provider with a fixed outcome and optional latency.
pub(crate) struct MockProvider {
    name: String,
    answer: Option<Vec<Ipv4Addr>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn answering(name: &str, addrs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            answer: Some(parse_all(addrs)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            answer: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DohProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, _name: &DomainName) -> Result<Vec<Ipv4Addr>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.answer {
            Some(addrs) => Ok(addrs.clone()),
            None => Err(ResolveError::HttpStatus {
                provider: self.name.clone(),
                status: 503,
            }),
        }
    }
}
