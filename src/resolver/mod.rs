//! Resolution strategies.
//!
//! Two ways to turn a name into A records:
//! 1. `UpstreamResolver` walks an ordered list of plain UDP servers
//! 2. `DohResolver` races DNS-over-HTTPS providers and falls back to (1)
//!
//! Both end in a possibly empty address list; failures are logged, never
//! returned. The network sits behind the `Exchange` and `DohProvider` traits.

pub mod doh;
pub mod upstream;

pub use doh::{DohProvider, DohResolver, HttpsProvider};
pub use upstream::{Exchange, UdpExchange, UpstreamResolver};

#[cfg(test)]
pub(crate) mod mock;
