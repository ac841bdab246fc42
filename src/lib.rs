//! idns - a caching DNS forwarder.
//!
//! Answers A queries from an in-memory (optionally file-backed) cache. Misses
//! for names on the policy list are resolved over DNS-over-HTTPS with a UDP
//! fallback; all other names go to a plain UDP upstream chain.

pub mod cache;
pub mod config;
pub mod dns;
pub mod domain;
pub mod error;
pub mod handler;
pub mod policy;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;

pub use error::Error;
