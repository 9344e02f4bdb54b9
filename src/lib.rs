//! Vehicle aspect resolution (make → model → year) backed by live
//! marketplace inventory with a curated fallback, plus a deduplicating,
//! cached market-value lookup.

pub mod api;
pub mod aspects;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod ebay;
pub mod error;
pub mod http;
pub mod market;
pub mod metrics;
pub mod models;
pub mod singleflight;
