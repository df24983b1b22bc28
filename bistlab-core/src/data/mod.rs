//! Market data: the source contract, concrete providers and the caching adapter.

pub mod cache;
pub mod circuit_breaker;
pub mod memory;
pub mod provider;
pub mod synthetic;
pub mod yahoo;

pub use cache::{CacheConfig, CacheStats, CachingSource};
pub use circuit_breaker::CircuitBreaker;
pub use memory::StaticSource;
pub use provider::{normalize_ticker, DataError, MarketDataSource};
pub use synthetic::{FallbackSource, SyntheticSource};
pub use yahoo::YahooSource;
