use crate::aspects::{SignalPolicy, SignalWeights};
use crate::ebay::config::EbayConfig;
use std::str::FromStr;
use std::time::Duration;

pub(crate) fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}

pub(crate) fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env_parse::<u64>(name)
            .filter(|v| *v > 0)
            .unwrap_or(default),
    )
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ebay: EbayConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub market: MarketConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            ebay: EbayConfig::from_env(),
            http: HttpConfig::from_env(),
            cache: CacheConfig::from_env(),
            resolver: ResolverConfig::from_env(),
            market: MarketConfig::from_env(),
            server: ServerConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            timeout: env_secs("HTTP_TIMEOUT_SECS", 15),
            connect_timeout: env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Short class, for aspect data.
    pub aspect_ttl: Duration,
    /// Long class, for market-value records.
    pub market_value_ttl: Duration,
    pub sweep_interval: Duration,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            aspect_ttl: env_secs("ASPECT_TTL_SECS", 15 * 60),
            market_value_ttl: env_secs("MARKET_VALUE_TTL_SECS", 4 * 60 * 60),
            sweep_interval: env_secs("CACHE_SWEEP_INTERVAL_SECS", 30 * 60),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            aspect_ttl: Duration::from_secs(15 * 60),
            market_value_ttl: Duration::from_secs(4 * 60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub policy: SignalPolicy,
    pub weights: SignalWeights,
    pub year_floor: i32,
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            policy: SignalPolicy {
                min_makes: env_parse("MIN_LIVE_MAKES").unwrap_or(defaults.policy.min_makes),
                min_models: env_parse("MIN_LIVE_MODELS").unwrap_or(defaults.policy.min_models),
                min_years: env_parse("MIN_LIVE_YEARS").unwrap_or(defaults.policy.min_years),
            },
            weights: SignalWeights {
                structured: env_parse("STRUCTURED_WEIGHT").unwrap_or(defaults.weights.structured),
                title: env_parse("TITLE_WEIGHT").unwrap_or(defaults.weights.title),
            },
            year_floor: env_parse::<i32>("FALLBACK_YEAR_FLOOR")
                .filter(|v| *v >= crate::models::MIN_MODEL_YEAR)
                .unwrap_or(defaults.year_floor),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            policy: SignalPolicy::default(),
            weights: SignalWeights::default(),
            year_floor: crate::aspects::catalog::DEFAULT_YEAR_FLOOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSpec {
    Memory,
    File(String),
    Redis(String),
}

impl StoreSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("file:").filter(|p| !p.is_empty()) {
            return StoreSpec::File(path.to_string());
        }
        if let Some(url) = raw.strip_prefix("redis:").filter(|u| !u.is_empty()) {
            // `redis:redis://host` and the bare `redis://host` form both work
            let url = if url.starts_with("//") {
                format!("redis:{url}")
            } else {
                url.to_string()
            };
            return StoreSpec::Redis(url);
        }
        StoreSpec::Memory
    }
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub valuation_url: Option<String>,
    pub valuation_api_key: Option<String>,
    pub debounce: Duration,
    pub store: StoreSpec,
}

impl MarketConfig {
    pub fn from_env() -> Self {
        Self {
            valuation_url: std::env::var("VALUATION_API_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            valuation_api_key: std::env::var("VALUATION_API_KEY").ok(),
            debounce: Duration::from_millis(
                env_parse::<u64>("MARKET_VALUE_DEBOUNCE_MS").unwrap_or(400),
            ),
            store: StoreSpec::parse(&env_or("MARKET_VALUE_STORE", "memory")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub body_limit: usize,
    pub metrics_key: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT").unwrap_or(8000),
            body_limit: env_parse::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(64 * 1024),
            metrics_key: std::env::var("METRICS_KEY").ok().filter(|v| !v.is_empty()),
        }
    }
}
