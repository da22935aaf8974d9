use prometheus::{Counter, Encoder, Gauge, Histogram, Registry, TextEncoder};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref CACHE_HITS: Counter = Counter::new(
        "cache_hits_total",
        "Resolves answered from a fresh cache entry"
    ).unwrap();

    pub static ref CACHE_JOINED_FETCHES: Counter = Counter::new(
        "cache_joined_fetches_total",
        "Resolves that joined a fetch already in flight"
    ).unwrap();

    pub static ref CACHE_FETCH_ATTEMPTS: Counter = Counter::new(
        "cache_fetch_attempts_total",
        "Fetch attempts issued by the cache, retries included"
    ).unwrap();

    pub static ref CACHE_FETCH_FAILURES: Counter = Counter::new(
        "cache_fetch_failures_total",
        "Fetches that exhausted every attempt"
    ).unwrap();

    pub static ref SYNTHETIC_FALLBACKS: Counter = Counter::new(
        "adapter_synthetic_fallbacks_total",
        "Adapter calls answered with synthetic data"
    ).unwrap();

    pub static ref FAVORITES: Gauge = Gauge::new(
        "favorites_count",
        "Tokens currently marked as favorite"
    ).unwrap();

    pub static ref SOURCE_LATENCY: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "source_latency_seconds",
            "Upstream provider call latency in seconds"
        ).buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0])
    ).unwrap();
}

pub fn init() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(CACHE_HITS.clone()))?;
    REGISTRY.register(Box::new(CACHE_JOINED_FETCHES.clone()))?;
    REGISTRY.register(Box::new(CACHE_FETCH_ATTEMPTS.clone()))?;
    REGISTRY.register(Box::new(CACHE_FETCH_FAILURES.clone()))?;
    REGISTRY.register(Box::new(SYNTHETIC_FALLBACKS.clone()))?;
    REGISTRY.register(Box::new(FAVORITES.clone()))?;
    REGISTRY.register(Box::new(SOURCE_LATENCY.clone()))?;
    Ok(())
}

/// Text exposition of everything in `REGISTRY`.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
