use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{
    FetchMode, HistoryWindow, PriceHistory, PricePoint, Sourced, Token, TokenBatch, TokenLookup,
};

pub mod birdeye;
pub mod dexscreener;
pub mod normalize;
pub mod rate_limit;
pub mod synthetic;

pub use rate_limit::RateLimiter;

/// One upstream market-data provider. Calls are single attempts; retry
/// policy belongs to the cache above.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn name(&self) -> String;
    async fn top_tokens(&self, limit: usize) -> Result<Vec<Token>>;
    async fn new_tokens(&self, limit: usize) -> Result<Vec<Token>>;
    /// `Ok(None)` when the provider answered and does not know the address.
    async fn token(&self, address: &str) -> Result<Option<Token>>;
    async fn price_history(&self, address: &str, window: HistoryWindow) -> Result<Vec<PricePoint>>;
}

/// What the rest of the crate sees: calls never fail, results carry their
/// provenance instead.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_batch(&self, limit: usize, mode: FetchMode) -> TokenBatch;
    async fn fetch_one(&self, address: &str) -> TokenLookup;
    async fn fetch_history(&self, address: &str, window: HistoryWindow) -> PriceHistory;
}

/// Queries sources in order and falls back to deterministic synthetic data.
pub struct TokenDataCollector {
    sources: Vec<Arc<dyn TokenSource>>,
}

impl TokenDataCollector {
    pub fn new(sources: Vec<Arc<dyn TokenSource>>) -> Self {
        Self { sources }
    }

    /// Birdeye first, DexScreener second, sharing one rate limiter.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new()));
        let mut sources: Vec<Arc<dyn TokenSource>> = Vec::new();

        if config.birdeye_api_key.is_some() {
            sources.push(Arc::new(birdeye::BirdeyeClient::new(config, rate_limiter.clone())?));
        } else {
            info!("No Birdeye API key configured, using DexScreener only");
        }
        sources.push(Arc::new(dexscreener::DexScreenerClient::new(config, rate_limiter)?));

        Ok(Self::new(sources))
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    fn fallback<T>(&self, what: &str, value: T, first_error: Option<Error>) -> Sourced<T> {
        let cause = first_error
            .unwrap_or_else(|| Error::NetworkFailure("no market data sources configured".into()));
        warn!("All sources failed for {}, serving synthetic data: {}", what, cause);
        metrics::SYNTHETIC_FALLBACKS.inc();
        Sourced::synthetic(value, &cause)
    }
}

#[async_trait]
impl MarketDataProvider for TokenDataCollector {
    async fn fetch_batch(&self, limit: usize, mode: FetchMode) -> TokenBatch {
        let mut first_error = None;
        for source in &self.sources {
            let started = Instant::now();
            let result = match mode {
                FetchMode::TopByVolume => source.top_tokens(limit).await,
                FetchMode::NewlyListed => source.new_tokens(limit).await,
            };
            metrics::SOURCE_LATENCY.observe(started.elapsed().as_secs_f64());

            match result {
                Ok(mut tokens) => {
                    if mode == FetchMode::NewlyListed {
                        tokens.iter_mut().for_each(|t| t.newly_listed = true);
                    }
                    tokens.truncate(limit);
                    debug!("{} served {} tokens ({:?})", source.name(), tokens.len(), mode);
                    return Sourced::live(tokens, source.name());
                }
                Err(e) => {
                    warn!("{} failed to list tokens: {}", source.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.fallback("token batch", synthetic::tokens(limit, mode, Utc::now()), first_error)
    }

    async fn fetch_one(&self, address: &str) -> TokenLookup {
        let mut first_error = None;
        for source in &self.sources {
            match source.token(address).await {
                Ok(token) => return Sourced::live(token, source.name()),
                Err(e) => {
                    warn!("{} failed to look up {}: {}", source.name(), address, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.fallback(address, synthetic::token(address, Utc::now()), first_error)
    }

    async fn fetch_history(&self, address: &str, window: HistoryWindow) -> PriceHistory {
        let mut first_error = None;
        for source in &self.sources {
            match source.price_history(address, window).await {
                Ok(points) => return Sourced::live(points, source.name()),
                Err(e) => {
                    debug!("{} has no {} history for {}: {}", source.name(), window, address, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.fallback(address, synthetic::history(window, Utc::now()), first_error)
    }
}
