use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::api::normalize::{self, list_at};
use crate::api::rate_limit::{self, RateLimiter};
use crate::api::TokenSource;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::models::{HistoryWindow, PricePoint, Token};

const RATE_LIMIT_KEY: &str = "dexscreener";
const CHAIN: &str = "solana";
/// Upper bound on addresses per `tokens/v1` call.
pub const MAX_ADDRESSES_PER_CALL: usize = 30;

pub struct DexScreenerClient {
    client: Client,
    base_url: String,
    min_interval: Duration,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl DexScreenerClient {
    pub fn new(config: &ApiConfig, rate_limiter: Arc<Mutex<RateLimiter>>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(config.request_timeout()).build()?,
            base_url: config.dexscreener_base_url.trim_end_matches('/').to_string(),
            min_interval: config.min_request_interval(),
            rate_limiter,
        })
    }

    async fn make_request(&self, endpoint: &str) -> Result<Value> {
        rate_limit::wait_turn(&self.rate_limiter, RATE_LIMIT_KEY, self.min_interval).await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("DexScreener {}", endpoint))),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("DexScreener rate limit hit on {}", endpoint);
                Err(Error::NetworkFailure("DexScreener rate limit exceeded".into()))
            }
            status => Err(Error::NetworkFailure(format!(
                "DexScreener {} failed with status: {}",
                endpoint, status
            ))),
        }
    }

    /// Solana token addresses listed by a discovery feed, in feed order.
    async fn feed_addresses(&self, endpoint: &str) -> Result<Vec<String>> {
        let payload = self.make_request(endpoint).await?;
        Ok(solana_addresses(&payload))
    }

    /// Pairs for every address, fetched in chunks.
    async fn pairs_for(&self, addresses: &[String]) -> Result<Vec<Token>> {
        let mut pairs = Vec::new();
        for chunk in addresses.chunks(MAX_ADDRESSES_PER_CALL) {
            let endpoint = format!("tokens/v1/{}/{}", CHAIN, chunk.join(","));
            let payload = self.make_request(&endpoint).await?;
            let items = list_at(&payload, &["pairs"])?;
            pairs.extend(normalize::normalize_tokens(items));
        }
        Ok(pairs)
    }

    async fn discover(&self, endpoint: &str, limit: usize, newly_listed: bool) -> Result<Vec<Token>> {
        let addresses = self.feed_addresses(endpoint).await?;
        debug!("DexScreener {} listed {} solana tokens", endpoint, addresses.len());
        let pairs = self.pairs_for(&addresses).await?;

        let mut tokens = best_pairs(pairs);
        tokens.sort_by(|a, b| {
            b.volume_24h
                .unwrap_or(0.0)
                .total_cmp(&a.volume_24h.unwrap_or(0.0))
        });
        tokens.truncate(limit);
        for token in &mut tokens {
            token.newly_listed = newly_listed;
        }
        Ok(tokens)
    }
}

/// Unique solana addresses from a boosts or profiles payload.
fn solana_addresses(payload: &Value) -> Vec<String> {
    let items = match payload.as_array() {
        Some(items) => items.as_slice(),
        None => return Vec::new(),
    };
    let mut seen = Vec::new();
    for item in items {
        if item.get("chainId").and_then(Value::as_str) != Some(CHAIN) {
            continue;
        }
        if let Some(address) = item.get("tokenAddress").and_then(Value::as_str) {
            if !seen.iter().any(|a: &String| a == address) {
                seen.push(address.to_string());
            }
        }
    }
    seen
}

/// Keeps the deepest-liquidity pair per base token address.
fn best_pairs(pairs: Vec<Token>) -> Vec<Token> {
    let mut best: HashMap<String, Token> = HashMap::new();
    for pair in pairs {
        match best.get(&pair.address) {
            Some(existing) if existing.liquidity.usd.unwrap_or(0.0) >= pair.liquidity.usd.unwrap_or(0.0) => {}
            _ => {
                best.insert(pair.address.clone(), pair);
            }
        }
    }
    best.into_values().collect()
}

#[async_trait]
impl TokenSource for DexScreenerClient {
    fn name(&self) -> String {
        "dexscreener".to_string()
    }

    async fn top_tokens(&self, limit: usize) -> Result<Vec<Token>> {
        self.discover("token-boosts/top/v1", limit, false).await
    }

    async fn new_tokens(&self, limit: usize) -> Result<Vec<Token>> {
        self.discover("token-profiles/latest/v1", limit, true).await
    }

    async fn token(&self, address: &str) -> Result<Option<Token>> {
        let pairs = self.pairs_for(&[address.to_string()]).await?;
        Ok(best_pairs(pairs).into_iter().find(|t| t.address == address))
    }

    async fn price_history(&self, _address: &str, _window: HistoryWindow) -> Result<Vec<PricePoint>> {
        Err(Error::NotFound("DexScreener does not serve price history".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_solana_addresses_filters_chain_and_dedups() {
        let payload = json!([
            { "chainId": "solana", "tokenAddress": "A" },
            { "chainId": "ethereum", "tokenAddress": "0xabc" },
            { "chainId": "solana", "tokenAddress": "B" },
            { "chainId": "solana", "tokenAddress": "A" },
            { "chainId": "solana" }
        ]);
        assert_eq!(solana_addresses(&payload), vec!["A".to_string(), "B".to_string()]);
        assert!(solana_addresses(&json!({ "pairs": [] })).is_empty());
    }

    #[test]
    fn test_best_pairs_prefers_liquidity() {
        let mut shallow = Token::new("A", "AAA", "A token");
        shallow.liquidity.usd = Some(5_000.0);
        shallow.pair_address = Some("shallow".into());
        let mut deep = shallow.clone();
        deep.liquidity.usd = Some(50_000.0);
        deep.pair_address = Some("deep".into());
        let other = Token::new("B", "BBB", "B token");

        let mut best = best_pairs(vec![shallow, deep, other]);
        best.sort_by(|a, b| a.address.cmp(&b.address));
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].pair_address.as_deref(), Some("deep"));
    }

    #[tokio::test]
    async fn test_history_is_not_offered() {
        let client = DexScreenerClient::new(&ApiConfig::default(), Arc::new(Mutex::new(RateLimiter::new()))).unwrap();
        let err = client.price_history("A", HistoryWindow::Day).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
