use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::api::normalize::{self, list_at};
use crate::api::rate_limit::{self, RateLimiter};
use crate::api::TokenSource;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::models::{HistoryWindow, PricePoint, Token};

const RATE_LIMIT_KEY: &str = "birdeye";
const CHAIN: &str = "solana";

pub struct BirdeyeClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    min_interval: Duration,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl BirdeyeClient {
    pub fn new(config: &ApiConfig, rate_limiter: Arc<Mutex<RateLimiter>>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(config.request_timeout()).build()?,
            api_key: config.birdeye_api_key.clone(),
            base_url: config.birdeye_base_url.trim_end_matches('/').to_string(),
            min_interval: config.min_request_interval(),
            rate_limiter,
        })
    }

    async fn make_request(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        rate_limit::wait_turn(&self.rate_limiter, RATE_LIMIT_KEY, self.min_interval).await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.client.get(&url).query(params).header("x-chain", CHAIN);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => {
                let body: Value = response.json().await?;
                if body.get("success").and_then(Value::as_bool) == Some(false) {
                    let message = body
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("request rejected");
                    return Err(Error::NetworkFailure(format!("Birdeye {}: {}", endpoint, message)));
                }
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("Birdeye {}", endpoint))),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Birdeye rate limit hit on {}", endpoint);
                Err(Error::NetworkFailure("Birdeye rate limit exceeded".into()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::NetworkFailure(format!("Birdeye rejected credentials ({})", response.status())))
            }
            status => Err(Error::NetworkFailure(format!(
                "Birdeye {} failed with status: {}",
                endpoint, status
            ))),
        }
    }

    fn tokens_from(payload: &Value) -> Result<Vec<Token>> {
        let items = list_at(payload, &["data.tokens", "data.items", "data"])?;
        Ok(normalize::normalize_tokens(items))
    }

    fn history_type(window: HistoryWindow) -> &'static str {
        match window {
            HistoryWindow::Day => "15m",
            HistoryWindow::Week => "1H",
        }
    }
}

#[async_trait]
impl TokenSource for BirdeyeClient {
    fn name(&self) -> String {
        "birdeye".to_string()
    }

    async fn top_tokens(&self, limit: usize) -> Result<Vec<Token>> {
        let payload = self
            .make_request(
                "defi/tokenlist",
                &[
                    ("sort_by", "v24hUSD".to_string()),
                    ("sort_type", "desc".to_string()),
                    ("offset", "0".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let tokens = Self::tokens_from(&payload)?;
        debug!("Birdeye returned {} top tokens", tokens.len());
        Ok(tokens)
    }

    async fn new_tokens(&self, limit: usize) -> Result<Vec<Token>> {
        let payload = self
            .make_request("defi/v2/tokens/new_listing", &[("limit", limit.to_string())])
            .await?;
        let tokens = Self::tokens_from(&payload)?;
        debug!("Birdeye returned {} new listings", tokens.len());
        Ok(tokens)
    }

    async fn token(&self, address: &str) -> Result<Option<Token>> {
        let payload = match self
            .make_request("defi/token_overview", &[("address", address.to_string())])
            .await
        {
            Ok(payload) => payload,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        match payload.get("data") {
            None | Some(Value::Null) => Ok(None),
            Some(data) => {
                let mut data = data.clone();
                if data.is_object() && data.get("address").is_none() {
                    data["address"] = json!(address);
                }
                normalize::normalize_token(&data).map(Some)
            }
        }
    }

    async fn price_history(&self, address: &str, window: HistoryWindow) -> Result<Vec<PricePoint>> {
        let now = Utc::now();
        let from = now - window.duration();
        let payload = self
            .make_request(
                "defi/history_price",
                &[
                    ("address", address.to_string()),
                    ("address_type", "token".to_string()),
                    ("type", Self::history_type(window).to_string()),
                    ("time_from", from.timestamp().to_string()),
                    ("time_to", now.timestamp().to_string()),
                ],
            )
            .await?;
        let items = list_at(&payload, &["data.items"])?;
        Ok(normalize::normalize_history(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_from_tokenlist_payload() {
        let payload = json!({
            "success": true,
            "data": {
                "updateUnixTime": 1_700_000_000,
                "tokens": [
                    { "address": "So11111111111111111111111111111111111111112", "symbol": "SOL", "name": "Wrapped SOL",
                      "price": 100.5, "v24hUSD": 1.5e9, "liquidity": 4.5e8, "mc": 4.5e10 },
                    { "symbol": "BROKEN" }
                ]
            }
        });
        let tokens = BirdeyeClient::tokens_from(&payload).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "SOL");
        assert_eq!(tokens[0].volume_24h, Some(1.5e9));
    }

    #[test]
    fn test_tokens_from_rejects_missing_list() {
        let err = BirdeyeClient::tokens_from(&json!({ "success": true, "data": {} })).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_failure() {
        let config = ApiConfig {
            birdeye_base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            min_request_interval_ms: 0,
            ..ApiConfig::default()
        };
        let client = BirdeyeClient::new(&config, Arc::new(Mutex::new(RateLimiter::new()))).unwrap();
        let err = client.top_tokens(5).await.unwrap_err();
        assert!(matches!(err, Error::NetworkFailure(_)));
    }
}
