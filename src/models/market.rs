use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txns {
    pub buys: u64,
    pub sells: u64,
}

/// A token as displayed by the monitor. `address` is the only identity key:
/// two values with the same address are the same token regardless of drift
/// in the other fields between refreshes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub name: String,
    #[serde(rename = "priceUSD")]
    pub price_usd: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub liquidity: Liquidity,
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    #[serde(default)]
    pub txns: Txns,
    pub last_updated: DateTime<Utc>,
    /// Set by the adapter when the token came from the newly-listed feed.
    #[serde(default)]
    pub newly_listed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dex_id: Option<String>,
}

impl Token {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            name: name.into(),
            price_usd: None,
            price_change_24h: None,
            volume_24h: None,
            liquidity: Liquidity::default(),
            market_cap: None,
            fdv: None,
            txns: Txns::default(),
            last_updated: Utc::now(),
            newly_listed: false,
            pair_address: None,
            dex_id: None,
        }
    }

    pub fn liquidity_usd(&self) -> Option<f64> {
        self.liquidity.usd
    }
}

/// One sample of a token's price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl HistoryWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryWindow::Day => "24h",
            HistoryWindow::Week => "7d",
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            HistoryWindow::Day => chrono::Duration::hours(24),
            HistoryWindow::Week => chrono::Duration::days(7),
        }
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "24h" | "1d" => Ok(HistoryWindow::Day),
            "7d" | "1w" => Ok(HistoryWindow::Week),
            other => Err(Error::InvalidInput(format!("unknown history window '{}'", other))),
        }
    }
}

/// Aggregate figures over a displayed token list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketStats {
    pub token_count: usize,
    pub total_volume: f64,
    pub average_price_change: f64,
    pub total_liquidity: f64,
    pub top_gainer: Option<String>,
    pub top_loser: Option<String>,
}

impl MarketStats {
    pub fn from_tokens<'a, I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a Token>,
    {
        let mut stats = MarketStats::default();
        let mut total_change = 0.0;
        let mut max_gain = f64::NEG_INFINITY;
        let mut max_loss = f64::INFINITY;

        for token in tokens {
            let change = token.price_change_24h.unwrap_or(0.0);
            stats.token_count += 1;
            stats.total_volume += token.volume_24h.unwrap_or(0.0);
            stats.total_liquidity += token.liquidity.usd.unwrap_or(0.0);
            total_change += change;

            if change > max_gain {
                max_gain = change;
                stats.top_gainer = Some(token.symbol.clone());
            }
            if change < max_loss {
                max_loss = change;
                stats.top_loser = Some(token.symbol.clone());
            }
        }

        if stats.token_count > 0 {
            stats.average_price_change = total_change / stats.token_count as f64;
        }
        stats
    }
}
