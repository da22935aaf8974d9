use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::models::market::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    Volume,
    Price,
    PriceChange,
    Liquidity,
    MarketCap,
}

impl SortBy {
    /// Sort key value for a token; absent values count as zero and `-0.0`
    /// is folded into `0.0`.
    pub fn key(&self, token: &Token) -> f64 {
        let value = match self {
            SortBy::Volume => token.volume_24h,
            SortBy::Price => token.price_usd,
            SortBy::PriceChange => token.price_change_24h,
            SortBy::Liquidity => token.liquidity.usd,
            SortBy::MarketCap => token.market_cap,
        };
        match value {
            Some(v) if v.is_finite() => v + 0.0,
            _ => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Volume => "volume",
            SortBy::Price => "price",
            SortBy::PriceChange => "priceChange",
            SortBy::Liquidity => "liquidity",
            SortBy::MarketCap => "marketCap",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "volume" => Ok(SortBy::Volume),
            "price" => Ok(SortBy::Price),
            "pricechange" | "change" => Ok(SortBy::PriceChange),
            "liquidity" => Ok(SortBy::Liquidity),
            "marketcap" | "mcap" => Ok(SortBy::MarketCap),
            other => Err(Error::InvalidInput(format!("unknown sort key '{}'", other))),
        }
    }
}

/// Price buckets: micro < $0.0001 <= small < $0.01 <= medium < $1 <= large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceRange {
    #[default]
    All,
    Micro,
    Small,
    Medium,
    Large,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        match self {
            PriceRange::All => true,
            PriceRange::Micro => price < 0.0001,
            PriceRange::Small => (0.0001..0.01).contains(&price),
            PriceRange::Medium => (0.01..1.0).contains(&price),
            PriceRange::Large => price >= 1.0,
        }
    }
}

impl FromStr for PriceRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(PriceRange::All),
            "micro" => Ok(PriceRange::Micro),
            "small" => Ok(PriceRange::Small),
            "medium" => Ok(PriceRange::Medium),
            "large" => Ok(PriceRange::Large),
            other => Err(Error::InvalidInput(format!("unknown price range '{}'", other))),
        }
    }
}

/// Which upstream feed a batch is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchMode {
    TopByVolume,
    NewlyListed,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub sort_by: SortBy,
    pub filter_new: bool,
    pub search_query: String,
    pub price_range: PriceRange,
    pub min_volume: Option<f64>,
}

/// Identifies one cached result set. Equal signatures share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSignature {
    pub limit: usize,
    pub sort_by: SortBy,
    pub filter_new: bool,
    pub search_query: String,
}

impl RequestSignature {
    pub fn new(limit: usize, sort_by: SortBy, filter_new: bool, search_query: &str) -> Self {
        Self {
            limit,
            sort_by,
            filter_new,
            search_query: normalize_query(search_query),
        }
    }

    pub fn fetch_mode(&self) -> FetchMode {
        if self.filter_new {
            FetchMode::NewlyListed
        } else {
            FetchMode::TopByVolume
        }
    }

    /// The pipeline filter applied before a fetch result is cached.
    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec {
            sort_by: self.sort_by,
            filter_new: self.filter_new,
            search_query: self.search_query.clone(),
            price_range: PriceRange::All,
            min_volume: None,
        }
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tokens(limit={}, sort={}, new={}, q='{}')",
            self.limit, self.sort_by, self.filter_new, self.search_query
        )
    }
}

pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Everything the presentation layer can change about the token list view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFilters {
    pub limit: usize,
    pub sort_by: SortBy,
    pub filter_new: bool,
    pub search_query: String,
    pub price_range: PriceRange,
    pub min_volume: Option<f64>,
    pub show_favorites_only: bool,
}

impl Default for ViewFilters {
    fn default() -> Self {
        Self {
            limit: 50,
            sort_by: SortBy::Volume,
            filter_new: false,
            search_query: String::new(),
            price_range: PriceRange::All,
            min_volume: None,
            show_favorites_only: false,
        }
    }
}

impl ViewFilters {
    pub fn signature(&self) -> RequestSignature {
        RequestSignature::new(self.limit, self.sort_by, self.filter_new, &self.search_query)
    }

    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec {
            sort_by: self.sort_by,
            filter_new: self.filter_new,
            search_query: normalize_query(&self.search_query),
            price_range: self.price_range,
            min_volume: self.min_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_queries_share_signature() {
        let a = RequestSignature::new(10, SortBy::Volume, false, "  BoNk ");
        let b = RequestSignature::new(10, SortBy::Volume, false, "bonk");
        assert_eq!(a, b);
        assert_ne!(a, RequestSignature::new(10, SortBy::Price, false, "bonk"));
    }

    #[test]
    fn test_price_range_bucket_bounds() {
        assert!(PriceRange::Micro.contains(0.00009));
        assert!(!PriceRange::Micro.contains(0.0001));
        assert!(PriceRange::Small.contains(0.0001));
        assert!(!PriceRange::Small.contains(0.01));
        assert!(PriceRange::Medium.contains(0.01));
        assert!(!PriceRange::Medium.contains(1.0));
        assert!(PriceRange::Large.contains(1.0));
        assert!(PriceRange::All.contains(123.0));
    }

    #[test]
    fn test_sort_key_treats_absent_as_zero() {
        let token = Token::new("addr", "X", "X");
        assert_eq!(SortBy::MarketCap.key(&token), 0.0);
        assert_eq!(SortBy::Liquidity.key(&token), 0.0);
    }

    #[test]
    fn test_parse_sort_by() {
        assert_eq!("priceChange".parse::<SortBy>().unwrap(), SortBy::PriceChange);
        assert_eq!("market-cap".parse::<SortBy>().unwrap(), SortBy::MarketCap);
        assert!("holders".parse::<SortBy>().is_err());
    }

    #[test]
    fn test_fetch_mode_follows_filter_new() {
        let mut filters = ViewFilters::default();
        assert_eq!(filters.signature().fetch_mode(), FetchMode::TopByVolume);
        filters.filter_new = true;
        assert_eq!(filters.signature().fetch_mode(), FetchMode::NewlyListed);
    }
}
