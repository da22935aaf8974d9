//! Maps heterogeneous provider payloads onto the canonical `Token` shape.
//!
//! Providers disagree on field names (`v24hUSD` vs `volume.h24`, `mc` vs
//! `marketCap`, numbers vs numeric strings), so every canonical field is
//! looked up through an ordered list of candidate paths.

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Liquidity, PricePoint, Token, Txns};

const ADDRESS: &[&str] = &["address", "mint", "tokenAddress", "baseToken.address"];
const SYMBOL: &[&str] = &["symbol", "baseToken.symbol"];
const NAME: &[&str] = &["name", "baseToken.name"];
const PRICE: &[&str] = &["priceUSD", "priceUsd", "price"];
const PRICE_CHANGE: &[&str] = &[
    "priceChange24h",
    "priceChange24hPercent",
    "price24hChangePercent",
    "priceChange.h24",
];
const VOLUME: &[&str] = &["volume24h", "v24hUSD", "volume24hUSD", "volumeUSD", "volume.h24"];
const LIQUIDITY: &[&str] = &["liquidity.usd", "liquidity", "liquidityUSD"];
const MARKET_CAP: &[&str] = &["marketCap", "mc", "market_cap", "realMc"];
const FDV: &[&str] = &["fdv"];
const BUYS: &[&str] = &["txns.h24.buys", "txns.buys", "buy24h"];
const SELLS: &[&str] = &["txns.h24.sells", "txns.sells", "sell24h"];
const UPDATED: &[&str] = &[
    "lastUpdated",
    "lastTradeUnixTime",
    "updateUnixTime",
    "updates",
    "pairCreatedAt",
];

const POINT_TIME: &[&str] = &["unixTime", "time", "timestamp"];
const POINT_PRICE: &[&str] = &["value", "price", "close"];
const POINT_VOLUME: &[&str] = &["volume", "v"];

/// Follows a dotted path through nested objects.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

/// Accepts JSON numbers and numeric strings; rejects non-finite values.
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn first_number(value: &Value, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|p| lookup(value, p).and_then(as_number))
}

pub fn first_string(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| {
        lookup(value, p)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Unix seconds, unix milliseconds or an RFC 3339 string.
pub fn first_timestamp(value: &Value, paths: &[&str]) -> Option<DateTime<Utc>> {
    paths.iter().find_map(|p| {
        let raw = lookup(value, p)?;
        if let Some(s) = raw.as_str() {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
        }
        let n = as_number(raw)? as i64;
        // Anything past year 33658 in seconds is really milliseconds.
        if n > 1_000_000_000_000 {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        }
    })
}

pub fn normalize_token(value: &Value) -> Result<Token> {
    if !value.is_object() {
        return Err(Error::MalformedResponse(format!("expected token object, got {}", value)));
    }
    let address = first_string(value, ADDRESS)
        .ok_or_else(|| Error::MalformedResponse("token without address".into()))?;

    Ok(Token {
        symbol: first_string(value, SYMBOL).unwrap_or_default().to_uppercase(),
        name: first_string(value, NAME).unwrap_or_default(),
        price_usd: first_number(value, PRICE).filter(|p| *p >= 0.0),
        price_change_24h: first_number(value, PRICE_CHANGE),
        volume_24h: first_number(value, VOLUME),
        liquidity: Liquidity { usd: first_number(value, LIQUIDITY) },
        market_cap: first_number(value, MARKET_CAP),
        fdv: first_number(value, FDV),
        txns: Txns {
            buys: first_number(value, BUYS).map(|n| n.max(0.0) as u64).unwrap_or(0),
            sells: first_number(value, SELLS).map(|n| n.max(0.0) as u64).unwrap_or(0),
        },
        last_updated: first_timestamp(value, UPDATED).unwrap_or_else(Utc::now),
        newly_listed: false,
        pair_address: first_string(value, &["pairAddress"]),
        dex_id: first_string(value, &["dexId"]),
        address,
    })
}

/// Normalizes every well-formed item; items without identity are skipped.
pub fn normalize_tokens(items: &[Value]) -> Vec<Token> {
    items
        .iter()
        .filter_map(|item| match normalize_token(item) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!("Skipping token entry: {}", e);
                None
            }
        })
        .collect()
}

/// Finds the first array among the candidate paths.
pub fn list_at<'a>(payload: &'a Value, paths: &[&str]) -> Result<&'a Vec<Value>> {
    if let Some(list) = payload.as_array() {
        return Ok(list);
    }
    paths
        .iter()
        .find_map(|p| lookup(payload, p).and_then(Value::as_array))
        .ok_or_else(|| {
            Error::MalformedResponse(format!("no token list at any of {:?}", paths))
        })
}

pub fn normalize_price_point(value: &Value) -> Option<PricePoint> {
    Some(PricePoint {
        time: first_timestamp(value, POINT_TIME)?,
        price: first_number(value, POINT_PRICE).filter(|p| *p >= 0.0)?,
        volume: first_number(value, POINT_VOLUME),
    })
}

/// Normalized samples in ascending time order.
pub fn normalize_history(items: &[Value]) -> Vec<PricePoint> {
    let mut points: Vec<PricePoint> = items.iter().filter_map(normalize_price_point).collect();
    points.sort_by_key(|p| p.time);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_birdeye_shape() {
        let raw = json!({
            "address": "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263",
            "symbol": "bonk",
            "name": "Bonk",
            "price": 0.000023,
            "priceChange24hPercent": -2.5,
            "v24hUSD": 25_000_000.0,
            "liquidity": 7_500_000.0,
            "mc": 1_500_000_000.0,
            "lastTradeUnixTime": 1_700_000_000
        });
        let token = normalize_token(&raw).unwrap();
        assert_eq!(token.symbol, "BONK");
        assert_eq!(token.price_usd, Some(0.000023));
        assert_eq!(token.price_change_24h, Some(-2.5));
        assert_eq!(token.volume_24h, Some(25_000_000.0));
        assert_eq!(token.liquidity.usd, Some(7_500_000.0));
        assert_eq!(token.market_cap, Some(1_500_000_000.0));
        assert_eq!(token.last_updated.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_dexscreener_pair_shape() {
        let raw = json!({
            "chainId": "solana",
            "dexId": "raydium",
            "pairAddress": "pair0",
            "baseToken": { "address": "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", "symbol": "JUP", "name": "Jupiter" },
            "priceUsd": "0.85",
            "priceChange": { "h24": 8.3 },
            "volume": { "h24": 45_000_000 },
            "liquidity": { "usd": 13_500_000 },
            "marketCap": 1_150_000_000,
            "fdv": 8_500_000_000u64,
            "txns": { "h24": { "buys": 900, "sells": 700 } },
            "pairCreatedAt": 1_700_000_000_000u64
        });
        let token = normalize_token(&raw).unwrap();
        assert_eq!(token.address, "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN");
        assert_eq!(token.price_usd, Some(0.85));
        assert_eq!(token.volume_24h, Some(45_000_000.0));
        assert_eq!(token.liquidity.usd, Some(13_500_000.0));
        assert_eq!(token.txns, Txns { buys: 900, sells: 700 });
        assert_eq!(token.pair_address.as_deref(), Some("pair0"));
        assert_eq!(token.last_updated.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_address_is_malformed() {
        let err = normalize_token(&json!({ "symbol": "X" })).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert!(normalize_token(&json!("nope")).is_err());
    }

    #[test]
    fn test_normalize_tokens_skips_bad_items() {
        let items = vec![json!({ "address": "a1" }), json!(42), json!({ "name": "no id" })];
        let tokens = normalize_tokens(&items);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].address, "a1");
    }

    #[test]
    fn test_list_at_candidate_paths() {
        let payload = json!({ "data": { "tokens": [ { "address": "a" } ] } });
        assert_eq!(list_at(&payload, &["data.items", "data.tokens"]).unwrap().len(), 1);
        assert!(list_at(&json!({ "data": null }), &["data.tokens"]).is_err());
    }

    #[test]
    fn test_history_sorted_and_lenient() {
        let items = vec![
            json!({ "unixTime": 1_700_003_600, "value": 2.0 }),
            json!({ "unixTime": 1_700_000_000, "value": "1.5", "volume": 10 }),
            json!({ "unixTime": 1_700_007_200 }),
        ];
        let points = normalize_history(&items);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].price, 1.5);
        assert_eq!(points[0].volume, Some(10.0));
        assert!(points[0].time < points[1].time);
    }
}
