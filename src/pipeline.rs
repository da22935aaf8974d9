//! Pure filter → search → sort pipeline over fetched tokens.
//!
//! `apply` performs no I/O and is deterministic: equal primary sort keys are
//! ordered by ascending address, so the output is a total order and applying
//! the same filter twice yields the same list.

use std::cmp::Ordering;

use crate::models::{FilterSpec, Token};

pub const MIN_VOLUME_USD: f64 = 100.0;
pub const MIN_LIQUIDITY_USD: f64 = 1000.0;

pub fn apply(tokens: Vec<Token>, spec: &FilterSpec) -> Vec<Token> {
    let query = spec.search_query.trim().to_lowercase();

    let mut out: Vec<Token> = tokens
        .into_iter()
        .filter(is_listable)
        .filter(|t| !spec.filter_new || t.newly_listed)
        .filter(|t| matches_query(t, &query))
        .filter(|t| passes_numeric_filters(t, spec))
        .collect();

    out.sort_by(|a, b| compare(a, b, spec));
    out
}

/// Drops listing artifacts: no address, no positive price, volume at or
/// below $100 or liquidity at or below $1000.
pub fn is_listable(token: &Token) -> bool {
    if token.address.trim().is_empty() {
        return false;
    }
    let price_ok = matches!(token.price_usd, Some(p) if p.is_finite() && p > 0.0);
    let volume_ok = token.volume_24h.unwrap_or(0.0) > MIN_VOLUME_USD;
    let liquidity_ok = token.liquidity.usd.unwrap_or(0.0) > MIN_LIQUIDITY_USD;
    price_ok && volume_ok && liquidity_ok
}

/// Case-insensitive substring match on symbol, name or address. `query`
/// must already be lower-cased; an empty query matches everything.
pub fn matches_query(token: &Token, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    token.symbol.to_lowercase().contains(query)
        || token.name.to_lowercase().contains(query)
        || token.address.to_lowercase().contains(query)
}

fn passes_numeric_filters(token: &Token, spec: &FilterSpec) -> bool {
    let price = token.price_usd.unwrap_or(0.0);
    if !spec.price_range.contains(price) {
        return false;
    }
    match spec.min_volume {
        Some(min) => token.volume_24h.unwrap_or(0.0) >= min,
        None => true,
    }
}

/// Descending by the chosen sort key, ties by ascending address.
pub fn compare(a: &Token, b: &Token, spec: &FilterSpec) -> Ordering {
    let ka = spec.sort_by.key(a);
    let kb = spec.sort_by.key(b);
    kb.total_cmp(&ka).then_with(|| a.address.cmp(&b.address))
}
