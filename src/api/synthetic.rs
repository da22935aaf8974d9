//! Deterministic stand-in data served when every provider fails.
//!
//! Values are fixed per index so repeated fallbacks produce the same list;
//! callers tell it apart from market data through `Provenance::Synthetic`.

use chrono::{DateTime, Duration, Utc};

use crate::models::{FetchMode, HistoryWindow, Liquidity, PricePoint, Token, Txns};

struct Seed {
    symbol: &'static str,
    name: &'static str,
    price: f64,
    change: f64,
    volume: f64,
}

const SEEDS: &[Seed] = &[
    Seed { symbol: "SOL", name: "Solana", price: 100.50, change: 5.2, volume: 1_500_000_000.0 },
    Seed { symbol: "USDC", name: "USD Coin", price: 1.00, change: 0.05, volume: 800_000_000.0 },
    Seed { symbol: "BONK", name: "Bonk", price: 0.000023, change: -2.5, volume: 25_000_000.0 },
    Seed { symbol: "JUP", name: "Jupiter", price: 0.85, change: 8.3, volume: 45_000_000.0 },
    Seed { symbol: "RAY", name: "Raydium", price: 3.45, change: -1.2, volume: 12_000_000.0 },
    Seed { symbol: "MNGO", name: "Mango", price: 0.025, change: 15.8, volume: 8_500_000.0 },
    Seed { symbol: "SRM", name: "Serum", price: 0.42, change: 3.4, volume: 5_200_000.0 },
    Seed { symbol: "COPE", name: "Cope", price: 0.012, change: -5.6, volume: 3_100_000.0 },
    Seed { symbol: "TENSOR", name: "Tensor", price: 0.55, change: 12.3, volume: 6_800_000.0 },
    Seed { symbol: "HNT", name: "Helium", price: 4.85, change: 0.8, volume: 9_200_000.0 },
];

pub const SUPPLY: f64 = 1_000_000_000.0;

/// Synthetic addresses are a single digit repeated 44 times.
pub fn synthetic_address(index: usize) -> String {
    (index % 10).to_string().repeat(44)
}

fn seed_token(index: usize, seed: &Seed, now: DateTime<Utc>) -> Token {
    let i = index as u64;
    Token {
        address: synthetic_address(index),
        symbol: seed.symbol.to_string(),
        name: seed.name.to_string(),
        price_usd: Some(seed.price),
        price_change_24h: Some(seed.change),
        volume_24h: Some(seed.volume),
        liquidity: Liquidity { usd: Some(seed.volume * 0.3) },
        market_cap: Some(seed.price * SUPPLY * 0.9),
        fdv: Some(seed.price * SUPPLY),
        txns: Txns { buys: 400 + i * 53, sells: 300 + i * 41 },
        last_updated: now - Duration::minutes(5 * index as i64),
        newly_listed: false,
        pair_address: Some(format!("pair{}", index)),
        dex_id: Some("raydium".to_string()),
    }
}

pub fn tokens(limit: usize, mode: FetchMode, now: DateTime<Utc>) -> Vec<Token> {
    SEEDS
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, seed)| {
            let mut token = seed_token(i, seed, now);
            token.newly_listed = mode == FetchMode::NewlyListed;
            token
        })
        .collect()
}

pub fn token(address: &str, now: DateTime<Utc>) -> Option<Token> {
    SEEDS
        .iter()
        .enumerate()
        .find(|(i, _)| synthetic_address(*i) == address)
        .map(|(i, seed)| seed_token(i, seed, now))
}

/// 25 evenly spaced samples ending at `now` with a slight upward drift.
pub fn history(window: HistoryWindow, now: DateTime<Utc>) -> Vec<PricePoint> {
    const POINTS: i64 = 25;
    let step = window.duration() / (POINTS as i32 - 1);
    let mut price = 100.0_f64;

    (0..POINTS)
        .map(|i| {
            let drift = ((i * 7) % 5) as f64 - 1.8;
            price = (price * (1.0 + drift / 100.0)).max(0.0001);
            PricePoint {
                time: now - step * (POINTS - 1 - i) as i32,
                price,
                volume: Some(100_000.0 + ((i * 37_000) % 900_000) as f64),
            }
        })
        .collect()
}
