#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use token_monitor::api::{MarketDataProvider, TokenDataCollector, TokenSource};
use token_monitor::config::CacheConfig;
use token_monitor::error::{Error, Result};
use token_monitor::favorites::{FavoritesStorage, FavoritesStore};
use token_monitor::models::{HistoryWindow, PricePoint, Token};
use token_monitor::monitor::TokenMonitor;

/// Token with the fields the listing filter looks at.
pub fn token(address: &str, symbol: &str, price: f64, volume: f64, liquidity: f64) -> Token {
    let mut t = Token::new(address, symbol, format!("{} Token", symbol));
    t.price_usd = Some(price);
    t.volume_24h = Some(volume);
    t.liquidity.usd = Some(liquidity);
    t.price_change_24h = Some(1.0);
    t
}

/// Ten tokens, `A` with volume 150 and liquidity 5000, `B` with volume 50.
pub fn sample_market() -> Vec<Token> {
    let mut tokens = vec![
        token("addr-A", "A", 1.0, 150.0, 5_000.0),
        token("addr-B", "B", 1.0, 50.0, 5_000.0),
    ];
    for i in 0..8 {
        let symbol = format!("T{}", i);
        tokens.push(token(
            &format!("addr-{}", symbol),
            &symbol,
            0.5 + i as f64,
            10_000.0 * (i + 1) as f64,
            50_000.0,
        ));
    }
    tokens
}

/// A provider that serves a fixed list and counts calls.
pub struct StubSource {
    pub tokens: Vec<Token>,
    pub list_calls: AtomicU32,
    pub failing: AtomicBool,
    pub delay: Duration,
}

impl StubSource {
    pub fn new(tokens: Vec<Token>) -> Arc<Self> {
        Self::with_delay(tokens, Duration::ZERO)
    }

    pub fn with_delay(tokens: Vec<Token>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            list_calls: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::NetworkFailure("stub offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TokenSource for StubSource {
    fn name(&self) -> String {
        "stub".to_string()
    }

    async fn top_tokens(&self, limit: usize) -> Result<Vec<Token>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.check()?;
        Ok(self.tokens.iter().take(limit).cloned().collect())
    }

    async fn new_tokens(&self, limit: usize) -> Result<Vec<Token>> {
        self.top_tokens(limit).await
    }

    async fn token(&self, address: &str) -> Result<Option<Token>> {
        self.check()?;
        Ok(self.tokens.iter().find(|t| t.address == address).cloned())
    }

    async fn price_history(&self, _address: &str, _window: HistoryWindow) -> Result<Vec<PricePoint>> {
        self.check()?;
        Ok(Vec::new())
    }
}

/// A monitor over one stub source with default cache timings.
pub fn monitor_over(source: Arc<StubSource>, storage: Box<dyn FavoritesStorage>) -> Arc<TokenMonitor> {
    let collector = TokenDataCollector::new(vec![source as Arc<dyn TokenSource>]);
    let provider: Arc<dyn MarketDataProvider> = Arc::new(collector);
    let favorites = FavoritesStore::open(storage).expect("favorites storage readable");
    Arc::new(TokenMonitor::new(provider, favorites, &CacheConfig::default(), 10))
}

/// Lets spawned fetches finish under paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
