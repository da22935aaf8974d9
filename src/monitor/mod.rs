//! Command/query facade over the caches and the favorites store.
//!
//! Commands resolve through the caches and then publish a fresh `ViewState`.
//! A background task republishes whenever a cache entry changes, so polling
//! refreshes reach observers without any command being issued.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::api::MarketDataProvider;
use crate::cache::{fetcher, CachePolicy, Fetcher, Resolved, SyncCache};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::favorites::FavoritesStore;
use crate::models::filter::normalize_query;
use crate::models::{
    HistoryWindow, MarketStats, PriceHistory, PriceRange, RequestSignature, SortBy, Token,
    TokenBatch, TokenLookup, ViewFilters,
};
use crate::pipeline;

pub mod state;

pub use state::{DisplayToken, SelectedToken, ViewError, ViewState};

pub const MAX_LIMIT: usize = 500;

type HistoryKey = (String, HistoryWindow);

/// A partial change to the view filters; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterUpdate {
    pub limit: Option<usize>,
    pub sort_by: Option<SortBy>,
    pub filter_new: Option<bool>,
    pub price_range: Option<PriceRange>,
    /// `Some(None)` clears the threshold.
    pub min_volume: Option<Option<f64>>,
    pub show_favorites_only: Option<bool>,
    pub search_query: Option<String>,
}

impl FilterUpdate {
    fn apply_to(&self, filters: &mut ViewFilters) -> Result<()> {
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_LIMIT {
                return Err(Error::InvalidInput(format!(
                    "limit must be within 1..={}, got {}",
                    MAX_LIMIT, limit
                )));
            }
            filters.limit = limit;
        }
        if let Some(Some(min)) = self.min_volume {
            if !min.is_finite() || min < 0.0 {
                return Err(Error::InvalidInput(format!("invalid minimum volume {}", min)));
            }
        }
        if let Some(sort_by) = self.sort_by {
            filters.sort_by = sort_by;
        }
        if let Some(filter_new) = self.filter_new {
            filters.filter_new = filter_new;
        }
        if let Some(price_range) = self.price_range {
            filters.price_range = price_range;
        }
        if let Some(min_volume) = self.min_volume {
            filters.min_volume = min_volume;
        }
        if let Some(show) = self.show_favorites_only {
            filters.show_favorites_only = show;
        }
        if let Some(query) = &self.search_query {
            filters.search_query = query.clone();
        }
        Ok(())
    }
}

pub struct TokenMonitor {
    provider: Arc<dyn MarketDataProvider>,
    tokens: Arc<SyncCache<RequestSignature, TokenBatch>>,
    details: Arc<SyncCache<String, TokenLookup>>,
    history: Arc<SyncCache<HistoryKey, PriceHistory>>,
    favorites: Mutex<FavoritesStore>,
    filters: RwLock<ViewFilters>,
    selected: RwLock<Option<String>>,
    state: watch::Sender<ViewState>,
    poll_tick: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokenMonitor {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        favorites: FavoritesStore,
        config: &CacheConfig,
        default_limit: usize,
    ) -> Self {
        let list_policy = CachePolicy::from_config(config);
        let filters = ViewFilters {
            limit: default_limit.clamp(1, MAX_LIMIT),
            ..ViewFilters::default()
        };
        let mut initial = ViewState::empty(filters.clone());
        initial.favorites_count = favorites.count();
        let (state, _) = watch::channel(initial);

        Self {
            provider,
            tokens: Arc::new(SyncCache::new("tokens", list_policy)),
            details: Arc::new(SyncCache::new("token-details", list_policy)),
            history: Arc::new(SyncCache::new(
                "price-history",
                CachePolicy::history_from_config(config),
            )),
            favorites: Mutex::new(favorites),
            filters: RwLock::new(filters),
            selected: RwLock::new(None),
            state,
            poll_tick: Duration::from_millis(config.poll_tick_ms.max(1)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts the polling timers and the view updater.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        tasks.push(self.tokens.spawn_poller(self.poll_tick));
        tasks.push(self.details.spawn_poller(self.poll_tick));
        // Histories never poll; this only drops idle ones.
        tasks.push(self.history.spawn_poller(self.poll_tick));

        let monitor = Arc::clone(self);
        let mut token_changes = self.tokens.subscribe();
        let mut detail_changes = self.details.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = token_changes.changed() => {
                        if changed.is_err() { break; }
                    }
                    changed = detail_changes.changed() => {
                        if changed.is_err() { break; }
                    }
                }
                monitor.publish().await;
            }
        }));
        info!("Token monitor started (poll tick {}ms)", self.poll_tick.as_millis());
    }

    /// Stops background tasks. In-flight fetches are left to finish on their own.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Token monitor stopped");
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub async fn filters(&self) -> ViewFilters {
        self.filters.read().await.clone()
    }

    /// Resolves the current signature and publishes the result.
    pub async fn load(&self) -> ViewState {
        let signature = self.filters.read().await.signature();
        let resolved = self.tokens.resolve(signature.clone(), self.token_fetcher(&signature)).await;
        debug!("Resolved {} as {:?}", signature, resolved.state);
        self.publish().await
    }

    pub async fn search(&self, query: &str) -> ViewState {
        self.filters.write().await.search_query = query.to_string();
        self.load().await
    }

    pub async fn set_filter(&self, update: FilterUpdate) -> Result<ViewState> {
        {
            let mut filters = self.filters.write().await;
            let mut next = filters.clone();
            update.apply_to(&mut next)?;
            *filters = next;
        }
        Ok(self.load().await)
    }

    /// Invalidates every cached list, detail and history, then reloads through
    /// the caches so deduplication and retries still apply.
    pub async fn refresh(&self) -> ViewState {
        let lists = self.tokens.invalidate_all().await;
        let details = self.details.invalidate_all().await;
        let histories = self.history.invalidate_all().await;
        info!(
            "Refresh requested: invalidated {} lists, {} details, {} histories",
            lists, details, histories
        );

        let selected = self.selected.read().await.clone();
        if let Some(address) = selected {
            self.details.resolve(address.clone(), self.detail_fetcher(&address)).await;
        }
        self.load().await
    }

    /// Loads one token for the detail view. An address no source knows is
    /// `NotFound`.
    pub async fn select_token(&self, address: &str) -> Result<Token> {
        let address = address.trim().to_string();
        if address.is_empty() {
            return Err(Error::InvalidInput("empty token address".into()));
        }
        *self.selected.write().await = Some(address.clone());

        let resolved = self.details.resolve(address.clone(), self.detail_fetcher(&address)).await;
        self.publish().await;
        detail_result(&address, resolved)
    }

    pub async fn clear_selection(&self) {
        *self.selected.write().await = None;
        self.publish().await;
    }

    /// Flips favorite membership for a token currently known to the monitor.
    pub async fn toggle_favorite(&self, address: &str) -> Result<bool> {
        let token = self.find_token(address).await;
        let now_favorite = {
            let mut favorites = self.favorites.lock().await;
            match token {
                Some(token) => favorites.toggle(&token),
                None if favorites.is_favorite(address) => !favorites.remove(address),
                None => {
                    return Err(Error::NotFound(format!("token {} is not loaded", address)));
                }
            }
        };
        info!(
            "{} {} favorites",
            address,
            if now_favorite { "added to" } else { "removed from" }
        );
        self.publish().await;
        Ok(now_favorite)
    }

    pub async fn favorites(&self) -> Vec<Token> {
        self.favorites.lock().await.tokens().to_vec()
    }

    pub async fn price_history(&self, address: &str, window: HistoryWindow) -> Result<PriceHistory> {
        let key = (address.to_string(), window);
        let resolved = self.history.resolve(key, self.history_fetcher(address, window)).await;
        match (resolved.data, resolved.error) {
            (Some(history), error) => {
                if let Some(e) = error {
                    warn!("Serving {} history for {} despite: {}", window, address, e);
                }
                Ok(history)
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(Error::Internal("history resolve returned nothing".into())),
        }
    }

    /// Recomputes the observable state from the caches and favorites.
    pub async fn publish(&self) -> ViewState {
        let filters = self.filters.read().await.clone();
        let signature = filters.signature();
        let selected_address = self.selected.read().await.clone();
        self.observe(&signature, selected_address.as_deref()).await;
        let list = self.tokens.peek(&signature).await;

        let (tokens, provenance, is_loading, is_refreshing, failed, mut error) = match list {
            Some(resolved) => {
                let is_loading = resolved.is_loading();
                let is_refreshing = resolved.is_fetching && resolved.data.is_some();
                let failed = resolved.error.is_some();
                let (tokens, provenance) = match resolved.data {
                    Some(batch) => (batch.value, Some(batch.provenance)),
                    None => (Vec::new(), None),
                };
                let error = resolved.error.as_ref().map(ViewError::from);
                (tokens, provenance, is_loading, is_refreshing, failed, error)
            }
            None => (Vec::new(), None, false, false, false, None),
        };
        let synthetic = provenance.as_ref().map_or(false, |p| p.is_synthetic());
        let visible = pipeline::apply(tokens.clone(), &filters.filter_spec());

        let (entities, favorites_count) = {
            let mut favorites = self.favorites.lock().await;
            if provenance.is_some() && !synthetic {
                favorites.refresh_snapshots(&tokens);
            }
            if error.is_none() {
                error = favorites.last_error().map(ViewError::from);
            }

            let entities: Vec<DisplayToken> = if filters.show_favorites_only {
                let spec = filters.filter_spec();
                let query = normalize_query(&filters.search_query);
                let mut views = favorites.reconcile(&tokens);
                views.retain(|v| pipeline::matches_query(&v.token, &query));
                views.sort_by(|a, b| pipeline::compare(&a.token, &b.token, &spec));
                views
                    .into_iter()
                    .map(|v| DisplayToken {
                        is_stale: !v.is_live || failed || synthetic,
                        token: v.token,
                        is_favorite: true,
                    })
                    .collect()
            } else {
                visible
                    .into_iter()
                    .map(|token| DisplayToken {
                        is_favorite: favorites.is_favorite(&token.address),
                        is_stale: failed || synthetic,
                        token,
                    })
                    .collect()
            };
            (entities, favorites.count())
        };

        let selected = self.selected_view().await;
        let stats = MarketStats::from_tokens(entities.iter().map(|e| &e.token));

        let next = ViewState {
            entities,
            is_loading,
            is_refreshing,
            error,
            favorites_count,
            provenance,
            stats,
            filters,
            selected,
            updated_at: chrono::Utc::now(),
        };
        self.state.send_if_modified(|current| {
            if current.same_content(&next) {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        next
    }

    /// Only the displayed list and the selected token keep polling; other
    /// entries age out of the caches.
    async fn observe(&self, signature: &RequestSignature, selected: Option<&str>) {
        self.tokens.set_observed(|k| k == signature).await;
        self.details.set_observed(|k| Some(k.as_str()) == selected).await;
        self.history
            .set_observed(|key: &HistoryKey| Some(key.0.as_str()) == selected)
            .await;
    }

    async fn selected_view(&self) -> Option<SelectedToken> {
        let address = self.selected.read().await.clone()?;
        let resolved = self.details.peek(&address).await;
        Some(match resolved {
            Some(r) => SelectedToken {
                is_loading: r.is_loading(),
                error: r.error.as_ref().map(ViewError::from).or_else(|| {
                    match &r.data {
                        Some(lookup) if lookup.value.is_none() && r.error.is_none() => {
                            Some(ViewError::from(&Error::NotFound(address.clone())))
                        }
                        _ => None,
                    }
                }),
                provenance: r.data.as_ref().map(|d| d.provenance.clone()),
                token: r.data.and_then(|d| d.value),
                address,
            },
            None => SelectedToken {
                address,
                token: None,
                is_loading: false,
                error: None,
                provenance: None,
            },
        })
    }

    /// Current list first, then the detail cache, then favorites.
    async fn find_token(&self, address: &str) -> Option<Token> {
        let signature = self.filters.read().await.signature();
        if let Some(batch) = self.tokens.peek(&signature).await.and_then(|r| r.data) {
            if let Some(token) = batch.value.into_iter().find(|t| t.address == address) {
                return Some(token);
            }
        }
        if let Some(lookup) = self.details.peek(&address.to_string()).await.and_then(|r| r.data) {
            if let Some(token) = lookup.value {
                return Some(token);
            }
        }
        self.favorites.lock().await.get(address).cloned()
    }

    fn token_fetcher(&self, signature: &RequestSignature) -> Fetcher<TokenBatch> {
        let provider = Arc::clone(&self.provider);
        let signature = signature.clone();
        fetcher(move || {
            let provider = Arc::clone(&provider);
            let signature = signature.clone();
            async move {
                let batch = provider.fetch_batch(signature.limit, signature.fetch_mode()).await;
                Ok(batch.map(|tokens| pipeline::apply(tokens, &signature.filter_spec())))
            }
        })
    }

    fn detail_fetcher(&self, address: &str) -> Fetcher<TokenLookup> {
        let provider = Arc::clone(&self.provider);
        let address = address.to_string();
        fetcher(move || {
            let provider = Arc::clone(&provider);
            let address = address.clone();
            async move { Ok(provider.fetch_one(&address).await) }
        })
    }

    fn history_fetcher(&self, address: &str, window: HistoryWindow) -> Fetcher<PriceHistory> {
        let provider = Arc::clone(&self.provider);
        let address = address.to_string();
        fetcher(move || {
            let provider = Arc::clone(&provider);
            let address = address.clone();
            async move { Ok(provider.fetch_history(&address, window).await) }
        })
    }
}

fn detail_result(address: &str, resolved: Resolved<TokenLookup>) -> Result<Token> {
    match (resolved.data, resolved.error) {
        (Some(lookup), error) => match lookup.value {
            Some(token) => Ok(token),
            None => Err(error.unwrap_or_else(|| Error::NotFound(format!("token {}", address)))),
        },
        (None, Some(e)) => Err(e),
        (None, None) => Err(Error::NotFound(format!("token {}", address))),
    }
}
