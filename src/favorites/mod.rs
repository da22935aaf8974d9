//! Durable favorite set keyed by token address.

use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::Token;

pub mod storage;

pub use storage::{FavoritesRecord, FavoritesStorage, JsonFileStorage, MemoryStorage};

/// A favorite as displayed: live data when the address is in the current
/// fetch window, otherwise the last-known snapshot flagged stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteView {
    pub token: Token,
    pub is_live: bool,
}

pub struct FavoritesStore {
    storage: Box<dyn FavoritesStorage>,
    /// Insertion order; addresses are unique.
    favorites: Vec<Token>,
    dirty: bool,
    last_error: Option<Error>,
}

impl FavoritesStore {
    /// Reads the stored set once.
    pub fn open(storage: Box<dyn FavoritesStorage>) -> Result<Self> {
        let record = storage.load()?;
        Ok(Self::from_record(storage, record))
    }

    /// Like `open`, but an unreadable record starts an empty set.
    pub fn open_or_empty(storage: Box<dyn FavoritesStorage>) -> Self {
        match storage.load() {
            Ok(record) => Self::from_record(storage, record),
            Err(e) => {
                error!("Could not read favorites, starting empty: {}", e);
                let mut store = Self::from_record(storage, None);
                store.last_error = Some(e);
                store
            }
        }
    }

    /// Duplicate addresses in the record collapse to their first occurrence.
    fn from_record(storage: Box<dyn FavoritesStorage>, record: Option<FavoritesRecord>) -> Self {
        let mut store = Self {
            storage,
            favorites: Vec::new(),
            dirty: false,
            last_error: None,
        };
        for token in record.map(|r| r.favorites).unwrap_or_default() {
            if !store.is_favorite(&token.address) {
                store.favorites.push(token);
            }
        }
        info!("Favorites store opened with {} entries", store.favorites.len());
        metrics::FAVORITES.set(store.count() as f64);
        store
    }

    /// Adds or removes `token` by address and writes the whole set through.
    /// Returns whether the token is a favorite afterwards.
    pub fn toggle(&mut self, token: &Token) -> bool {
        let now_favorite = match self.position(&token.address) {
            Some(index) => {
                self.favorites.remove(index);
                false
            }
            None => {
                self.favorites.push(token.clone());
                true
            }
        };
        self.persist();
        metrics::FAVORITES.set(self.count() as f64);
        now_favorite
    }

    /// Removes by address alone; used when no snapshot is at hand.
    pub fn remove(&mut self, address: &str) -> bool {
        match self.position(address) {
            Some(index) => {
                self.favorites.remove(index);
                self.persist();
                metrics::FAVORITES.set(self.count() as f64);
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.favorites.iter().map(|t| t.address.clone()).collect()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.favorites
    }

    pub fn get(&self, address: &str) -> Option<&Token> {
        self.favorites.iter().find(|t| t.address == address)
    }

    pub fn is_favorite(&self, address: &str) -> bool {
        self.position(address).is_some()
    }

    pub fn count(&self) -> usize {
        self.favorites.len()
    }

    /// True while the durable record lags the in-memory set.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Merges favorites with a freshly fetched list by address.
    pub fn reconcile(&self, live: &[Token]) -> Vec<FavoriteView> {
        let by_address: HashMap<&str, &Token> =
            live.iter().map(|t| (t.address.as_str(), t)).collect();
        self.favorites
            .iter()
            .map(|saved| match by_address.get(saved.address.as_str()) {
                Some(current) => FavoriteView { token: (*current).clone(), is_live: true },
                None => FavoriteView { token: saved.clone(), is_live: false },
            })
            .collect()
    }

    /// Replaces snapshots with live data where available. Kept in memory; the
    /// next mutation writes them out.
    pub fn refresh_snapshots(&mut self, live: &[Token]) -> usize {
        let by_address: HashMap<&str, &Token> =
            live.iter().map(|t| (t.address.as_str(), t)).collect();
        let mut updated = 0;
        for saved in &mut self.favorites {
            if let Some(current) = by_address.get(saved.address.as_str()) {
                if *saved != **current {
                    *saved = (*current).clone();
                    updated += 1;
                }
            }
        }
        updated
    }

    fn position(&self, address: &str) -> Option<usize> {
        self.favorites.iter().position(|t| t.address == address)
    }

    fn persist(&mut self) {
        if self.dirty {
            warn!("Retrying favorites save after an earlier failure");
        }
        let record = FavoritesRecord::new(self.favorites.clone());
        match self.storage.save(&record) {
            Ok(()) => {
                self.dirty = false;
                self.last_error = None;
            }
            Err(e) => {
                error!("Failed to persist {} favorites: {}", record.favorites.len(), e);
                self.dirty = true;
                self.last_error = Some(e);
            }
        }
    }
}
