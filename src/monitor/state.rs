use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, ErrorKind};
use crate::models::{MarketStats, Provenance, Token, ViewFilters};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ViewError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

/// A token row as presented, merged with favorite membership.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayToken {
    pub token: Token,
    pub is_favorite: bool,
    /// Not a current live observation: last-known snapshot, data kept after a
    /// failed refresh, or synthetic data.
    pub is_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedToken {
    pub address: String,
    pub token: Option<Token>,
    pub is_loading: bool,
    pub error: Option<ViewError>,
    pub provenance: Option<Provenance>,
}

/// Everything an observer of the monitor sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub entities: Vec<DisplayToken>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<ViewError>,
    pub favorites_count: usize,
    pub provenance: Option<Provenance>,
    pub stats: MarketStats,
    pub filters: ViewFilters,
    pub selected: Option<SelectedToken>,
    pub updated_at: DateTime<Utc>,
}

impl ViewState {
    pub fn empty(filters: ViewFilters) -> Self {
        Self {
            entities: Vec::new(),
            is_loading: false,
            is_refreshing: false,
            error: None,
            favorites_count: 0,
            provenance: None,
            stats: MarketStats::default(),
            filters,
            selected: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.provenance.as_ref().map_or(false, Provenance::is_synthetic)
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.token.address.as_str()).collect()
    }

    /// Whether two states differ in anything but their timestamp.
    pub fn same_content(&self, other: &ViewState) -> bool {
        self.entities == other.entities
            && self.is_loading == other.is_loading
            && self.is_refreshing == other.is_refreshing
            && self.error == other.error
            && self.favorites_count == other.favorites_count
            && self.provenance == other.provenance
            && self.filters == other.filters
            && self.selected == other.selected
    }
}
