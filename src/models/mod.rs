pub mod filter;
pub mod market;
pub mod source;

pub use filter::{FetchMode, FilterSpec, PriceRange, RequestSignature, SortBy, ViewFilters};
pub use market::{HistoryWindow, Liquidity, MarketStats, PricePoint, Token, Txns};
pub use source::{Provenance, Sourced};

pub type TokenBatch = Sourced<Vec<Token>>;
pub type TokenLookup = Sourced<Option<Token>>;
pub type PriceHistory = Sourced<Vec<PricePoint>>;
