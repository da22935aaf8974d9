use clap::Parser;
use std::path::PathBuf;

use crate::models::{HistoryWindow, PriceRange, SortBy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Number of tokens to fetch (defaults to display.default_limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Sort key: volume, price, priceChange, liquidity, marketCap
    #[arg(short, long, default_value = "volume")]
    pub sort: SortBy,

    /// Show newly listed tokens only
    #[arg(long)]
    pub new: bool,

    /// Case-insensitive search over symbol, name and address
    #[arg(long)]
    pub search: Option<String>,

    /// Price bucket: all, micro, small, medium, large
    #[arg(long, default_value = "all")]
    pub price_range: PriceRange,

    /// Minimum 24h volume in USD
    #[arg(long)]
    pub min_volume: Option<f64>,

    /// Show favorites only
    #[arg(long)]
    pub favorites_only: bool,

    /// Toggle a token address in favorites before rendering
    #[arg(long, value_name = "ADDRESS")]
    pub toggle_favorite: Vec<String>,

    /// Show details for a token address
    #[arg(long, value_name = "ADDRESS")]
    pub detail: Option<String>,

    /// Price history window for the detail token: 24h or 7d
    #[arg(long, requires = "detail")]
    pub history: Option<HistoryWindow>,

    /// Render once and exit instead of following updates
    #[arg(long)]
    pub once: bool,

    /// Print prometheus metrics on exit
    #[arg(long)]
    pub print_metrics: bool,
}
