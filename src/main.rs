use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use token_monitor::api::{MarketDataProvider, TokenDataCollector};
use token_monitor::cli::Cli;
use token_monitor::config::{Config, DEFAULT_CONFIG_PATH};
use token_monitor::favorites::{FavoritesStore, JsonFileStorage};
use token_monitor::logging;
use token_monitor::metrics;
use token_monitor::models::HistoryWindow;
use token_monitor::monitor::{FilterUpdate, TokenMonitor, ViewState};
use token_monitor::utils::format::{
    format_address, format_amount, format_percent, format_price, format_time, format_token_name,
    format_usd,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref(), cli.debug)?;

    info!("Starting token monitor...");

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = match Config::load_or_default(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {:?}: {:#}", config_path, e);
            return Err(anyhow::anyhow!("Configuration loading failed: {}", e));
        }
    };
    info!("Configuration loaded successfully.");

    if let Err(e) = metrics::init() {
        warn!("Metrics registry unavailable: {}", e);
    }

    let collector = TokenDataCollector::from_config(&config.api)?;
    info!("Market data sources: {}", collector.source_names().join(", "));
    let provider: Arc<dyn MarketDataProvider> = Arc::new(collector);

    let favorites = FavoritesStore::open_or_empty(Box::new(JsonFileStorage::new(&config.favorites.path)));
    let monitor = Arc::new(TokenMonitor::new(
        provider,
        favorites,
        &config.cache,
        cli.limit.unwrap_or(config.display.default_limit),
    ));

    let update = FilterUpdate {
        limit: cli.limit,
        sort_by: Some(cli.sort),
        filter_new: Some(cli.new),
        price_range: Some(cli.price_range),
        min_volume: cli.min_volume.map(Some),
        show_favorites_only: Some(cli.favorites_only),
        search_query: cli.search.clone(),
    };
    let mut state = monitor.set_filter(update).await?;

    for address in &cli.toggle_favorite {
        match monitor.toggle_favorite(address).await {
            Ok(true) => info!("Added {} to favorites", address),
            Ok(false) => info!("Removed {} from favorites", address),
            Err(e) => error!("Could not toggle favorite {}: {}", address, e),
        }
        state = monitor.state();
    }

    render(&state);
    if let Some(address) = &cli.detail {
        show_detail(&monitor, address, cli.history).await;
    }

    if !cli.once {
        monitor.start().await;
        let mut updates = monitor.subscribe();
        info!("Following updates, press Ctrl-C to exit");
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = updates.borrow_and_update().clone();
                    render(&state);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
        monitor.shutdown().await;
    }

    if cli.print_metrics {
        match metrics::render() {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render metrics: {}", e),
        }
    }
    Ok(())
}

fn render(state: &ViewState) {
    let now = Utc::now();
    println!();
    if state.is_loading {
        println!("Loading tokens...");
        return;
    }
    if let Some(err) = &state.error {
        println!("! {}: {}", err.kind, err.message);
    }
    if state.is_synthetic() {
        println!("! Showing sample data: market data sources are unavailable");
    }

    println!(
        "{:<4} {:<26} {:>14} {:>9} {:>10} {:>10} {:>10} {:>10}",
        "#", "Token", "Price", "24h", "Volume", "Liquidity", "MCap", "Updated"
    );
    for (i, row) in state.entities.iter().enumerate() {
        let t = &row.token;
        let marker = match (row.is_favorite, row.is_stale) {
            (true, true) => "*~",
            (true, false) => "*",
            (false, true) => "~",
            (false, false) => "",
        };
        println!(
            "{:<4} {:<26} {:>14} {:>9} {:>10} {:>10} {:>10} {:>10}",
            format!("{}{}", i + 1, marker),
            format_token_name(&t.name, &t.symbol, 22),
            format_price(t.price_usd, 2),
            format_percent(t.price_change_24h),
            format_amount(t.volume_24h, 2),
            format_amount(t.liquidity.usd, 2),
            format_amount(t.market_cap, 2),
            format_time(t.last_updated, now),
        );
    }

    let stats = &state.stats;
    println!(
        "{} tokens | volume {} | liquidity {} | avg 24h {} | top {} | bottom {} | favorites {}{}",
        stats.token_count,
        format_usd(Some(stats.total_volume)),
        format_usd(Some(stats.total_liquidity)),
        format_percent(Some(stats.average_price_change)),
        stats.top_gainer.as_deref().unwrap_or("-"),
        stats.top_loser.as_deref().unwrap_or("-"),
        state.favorites_count,
        if state.is_refreshing { " | refreshing" } else { "" },
    );
}

async fn show_detail(monitor: &TokenMonitor, address: &str, window: Option<HistoryWindow>) {
    match monitor.select_token(address).await {
        Ok(token) => {
            println!();
            println!("{} ({})", token.name, format_address(&token.address, 6, 6));
            println!("  price      {}", format_price(token.price_usd, 4));
            println!("  24h change {}", format_percent(token.price_change_24h));
            println!("  volume     {}", format_usd(token.volume_24h));
            println!("  liquidity  {}", format_usd(token.liquidity.usd));
            println!("  market cap {}", format_usd(token.market_cap));
            println!("  fdv        {}", format_usd(token.fdv));
            println!("  txns 24h   {} buys / {} sells", token.txns.buys, token.txns.sells);
        }
        Err(e) => {
            println!("! {}", e);
            return;
        }
    }

    if let Some(window) = window {
        match monitor.price_history(address, window).await {
            Ok(history) => {
                if history.is_synthetic() {
                    println!("  (sample history, sources unavailable)");
                }
                for point in &history.value {
                    println!(
                        "  {}  {}",
                        point.time.format("%m-%d %H:%M"),
                        format_price(Some(point.price), 4)
                    );
                }
            }
            Err(e) => println!("! history unavailable: {}", e),
        }
    }
}
