pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod favorites;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod utils;

pub use error::{Error, Result};
