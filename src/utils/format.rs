//! Display formatting for token figures.

use chrono::{DateTime, Utc};

const MISSING: &str = "-";

/// Adaptive precision: 8 decimals below $0.0001, 6 below $1, otherwise
/// `decimals` with thousands separators.
pub fn format_price(price: Option<f64>, decimals: usize) -> String {
    match price {
        Some(p) if p.is_finite() => {
            if p < 0.0001 {
                format!("${:.8}", p)
            } else if p < 1.0 {
                format!("${:.6}", p)
            } else {
                format!("${}", with_separators(p, decimals))
            }
        }
        _ => MISSING.to_string(),
    }
}

pub fn format_percent(percent: Option<f64>) -> String {
    match percent {
        Some(p) if p.is_finite() => {
            let sign = if p >= 0.0 { "+" } else { "" };
            format!("{}{:.2}%", sign, p)
        }
        _ => MISSING.to_string(),
    }
}

/// Compact K/M/B notation.
pub fn format_amount(amount: Option<f64>, decimals: usize) -> String {
    match amount {
        Some(a) if a.is_finite() => {
            if a >= 1e9 {
                format!("{:.*}B", decimals, a / 1e9)
            } else if a >= 1e6 {
                format!("{:.*}M", decimals, a / 1e6)
            } else if a >= 1e3 {
                format!("{:.*}K", decimals, a / 1e3)
            } else {
                format!("{:.*}", decimals, a)
            }
        }
        _ => MISSING.to_string(),
    }
}

pub fn format_usd(amount: Option<f64>) -> String {
    match amount {
        Some(a) if a.is_finite() => {
            let sign = if a < 0.0 { "-" } else { "" };
            format!("{}${}", sign, with_separators(a.abs(), 2))
        }
        _ => MISSING.to_string(),
    }
}

/// "Just now", "5m ago", "3h ago", "2d ago", or the date for anything older
/// than a week.
pub fn format_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(timestamp);
    if diff.num_seconds() < 60 {
        "Just now".to_string()
    } else if diff.num_minutes() < 60 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_hours() < 24 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 7 {
        format!("{}d ago", diff.num_days())
    } else {
        timestamp.format("%Y-%m-%d").to_string()
    }
}

/// `ABCD...WXYZ`; addresses too short to truncate are returned as is.
pub fn format_address(address: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= start + end {
        return address.to_string();
    }
    let head: String = chars[..start].iter().collect();
    let tail: String = chars[chars.len() - end..].iter().collect();
    format!("{}...{}", head, tail)
}

/// `Name (SYM)`, cut to `max_len` characters with a trailing ellipsis.
pub fn format_token_name(name: &str, symbol: &str, max_len: usize) -> String {
    let display = if symbol.is_empty() {
        name.to_string()
    } else {
        format!("{} ({})", name, symbol)
    };
    if display.chars().count() > max_len {
        let cut: String = display.chars().take(max_len).collect();
        format!("{}...", cut)
    } else {
        display
    }
}

fn with_separators(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value);
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac_part {
        Some(f) => format!("{}.{}", grouped, f),
        None => grouped,
    }
}
