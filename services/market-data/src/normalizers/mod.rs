// Normalization logic for unifying data from different sources
use crate::types::*;
use rust_decimal::Decimal;
use tracing::debug;

/// Validate that a quote is usable (positive price, non-negative volume)
pub fn validate_quote(quote: &Quote) -> Result<()> {
    if quote.price <= Decimal::ZERO {
        return Err(MarketDataError::InvalidResponse(format!(
            "Price must be positive for {}, got {}",
            quote.asset, quote.price
        )));
    }

    if quote.volume < Decimal::ZERO {
        return Err(MarketDataError::InvalidResponse(format!(
            "Volume must be non-negative for {}, got {}",
            quote.asset, quote.volume
        )));
    }

    if !quote.change_24h.is_finite() {
        return Err(MarketDataError::InvalidResponse(format!(
            "Non-finite 24h change for {}",
            quote.asset
        )));
    }

    Ok(())
}

/// Sort history by timestamp and drop points that would break the
/// strictly-increasing invariant or carry non-positive prices.
pub fn normalize_history(mut points: Vec<HistoricalPoint>) -> Vec<HistoricalPoint> {
    points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let before = points.len();
    let mut normalized: Vec<HistoricalPoint> = Vec::with_capacity(points.len());
    for point in points {
        if point.price <= Decimal::ZERO || point.volume < Decimal::ZERO {
            continue;
        }
        if let Some(last) = normalized.last() {
            if point.timestamp <= last.timestamp {
                continue;
            }
        }
        normalized.push(point);
    }

    let dropped = before - normalized.len();
    if dropped > 0 {
        debug!("Dropped {} malformed history points", dropped);
    }

    normalized
}

/// Keep only the most recent `periods` points
pub fn tail(points: Vec<HistoricalPoint>, periods: usize) -> Vec<HistoricalPoint> {
    let skip = points.len().saturating_sub(periods);
    points.into_iter().skip(skip).collect()
}
