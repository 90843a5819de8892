//! Bollinger bands, volume ratio and rolling volatility

use super::averages::sma;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bollinger {
    /// Band width relative to the middle band
    pub fn width(&self) -> f64 {
        if self.middle == 0.0 {
            0.0
        } else {
            (self.upper - self.lower) / self.middle
        }
    }
}

/// Bollinger bands: SMA ± multiplier × population stdev
pub fn bollinger(closes: &[f64], period: usize, multiplier: f64) -> Option<Bollinger> {
    let middle = sma(closes, period)?;
    let std_dev = stats::population_std_dev(&closes[closes.len() - period..])?;
    Some(Bollinger {
        upper: middle + std_dev * multiplier,
        middle,
        lower: middle - std_dev * multiplier,
    })
}

/// (volume SMA, current / SMA). The ratio is None when average volume is zero.
pub fn volume_ratio(volumes: &[f64], period: usize) -> (Option<f64>, Option<f64>) {
    let avg = sma(volumes, period);
    let ratio = match (avg, volumes.last()) {
        (Some(avg), Some(current)) if avg > 0.0 => Some(current / avg),
        _ => None,
    };
    (avg, ratio)
}

/// Annualized sample stdev of the last `period` log returns
pub fn rolling_volatility(closes: &[f64], period: usize) -> Option<f64> {
    if period < 2 || closes.len() < period + 1 {
        return None;
    }
    let window = &closes[closes.len() - period - 1..];
    let log_returns: Vec<f64> = window.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    stats::sample_std_dev(&log_returns).map(stats::annualize)
}
