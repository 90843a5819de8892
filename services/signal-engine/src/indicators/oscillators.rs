//! Bounded oscillators: RSI, Stochastic, Williams %R, CCI, MFI
//!
//! Feeds are close-only, so high, low and typical price are all the close.

use super::averages::sma;

/// RSI with Wilder smoothing. 100 when there are no losses in the window.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: &f64| c.max(0.0);
    let loss = |c: &f64| (-c).max(0.0);

    let mut avg_gain = changes[..period].iter().map(gain).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(loss).sum::<f64>() / period as f64;

    for change in &changes[period..] {
        avg_gain = (avg_gain * (period - 1) as f64 + gain(change)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss(change)) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

fn window_range(window: &[f64]) -> (f64, f64) {
    window
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

/// %K for the window ending at the last value. 50 when the range is flat.
fn stochastic_k(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let (low, high) = window_range(window);
    let close = *closes.last()?;
    if high - low == 0.0 {
        return Some(50.0);
    }
    Some((close - low) / (high - low) * 100.0)
}

/// Stochastic (%K, %D); %D is the 3-period SMA of %K
pub fn stochastic(closes: &[f64], period: usize) -> (Option<f64>, Option<f64>) {
    let k = stochastic_k(closes, period);

    let d_period = 3;
    if closes.len() < period + d_period - 1 {
        return (k, None);
    }
    let ks: Option<Vec<f64>> = (0..d_period)
        .rev()
        .map(|lag| stochastic_k(&closes[..closes.len() - lag], period))
        .collect();
    let d = ks.and_then(|ks| sma(&ks, d_period));

    (k, d)
}

/// Williams %R in [-100, 0]. -50 when the range is flat.
pub fn williams_r(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let (low, high) = window_range(window);
    let close = *closes.last()?;
    if high - low == 0.0 {
        return Some(-50.0);
    }
    Some((high - close) / (high - low) * -100.0)
}

/// Commodity Channel Index with the 0.015 Lambert constant
pub fn cci(closes: &[f64], period: usize) -> Option<f64> {
    let mean = sma(closes, period)?;
    let window = &closes[closes.len() - period..];
    let mean_deviation = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
    if mean_deviation == 0.0 {
        return Some(0.0);
    }
    let typical = *closes.last()?;
    Some((typical - mean) / (0.015 * mean_deviation))
}

/// Money Flow Index over `period` price changes
pub fn mfi(closes: &[f64], volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 || volumes.len() != closes.len() {
        return None;
    }

    let start = closes.len() - period;
    let (mut positive, mut negative) = (0.0, 0.0);
    for i in start..closes.len() {
        let flow = closes[i] * volumes[i];
        if closes[i] > closes[i - 1] {
            positive += flow;
        } else if closes[i] < closes[i - 1] {
            negative += flow;
        }
    }

    if negative == 0.0 {
        return Some(if positive == 0.0 { 50.0 } else { 100.0 });
    }
    let ratio = positive / negative;
    Some(100.0 - 100.0 / (1.0 + ratio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_flat_series_is_100() {
        let closes = vec![100.0; 25];
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn test_rsi_bounds() {
        let falling: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        assert_eq!(rsi(&falling, 14), Some(0.0));

        let zigzag: Vec<f64> = (0..40)
            .map(|i| {
                let step = if i % 3 == 0 { 2.0 } else { -1.0 };
                100.0 + step * (i % 7) as f64
            })
            .collect();
        let value = rsi(&zigzag, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
        assert_eq!(rsi(&zigzag[..14], 14), None);
    }

    #[test]
    fn test_stochastic_d_is_mean_of_recent_k() {
        let closes: Vec<f64> = vec![
            10.0, 11.0, 12.0, 11.0, 13.0, 14.0, 13.0, 15.0, 16.0, 15.0, 14.0, 16.0, 17.0, 16.0,
            15.0, 18.0,
        ];
        let (k, d) = stochastic(&closes, 14);
        let k3 = stochastic_k(&closes[..14], 14).unwrap();
        let k2 = stochastic_k(&closes[..15], 14).unwrap();
        let k1 = k.unwrap();
        assert!((d.unwrap() - (k1 + k2 + k3) / 3.0).abs() < 1e-9);
        assert_eq!(k1, 100.0);
    }

    #[test]
    fn test_flat_ranges() {
        let flat = vec![5.0; 20];
        assert_eq!(stochastic(&flat, 14), (Some(50.0), Some(50.0)));
        assert_eq!(williams_r(&flat, 14), Some(-50.0));
        assert_eq!(cci(&flat, 20), Some(0.0));
        assert_eq!(mfi(&flat, &[1.0; 20], 14), Some(50.0));
    }

    #[test]
    fn test_mfi_all_up_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let volumes = vec![100.0; 20];
        assert_eq!(mfi(&closes, &volumes, 14), Some(100.0));
    }
}
