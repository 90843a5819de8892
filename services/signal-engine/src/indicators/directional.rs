//! ATR and ADX on close-only data
//!
//! With high = low = close the true range collapses to |close - prev close|
//! and directional movement to the signed close change.

fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(current);
    for value in &values[period..] {
        current = (current * (period - 1) as f64 + value) / period as f64;
        out.push(current);
    }
    out
}

fn true_ranges(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
}

/// Average True Range (Wilder)
pub fn atr(closes: &[f64], period: usize) -> Option<f64> {
    wilder_smooth(&true_ranges(closes), period).last().copied()
}

/// Average Directional Index. Needs `2 * period + 1` closes.
pub fn adx(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(closes.len() - 1);
    let mut minus_dm = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let up = w[1] - w[0];
        let down = w[0] - w[1];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let tr = wilder_smooth(&true_ranges(closes), period);
    let plus = wilder_smooth(&plus_dm, period);
    let minus = wilder_smooth(&minus_dm, period);

    let dx: Vec<f64> = tr
        .iter()
        .zip(plus.iter().zip(minus.iter()))
        .map(|(tr, (p, m))| {
            if *tr == 0.0 {
                return 0.0;
            }
            let di_plus = p / tr * 100.0;
            let di_minus = m / tr * 100.0;
            let sum = di_plus + di_minus;
            if sum == 0.0 {
                0.0
            } else {
                (di_plus - di_minus).abs() / sum * 100.0
            }
        })
        .collect();

    wilder_smooth(&dx, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atr_constant_steps() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + 2.0 * i as f64).collect();
        assert_eq!(atr(&closes, 14), Some(2.0));
        assert_eq!(atr(&closes[..14], 14), None);
    }

    #[test]
    fn test_adx_strong_trend() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let value = adx(&closes, 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
        assert_eq!(adx(&closes[..28], 14), None);
    }

    #[test]
    fn test_adx_flat_is_zero() {
        let closes = vec![50.0; 40];
        assert_eq!(adx(&closes, 14), Some(0.0));
    }
}
