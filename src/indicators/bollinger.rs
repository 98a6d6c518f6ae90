// Bollinger Bands - SMA plus population standard deviation bands

/// One band triple for a single bar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Simple moving average over the whole window.
pub fn sma(window: &[f64]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

/// Population standard deviation around a known mean.
pub fn pop_std_dev(window: &[f64], mean: f64) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let variance = window
        .iter()
        .map(|price| {
            let diff = price - mean;
            diff * diff
        })
        .sum::<f64>()
        / window.len() as f64;
    variance.sqrt()
}

/// Bands for each index of `closes` (oldest to newest). Indices below
/// `length - 1` are left at zero; fewer closes than `length` yields an empty
/// series.
pub fn band_series(closes: &[f64], length: usize, deviation: f64) -> Vec<BollingerBands> {
    let n = closes.len();
    if length == 0 || n < length {
        return Vec::new();
    }

    let mut series = vec![BollingerBands::default(); n];
    for i in (length - 1)..n {
        let window = &closes[i + 1 - length..=i];
        let middle = sma(window);
        let sd = pop_std_dev(window, middle);
        series[i] = BollingerBands {
            upper: middle + deviation * sd,
            middle,
            lower: middle - deviation * sd,
        };
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(sma(&[]), 0.0);
    }

    #[test]
    fn test_pop_std_dev() {
        // population sigma of {2, 4, 4, 4, 5, 5, 7, 9} is exactly 2
        let window = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mean = sma(&window);
        assert!((pop_std_dev(&window, mean) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_band_series_flat_prices_collapse() {
        let closes = vec![100.0; 10];
        let series = band_series(&closes, 4, 2.0);
        assert_eq!(series.len(), 10);
        // below the first full window everything stays zeroed
        assert_eq!(series[2], BollingerBands::default());
        for bands in &series[3..] {
            assert_eq!(bands.middle, 100.0);
            assert_eq!(bands.upper, 100.0);
            assert_eq!(bands.lower, 100.0);
        }
    }

    #[test]
    fn test_band_series_short_input_is_empty() {
        assert!(band_series(&[1.0, 2.0], 8, 1.0).is_empty());
    }

    #[test]
    fn test_band_series_spread() {
        let closes = vec![1.0, 3.0, 1.0, 3.0, 1.0, 3.0];
        let series = band_series(&closes, 2, 1.0);
        let last = series[5];
        assert_eq!(last.middle, 2.0);
        assert!((last.upper - 3.0).abs() < 1e-12);
        assert!((last.lower - 1.0).abs() < 1e-12);
    }
}
