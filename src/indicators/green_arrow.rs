// Green Arrow - Bollinger-derived trend/signal indicator
// Deterministic scan over a bar window: trend flips on band breakouts,
// anti-whipsaw smoothing keeps stops monotone while a trend holds

use serde::{Deserialize, Serialize};

use crate::core::types::BufferedBar;

use super::bollinger::band_series;

/// Marks a hidden trend line. Stops and signals use -1.0 as their sentinel.
pub const EMPTY_VALUE: f64 = f64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GreenArrowParams {
    pub length: usize,
    pub deviation: i32,
    pub money_risk: f64,
    /// 0 = no signals, 1 = signals + stops, 2 = signals only (stops hidden)
    pub signal: i32,
    /// 1 = draw trend lines, 0 = hide them
    pub line: i32,
}

impl Default for GreenArrowParams {
    fn default() -> Self {
        Self {
            length: 8,
            deviation: 1,
            money_risk: 1.0,
            signal: 1,
            line: 1,
        }
    }
}

/// Per-bar indicator sample. Fields hold their sentinel unless the bar's
/// trend populates them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GreenArrowSample {
    pub up_stop: f64,
    pub down_stop: f64,
    pub up_signal: f64,
    pub down_signal: f64,
    pub up_line: f64,
    pub down_line: f64,
    pub trend: i32,
    pub is_signal: bool,
}

impl Default for GreenArrowSample {
    fn default() -> Self {
        Self {
            up_stop: -1.0,
            down_stop: -1.0,
            up_signal: -1.0,
            down_signal: -1.0,
            up_line: EMPTY_VALUE,
            down_line: EMPTY_VALUE,
            trend: 0,
            is_signal: false,
        }
    }
}

/// Compute one sample per input bar (oldest to newest). Pure function: equal
/// inputs produce bit-identical outputs. Returns an empty vector when fewer
/// bars than `length` are available.
pub fn calculate(bars: &[BufferedBar], params: &GreenArrowParams) -> Vec<GreenArrowSample> {
    let n = bars.len();
    if params.length == 0 || n < params.length {
        return Vec::new();
    }

    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let bands = band_series(&closes, params.length, params.deviation as f64);

    let mut results = vec![GreenArrowSample::default(); n];
    let mut trend: i32 = 0;

    let mut upper_band = vec![0.0; n];
    let mut lower_band = vec![0.0; n];
    let mut upper_stop = vec![0.0; n];
    let mut lower_stop = vec![0.0; n];

    for i in (params.length - 1)..n {
        upper_band[i] = bands[i].upper;
        lower_band[i] = bands[i].lower;

        // Trend flips against the previous bar's raw bands
        if i > 0 {
            if closes[i] > upper_band[i - 1] {
                trend = 1;
            }
            if closes[i] < lower_band[i - 1] {
                trend = -1;
            }
        }

        // Anti-whipsaw: bands may not retreat while the trend holds
        if i > 0 {
            if trend > 0 && lower_band[i] < lower_band[i - 1] {
                lower_band[i] = lower_band[i - 1];
            }
            if trend < 0 && upper_band[i] > upper_band[i - 1] {
                upper_band[i] = upper_band[i - 1];
            }
        }

        // Half-spread risk inflation
        let band_width = upper_band[i] - lower_band[i];
        let risk_factor = (params.money_risk - 1.0) / 2.0;
        upper_stop[i] = upper_band[i] + risk_factor * band_width;
        lower_stop[i] = lower_band[i] - risk_factor * band_width;

        // Stops follow the same monotonicity as the bands
        if i > 0 {
            if trend > 0 && lower_stop[i] < lower_stop[i - 1] {
                lower_stop[i] = lower_stop[i - 1];
            }
            if trend < 0 && upper_stop[i] > upper_stop[i - 1] {
                upper_stop[i] = upper_stop[i - 1];
            }
        }

        results[i].trend = trend;
        if trend > 0 {
            let fresh = is_fresh_signal(&results, i, params, |prev| prev.up_stop);
            fill_up_trend(&mut results[i], lower_stop[i], fresh, params);
        } else if trend < 0 {
            let fresh = is_fresh_signal(&results, i, params, |prev| prev.down_stop);
            fill_down_trend(&mut results[i], upper_stop[i], fresh, params);
        }
    }

    results
}

/// A bar carries a fresh signal when it is the first computable bar or the
/// previous bar was not in this trend (its stop held the sentinel).
fn is_fresh_signal(
    results: &[GreenArrowSample],
    index: usize,
    params: &GreenArrowParams,
    stop_of: impl Fn(&GreenArrowSample) -> f64,
) -> bool {
    if params.signal <= 0 {
        return false;
    }
    index == params.length - 1 || stop_of(&results[index - 1]) == -1.0
}

fn fill_up_trend(sample: &mut GreenArrowSample, stop_level: f64, fresh: bool, params: &GreenArrowParams) {
    sample.is_signal = fresh;
    sample.up_stop = stop_level;
    sample.up_signal = if fresh { stop_level } else { -1.0 };
    if params.line > 0 {
        sample.up_line = stop_level;
    }
    // Downtrend side stays at sentinels
    sample.down_stop = -1.0;
    sample.down_signal = -1.0;
    sample.down_line = EMPTY_VALUE;

    if params.signal == 2 {
        sample.up_stop = 0.0;
    }
}

fn fill_down_trend(sample: &mut GreenArrowSample, stop_level: f64, fresh: bool, params: &GreenArrowParams) {
    sample.is_signal = fresh;
    sample.down_stop = stop_level;
    sample.down_signal = if fresh { stop_level } else { -1.0 };
    if params.line > 0 {
        sample.down_line = stop_level;
    }
    sample.up_stop = -1.0;
    sample.up_signal = -1.0;
    sample.up_line = EMPTY_VALUE;

    if params.signal == 2 {
        sample.down_stop = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<BufferedBar> {
        let base = Utc.with_ymd_and_hms(2025, 11, 24, 10, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| BufferedBar {
                time: base + Duration::minutes(i as i64),
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1,
            })
            .collect()
    }

    fn flat_then_rising() -> Vec<BufferedBar> {
        let mut closes = vec![100.0; 10];
        for step in 1..=10 {
            closes.push(100.0 + step as f64);
        }
        bars_from_closes(&closes)
    }

    #[test]
    fn test_short_window_yields_nothing() {
        let bars = bars_from_closes(&[100.0; 5]);
        assert!(calculate(&bars, &GreenArrowParams::default()).is_empty());
    }

    #[test]
    fn test_first_computable_bar_is_fresh_signal() {
        let samples = calculate(&flat_then_rising(), &GreenArrowParams::default());
        let first = samples[7]; // length - 1
        assert_eq!(first.trend, 1);
        assert!(first.is_signal);
        assert_eq!(first.up_signal, first.up_stop);
        assert_eq!(first.down_stop, -1.0);
    }

    #[test]
    fn test_uptrend_holds_without_new_signals() {
        let samples = calculate(&flat_then_rising(), &GreenArrowParams::default());
        for sample in &samples[8..] {
            assert_eq!(sample.trend, 1);
            assert!(!sample.is_signal);
            assert_eq!(sample.up_signal, -1.0);
            assert!(sample.up_stop > 0.0);
        }
    }

    #[test]
    fn test_up_stop_never_retreats_in_uptrend() {
        let samples = calculate(&flat_then_rising(), &GreenArrowParams::default());
        let mut prev = f64::MIN;
        for sample in &samples[7..] {
            assert!(sample.up_stop >= prev);
            prev = sample.up_stop;
        }
    }

    #[test]
    fn test_downtrend_flip_emits_fresh_signal() {
        // rise first, then fall hard so the close pierces the lower band
        let mut closes = vec![100.0; 10];
        for step in 1..=5 {
            closes.push(100.0 + step as f64);
        }
        for step in 1..=8 {
            closes.push(105.0 - 3.0 * step as f64);
        }
        let samples = calculate(&bars_from_closes(&closes), &GreenArrowParams::default());

        let flip = samples
            .iter()
            .position(|sample| sample.trend == -1)
            .expect("downtrend expected");
        assert!(samples[flip].is_signal);
        assert_eq!(samples[flip].down_signal, samples[flip].down_stop);
        assert_eq!(samples[flip].up_stop, -1.0);
        assert_eq!(samples[flip].up_line, EMPTY_VALUE);
        // the bar after the flip continues the trend without a fresh signal
        assert_eq!(samples[flip + 1].trend, -1);
        assert!(!samples[flip + 1].is_signal);
    }

    #[test]
    fn test_signal_mode_two_hides_stops() {
        let params = GreenArrowParams {
            signal: 2,
            ..GreenArrowParams::default()
        };
        let samples = calculate(&flat_then_rising(), &params);
        for sample in &samples[7..] {
            assert_eq!(sample.up_stop, 0.0);
        }
    }

    #[test]
    fn test_line_flag_zero_hides_lines() {
        let params = GreenArrowParams {
            line: 0,
            ..GreenArrowParams::default()
        };
        let samples = calculate(&flat_then_rising(), &params);
        for sample in &samples[7..] {
            assert_eq!(sample.up_line, EMPTY_VALUE);
        }
    }

    #[test]
    fn test_determinism() {
        let bars = flat_then_rising();
        let params = GreenArrowParams::default();
        let a = calculate(&bars, &params);
        let b = calculate(&bars, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_money_risk_inflates_stops() {
        let mut closes = vec![100.0; 10];
        closes.extend([101.0, 99.0, 102.0, 98.0, 103.0]);
        let bars = bars_from_closes(&closes);

        let tight = calculate(&bars, &GreenArrowParams::default());
        let wide = calculate(
            &bars,
            &GreenArrowParams {
                money_risk: 3.0,
                ..GreenArrowParams::default()
            },
        );

        // k = (M-1)/2 pushes the protective stop further from the band
        let i = bars.len() - 1;
        if tight[i].trend == 1 {
            assert!(wide[i].up_stop <= tight[i].up_stop);
        } else if tight[i].trend == -1 {
            assert!(wide[i].down_stop >= tight[i].down_stop);
        }
    }
}
