//! MACD: EMA(fast) - EMA(slow), signal = EMA(signal) of the MACD line,
//! histogram = line - signal.
//!
//! With (12, 26, 9) the line is valid from index 25 and the signal from 33.

use super::ema::ema;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdOutput {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdOutput {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&line, signal_period);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    MacdOutput {
        line,
        signal,
        histogram,
    }
}
