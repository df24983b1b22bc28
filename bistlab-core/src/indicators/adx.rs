//! Average Directional Index (ADX), simplified.
//!
//! +DM = up move when it exceeds the down move and is positive, else 0 (and
//! symmetrically for -DM). DI± = 100 * SMA(DM±, n) / (ATR(n) + EPSILON).
//! DX = 100 * |DI+ - DI-| / (DI+ + DI- + EPSILON), ADX = SMA(DX, n).
//! With n = 14: DI± valid from index 14, ADX from 27.

use super::atr::atr;
use super::sma::sma;
use super::EPSILON;
use crate::domain::Bar;

#[derive(Debug, Clone, PartialEq)]
pub struct AdxOutput {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxOutput {
    let n = bars.len();
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let atr = atr(bars, period);
    let plus_avg = sma(&plus_dm, period);
    let minus_avg = sma(&minus_dm, period);

    let plus_di: Vec<f64> = plus_avg
        .iter()
        .zip(&atr)
        .map(|(dm, tr)| 100.0 * dm / (tr + EPSILON))
        .collect();
    let minus_di: Vec<f64> = minus_avg
        .iter()
        .zip(&atr)
        .map(|(dm, tr)| 100.0 * dm / (tr + EPSILON))
        .collect();
    let dx: Vec<f64> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| 100.0 * (p - m).abs() / (p + m + EPSILON))
        .collect();

    AdxOutput {
        adx: sma(&dx, period),
        plus_di,
        minus_di,
    }
}
