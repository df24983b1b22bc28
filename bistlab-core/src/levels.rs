//! Entry, stop and two-target exit plan scaled by ATR and a per-sector profile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::Bar;
use crate::indicators::IndicatorSnapshot;
use crate::universe::{Universe, UNMAPPED_SECTOR};

/// ATR fallback as a fraction of the close when the snapshot has none.
const FALLBACK_ATR_FRACTION: f64 = 0.02;
/// Stop distance bounds as fractions of the close.
const MIN_STOP_FRACTION: f64 = 0.015;
const MAX_STOP_FRACTION: f64 = 0.05;
/// Target multiples of risk.
pub const TP1_R_MULTIPLE: f64 = 2.5;
pub const TP2_R_MULTIPLE: f64 = 4.0;
/// Minimum targets as multiples of the entry.
const TP1_FLOOR: f64 = 1.05;
const TP2_FLOOR: f64 = 1.08;
/// Technical stop offsets in ATR units.
const EMA21_STOP_ATR: f64 = 0.3;
const SWING_LOW_STOP_ATR: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SectorProfile {
    pub name: &'static str,
    pub sl_atr_multiplier: f64,
    pub tp_atr_multiplier: f64,
    pub max_hold_days: u32,
}

const fn profile(
    name: &'static str,
    sl_atr_multiplier: f64,
    tp_atr_multiplier: f64,
    max_hold_days: u32,
) -> SectorProfile {
    SectorProfile {
        name,
        sl_atr_multiplier,
        tp_atr_multiplier,
        max_hold_days,
    }
}

pub const DEFAULT_PROFILE: SectorProfile = profile("default", 2.0, 3.5, 10);

/// Volatility profiles. Defensive sectors get tighter stops and longer holds.
pub const SECTOR_PROFILES: &[SectorProfile] = &[
    profile("Bankacılık", 1.5, 3.0, 10),
    profile("Holding", 1.8, 3.5, 12),
    profile("Havacılık", 2.2, 4.0, 8),
    profile("Otomotiv", 1.8, 3.5, 12),
    profile("Enerji", 2.2, 4.0, 8),
    profile("Petrokimya", 2.0, 3.5, 10),
    profile("Perakende", 1.5, 3.0, 15),
    profile("Gıda", 1.5, 3.0, 15),
    profile("Demir-Çelik", 2.0, 3.5, 10),
    profile("Telekomünikasyon", 1.5, 3.0, 15),
    profile("Savunma", 2.0, 4.0, 10),
    profile("Cam", 1.8, 3.5, 12),
    profile("Madencilik", 2.5, 4.5, 8),
    profile("Gayrimenkul", 2.0, 3.5, 10),
    profile("Teknoloji", 2.2, 4.0, 8),
    profile("Kimya", 2.5, 4.5, 8),
];

impl SectorProfile {
    pub fn for_sector(sector: &str) -> &'static SectorProfile {
        SECTOR_PROFILES
            .iter()
            .find(|p| p.name == sector)
            .unwrap_or(&DEFAULT_PROFILE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelSource {
    AtrBased,
    Technical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub entry: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub atr: f64,
    pub atr_pct: f64,
    /// Stop distance in percent of entry.
    pub sl_pct: f64,
    /// TP1 distance in percent of entry.
    pub tp_pct: f64,
    pub rr1: f64,
    pub rr2: f64,
    pub max_hold_days: u32,
    pub sector: String,
    pub stop_source: LevelSource,
    pub target_source: LevelSource,
}

impl Levels {
    /// Names of violated invariants; empty when the plan is sound.
    pub fn check_invariants(&self) -> Vec<&'static str> {
        let mut violated = Vec::new();
        if !(self.stop_loss < self.entry) {
            violated.push("stop_loss < entry");
        }
        if !(self.entry < self.tp1) {
            violated.push("entry < tp1");
        }
        if !(self.tp1 <= self.tp2) {
            violated.push("tp1 <= tp2");
        }
        if !(1.5..=5.0).contains(&self.sl_pct) {
            violated.push("sl_pct in [1.5, 5.0]");
        }
        if !(self.rr1 >= 2.0) {
            violated.push("rr1 >= 2");
        }
        violated
    }

    pub fn risk(&self) -> f64 {
        self.entry - self.stop_loss
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Plans levels for a candidate bar. Holds the ticker -> sector table only.
#[derive(Debug, Clone)]
pub struct LevelPlanner {
    sectors: HashMap<String, String>,
}

impl Default for LevelPlanner {
    fn default() -> Self {
        Self::new(&Universe::bist30())
    }
}

impl LevelPlanner {
    pub fn new(universe: &Universe) -> Self {
        Self {
            sectors: universe.sector_map(),
        }
    }

    pub fn sector_of(&self, ticker: &str) -> &str {
        self.sectors
            .get(ticker)
            .map(String::as_str)
            .unwrap_or(UNMAPPED_SECTOR)
    }

    pub fn profile_of(&self, ticker: &str) -> &'static SectorProfile {
        SectorProfile::for_sector(self.sector_of(ticker))
    }

    pub fn plan(&self, ticker: &str, bar: &Bar, snapshot: &IndicatorSnapshot) -> Levels {
        let sector = self.sector_of(ticker);
        plan_with_profile(sector, SectorProfile::for_sector(sector), bar, snapshot)
    }
}

/// The planning arithmetic for an explicit sector and profile.
pub fn plan_with_profile(
    sector: &str,
    profile: &SectorProfile,
    bar: &Bar,
    snapshot: &IndicatorSnapshot,
) -> Levels {
    let close = bar.close;
    let atr = snapshot
        .volatility
        .atr
        .filter(|a| *a > 0.0)
        .unwrap_or(close * FALLBACK_ATR_FRACTION);

    let sl_dist = (atr * profile.sl_atr_multiplier)
        .clamp(close * MIN_STOP_FRACTION, close * MAX_STOP_FRACTION);
    let atr_stop = close - sl_dist;

    let technical = [
        snapshot.trend.ema21.map(|e| e - EMA21_STOP_ATR * atr),
        snapshot
            .structure
            .recent_low
            .map(|l| l - SWING_LOW_STOP_ATR * atr),
    ]
    .into_iter()
    .flatten()
    .reduce(f64::max);

    let (stop_loss, source) = match technical {
        Some(tech)
            if tech > atr_stop
                && tech < close
                && round2((close - tech) / close * 100.0) >= MIN_STOP_FRACTION * 100.0 =>
        {
            (tech, LevelSource::Technical)
        }
        _ => (atr_stop, LevelSource::AtrBased),
    };

    let risk = close - stop_loss;
    let tp1 = (close + risk * TP1_R_MULTIPLE).max(close * TP1_FLOOR);
    let tp2 = (close + risk * TP2_R_MULTIPLE).max(close * TP2_FLOOR);

    Levels {
        entry: close,
        stop_loss,
        tp1,
        tp2,
        atr,
        atr_pct: round2(atr / close * 100.0),
        sl_pct: round2(risk / close * 100.0),
        tp_pct: round2((tp1 - close) / close * 100.0),
        rr1: round2((tp1 - close) / risk),
        rr2: round2((tp2 - close) / risk),
        max_hold_days: profile.max_hold_days,
        sector: sector.to_string(),
        stop_source: source,
        target_source: source,
    }
}
