//! Sector-organised ticker lists.
//!
//! Stored as TOML (`[sectors]` table: sector name -> tickers). The built-in
//! universe is BIST-30 with Turkish sector names; the same names key the
//! compile-time sector profile table in [`crate::levels`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use crate::error::{Classified, ErrorKind};

/// BIST-100 index, the market-filter reference.
pub const INDEX_TICKER: &str = "XU100";

/// Sector label for tickers missing from the universe.
pub const UNMAPPED_SECTOR: &str = "Diğer";

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize universe: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("ticker {ticker} listed in both {first} and {second}")]
    DuplicateTicker {
        ticker: String,
        first: String,
        second: String,
    },

    #[error("universe has no tickers")]
    Empty,
}

impl Classified for UniverseError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Universe {
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate: tickers are upper-cased and each belongs to one sector.
    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        let mut universe: Universe = toml::from_str(content)?;
        for tickers in universe.sectors.values_mut() {
            for t in tickers.iter_mut() {
                *t = t.trim().to_ascii_uppercase();
            }
        }
        universe.validate()?;
        Ok(universe)
    }

    pub fn validate(&self) -> Result<(), UniverseError> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (sector, tickers) in &self.sectors {
            for t in tickers {
                if let Some(first) = seen.insert(t.as_str(), sector.as_str()) {
                    return Err(UniverseError::DuplicateTicker {
                        ticker: t.clone(),
                        first: first.to_string(),
                        second: sector.clone(),
                    });
                }
            }
        }
        if seen.is_empty() {
            return Err(UniverseError::Empty);
        }
        Ok(())
    }

    /// All tickers, sorted.
    pub fn all_tickers(&self) -> Vec<String> {
        let mut all: Vec<String> = self.sectors.values().flatten().cloned().collect();
        all.sort();
        all
    }

    pub fn sector_tickers(&self, sector: &str) -> Option<&[String]> {
        self.sectors.get(sector).map(|v| v.as_slice())
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(|s| s.as_str()).collect()
    }

    pub fn ticker_count(&self) -> usize {
        self.sectors.values().map(|v| v.len()).sum()
    }

    pub fn sector_of(&self, ticker: &str) -> Option<&str> {
        self.sectors
            .iter()
            .find(|(_, tickers)| tickers.iter().any(|t| t == ticker))
            .map(|(sector, _)| sector.as_str())
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.sector_of(ticker).is_some()
    }

    /// Ticker -> sector lookup table.
    pub fn sector_map(&self) -> HashMap<String, String> {
        self.sectors
            .iter()
            .flat_map(|(sector, tickers)| tickers.iter().map(move |t| (t.clone(), sector.clone())))
            .collect()
    }

    /// BIST-30 constituents grouped by sector.
    pub fn bist30() -> Self {
        let table: [(&str, &[&str]); 16] = [
            ("Bankacılık", &["AKBNK", "GARAN", "ISCTR", "YKBNK"]),
            ("Holding", &["ALARK", "KCHOL", "SAHOL"]),
            ("Havacılık", &["PGSUS", "THYAO"]),
            ("Otomotiv", &["FROTO", "TOASO"]),
            ("Enerji", &["ASTOR", "ENJSA"]),
            ("Petrokimya", &["PETKM", "SASA", "TUPRS"]),
            ("Perakende", &["BIMAS", "MGROS"]),
            ("Gıda", &["ULKER"]),
            ("Demir-Çelik", &["EREGL", "KRDMD"]),
            ("Telekomünikasyon", &["TCELL", "TTKOM"]),
            ("Savunma", &["ASELS"]),
            ("Cam", &["SISE"]),
            ("Madencilik", &["KOZAL"]),
            ("Gayrimenkul", &["EKGYO"]),
            ("Teknoloji", &["KONTR"]),
            ("Kimya", &["GUBRF", "HEKTS"]),
        ];
        let sectors = table
            .iter()
            .map(|(sector, tickers)| {
                (
                    sector.to_string(),
                    tickers.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();
        Self { sectors }
    }

    pub fn to_toml(&self) -> Result<String, UniverseError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::bist30()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bist30_has_thirty_unique_tickers() {
        let u = Universe::bist30();
        assert_eq!(u.ticker_count(), 30);
        assert_eq!(u.all_tickers().len(), 30);
        assert!(u.validate().is_ok());
    }

    #[test]
    fn sector_lookup() {
        let u = Universe::bist30();
        assert_eq!(u.sector_of("GARAN"), Some("Bankacılık"));
        assert_eq!(u.sector_of("THYAO"), Some("Havacılık"));
        assert_eq!(u.sector_of("NOPE"), None);
        assert_eq!(u.sector_map().get("BIMAS").map(String::as_str), Some("Perakende"));
    }

    #[test]
    fn toml_roundtrip() {
        let u = Universe::bist30();
        let toml_str = u.to_toml().unwrap();
        let parsed = Universe::from_toml(&toml_str).unwrap();
        assert_eq!(u, parsed);
    }

    #[test]
    fn from_toml_normalises_case() {
        let u = Universe::from_toml("[sectors]\nBankacılık = [\"akbnk\", \" garan \"]\n").unwrap();
        assert_eq!(u.all_tickers(), vec!["AKBNK", "GARAN"]);
    }

    #[test]
    fn duplicate_ticker_is_rejected() {
        let err = Universe::from_toml("[sectors]\nA = [\"X\"]\nB = [\"X\"]\n").unwrap_err();
        assert!(matches!(err, UniverseError::DuplicateTicker { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn empty_universe_is_rejected() {
        assert!(matches!(
            Universe::from_toml("[sectors]\n"),
            Err(UniverseError::Empty)
        ));
    }
}
