//! Bar interval and lookback period, parsed from the provider's semantic strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::error::{Classified, ErrorKind};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {what} '{value}'")]
pub struct ParseIntervalError {
    what: &'static str,
    value: String,
}

impl Classified for ParseIntervalError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Bar width. One minute is the smallest bar the system consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    OneMinute,
    TwoMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
    NinetyMinutes,
    OneHour,
    OneDay,
}

impl Interval {
    pub const ALL: [Interval; 9] = [
        Self::OneMinute,
        Self::TwoMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::SixtyMinutes,
        Self::NinetyMinutes,
        Self::OneHour,
        Self::OneDay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::TwoMinutes => "2m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::SixtyMinutes => "60m",
            Self::NinetyMinutes => "90m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }

    pub fn duration(self) -> Duration {
        let minutes = match self {
            Self::OneMinute => 1,
            Self::TwoMinutes => 2,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
            Self::SixtyMinutes | Self::OneHour => 60,
            Self::NinetyMinutes => 90,
            Self::OneDay => 24 * 60,
        };
        Duration::from_secs(minutes * 60)
    }

    pub fn is_intraday(self) -> bool {
        self != Self::OneDay
    }
}

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or(ParseIntervalError {
                what: "interval",
                value: s,
            })
    }
}

/// How far back a fetch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    OneDay,
    FiveDays,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    FiveYears,
    Max,
}

impl Period {
    pub const ALL: [Period; 9] = [
        Self::OneDay,
        Self::FiveDays,
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
        Self::TwoYears,
        Self::FiveYears,
        Self::Max,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
            Self::Max => "max",
        }
    }

    /// Calendar days covered. `Max` is capped at ten years for generators.
    pub fn calendar_days(self) -> i64 {
        match self {
            Self::OneDay => 1,
            Self::FiveDays => 5,
            Self::OneMonth => 31,
            Self::ThreeMonths => 92,
            Self::SixMonths => 183,
            Self::OneYear => 365,
            Self::TwoYears => 730,
            Self::FiveYears => 1826,
            Self::Max => 3652,
        }
    }
}

impl FromStr for Period {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or(ParseIntervalError {
                what: "period",
                value: s,
            })
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Interval);
string_serde!(Period);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_interval() {
        for interval in Interval::ALL {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
        assert_eq!(" 1D ".parse::<Interval>().unwrap(), Interval::OneDay);
    }

    #[test]
    fn rejects_unknown_interval() {
        let err = "3d".parse::<Interval>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "unknown interval '3d'");
    }

    #[test]
    fn parses_every_period() {
        for period in Period::ALL {
            assert_eq!(period.as_str().parse::<Period>().unwrap(), period);
        }
        assert!("2mo".parse::<Period>().is_err());
    }

    #[test]
    fn only_daily_is_not_intraday() {
        let intraday: Vec<_> = Interval::ALL.iter().filter(|i| i.is_intraday()).collect();
        assert_eq!(intraday.len(), 8);
        assert!(!Interval::OneDay.is_intraday());
    }

    #[test]
    fn serde_uses_semantic_strings() {
        let json = serde_json::to_string(&(Interval::FifteenMinutes, Period::ThreeMonths)).unwrap();
        assert_eq!(json, r#"["15m","3mo"]"#);
        let back: (Interval, Period) = serde_json::from_str(&json).unwrap();
        assert_eq!(back, (Interval::FifteenMinutes, Period::ThreeMonths));
    }
}
