//! Borsa Istanbul trading calendar and intraday phases.
//!
//! All calendar logic runs in `Europe/Istanbul`. A day is a trading day when it is
//! a weekday and not in the holiday table. The table holds the fixed national
//! holidays (every year) and the religious holidays for 2024-2026; callers can add
//! dates at construction. Half-day eve sessions are treated as full trading days.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const EXCHANGE_TZ: Tz = chrono_tz::Europe::Istanbul;

/// National holidays observed every year, as (month, day).
const FIXED_HOLIDAYS: [(u32, u32); 7] = [
    (1, 1),   // Yılbaşı
    (4, 23),  // Ulusal Egemenlik ve Çocuk Bayramı
    (5, 1),   // Emek ve Dayanışma Günü
    (5, 19),  // Atatürk'ü Anma, Gençlik ve Spor Bayramı
    (7, 15),  // Demokrasi ve Milli Birlik Günü
    (8, 30),  // Zafer Bayramı
    (10, 29), // Cumhuriyet Bayramı
];

/// Ramazan and Kurban Bayramı days, (year, month, day).
const RELIGIOUS_HOLIDAYS: [(i32, u32, u32); 21] = [
    (2024, 4, 10),
    (2024, 4, 11),
    (2024, 4, 12),
    (2024, 6, 16),
    (2024, 6, 17),
    (2024, 6, 18),
    (2024, 6, 19),
    (2025, 3, 30),
    (2025, 3, 31),
    (2025, 4, 1),
    (2025, 6, 6),
    (2025, 6, 7),
    (2025, 6, 8),
    (2025, 6, 9),
    (2026, 3, 20),
    (2026, 3, 21),
    (2026, 3, 22),
    (2026, 5, 27),
    (2026, 5, 28),
    (2026, 5, 29),
    (2026, 5, 30),
];

/// Intraday session phase in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingPhase {
    /// Before 09:00.
    PreMarket,
    /// 09:00-09:30, opening auction. No new entries.
    Opening,
    /// 09:30-10:00.
    BuyWindow,
    /// 10:00-17:00.
    Monitoring,
    /// 17:00-17:30.
    SellWindow,
    /// 17:30-18:00, closing auction.
    Closing,
    /// After 18:00, weekends and holidays.
    Closed,
}

impl TradingPhase {
    /// Only the buy window and the monitoring session accept new BUY calls.
    pub fn allows_new_entries(self) -> bool {
        matches!(self, Self::BuyWindow | Self::Monitoring)
    }

    fn from_local_time(t: NaiveTime) -> Self {
        let minutes = t.hour() * 60 + t.minute();
        match minutes {
            m if m < 9 * 60 => Self::PreMarket,
            m if m < 9 * 60 + 30 => Self::Opening,
            m if m < 10 * 60 => Self::BuyWindow,
            m if m < 17 * 60 => Self::Monitoring,
            m if m < 17 * 60 + 30 => Self::SellWindow,
            m if m < 18 * 60 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeCalendar {
    extra_holidays: BTreeSet<NaiveDate>,
}

impl Default for ExchangeCalendar {
    fn default() -> Self {
        Self::bist()
    }
}

impl ExchangeCalendar {
    /// Built-in Borsa Istanbul table.
    pub fn bist() -> Self {
        let extra_holidays = RELIGIOUS_HOLIDAYS
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .collect();
        Self { extra_holidays }
    }

    /// Built-in table plus additional closure dates.
    pub fn with_holidays(extra: impl IntoIterator<Item = NaiveDate>) -> Self {
        let mut cal = Self::bist();
        cal.extra_holidays.extend(extra);
        cal
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        FIXED_HOLIDAYS.contains(&(date.month(), date.day())) || self.extra_holidays.contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// First trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date;
        loop {
            d = d.succ_opt().unwrap_or(d);
            if self.is_trading_day(d) || d == NaiveDate::MAX {
                return d;
            }
        }
    }

    /// Trading days in `[start, end]`, ascending.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<Tz> {
        at.with_timezone(&EXCHANGE_TZ)
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local(at).date_naive()
    }

    /// UTC instant of `time` on `date` in exchange-local time.
    pub fn at_local(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        EXCHANGE_TZ
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn phase_at(&self, at: DateTime<Utc>) -> TradingPhase {
        let local = self.local(at);
        if !self.is_trading_day(local.date_naive()) {
            return TradingPhase::Closed;
        }
        TradingPhase::from_local_time(local.time())
    }

    pub fn is_trading_time_safe(&self, at: DateTime<Utc>) -> bool {
        self.phase_at(at).allows_new_entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        EXCHANGE_TZ
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn phases_on_a_regular_weekday() {
        let cal = ExchangeCalendar::bist();
        // 2024-03-05 is a Tuesday
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 8, 59)), TradingPhase::PreMarket);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 9, 0)), TradingPhase::Opening);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 9, 30)), TradingPhase::BuyWindow);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 10, 0)), TradingPhase::Monitoring);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 16, 59)), TradingPhase::Monitoring);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 17, 0)), TradingPhase::SellWindow);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 17, 45)), TradingPhase::Closing);
        assert_eq!(cal.phase_at(ist(2024, 3, 5, 18, 0)), TradingPhase::Closed);
    }

    #[test]
    fn only_buy_window_and_monitoring_are_safe() {
        let cal = ExchangeCalendar::bist();
        assert!(!cal.is_trading_time_safe(ist(2024, 3, 5, 9, 15)));
        assert!(cal.is_trading_time_safe(ist(2024, 3, 5, 9, 45)));
        assert!(cal.is_trading_time_safe(ist(2024, 3, 5, 14, 0)));
        assert!(!cal.is_trading_time_safe(ist(2024, 3, 5, 17, 10)));
    }

    #[test]
    fn weekends_and_holidays_are_closed() {
        let cal = ExchangeCalendar::bist();
        // Saturday
        assert_eq!(cal.phase_at(ist(2024, 3, 9, 11, 0)), TradingPhase::Closed);
        // Cumhuriyet Bayramı, a Tuesday in 2024
        assert_eq!(cal.phase_at(ist(2024, 10, 29, 11, 0)), TradingPhase::Closed);
        // Ramazan Bayramı 2025
        assert!(!cal.is_trading_day(date(2025, 3, 31)));
        assert!(cal.is_trading_day(date(2025, 4, 2)));
    }

    #[test]
    fn next_trading_day_skips_weekend_and_holiday() {
        let cal = ExchangeCalendar::bist();
        // Friday 2024-04-05 -> Monday 2024-04-08
        assert_eq!(cal.next_trading_day(date(2024, 4, 5)), date(2024, 4, 8));
        // Tuesday 2024-04-09 -> bayram Wed-Fri -> Monday 2024-04-15
        assert_eq!(cal.next_trading_day(date(2024, 4, 9)), date(2024, 4, 15));
    }

    #[test]
    fn trading_days_in_range() {
        let cal = ExchangeCalendar::bist();
        let days = cal.trading_days(date(2024, 1, 1), date(2024, 1, 7));
        // Jan 1 holiday, Jan 6-7 weekend
        assert_eq!(
            days,
            vec![date(2024, 1, 2), date(2024, 1, 3), date(2024, 1, 4), date(2024, 1, 5)]
        );
    }

    #[test]
    fn extra_holidays_are_honoured() {
        let cal = ExchangeCalendar::with_holidays([date(2024, 3, 5)]);
        assert!(!cal.is_trading_day(date(2024, 3, 5)));
        assert!(ExchangeCalendar::bist().is_trading_day(date(2024, 3, 5)));
    }

    #[test]
    fn local_conversion_is_utc_plus_three() {
        let cal = ExchangeCalendar::bist();
        let at = cal.at_local(date(2024, 3, 5), NaiveTime::from_hms_opt(18, 30, 0).unwrap());
        assert_eq!(at.unwrap().hour(), 15);
        assert_eq!(cal.local_date(ist(2024, 3, 5, 1, 0)), date(2024, 3, 5));
    }
}
