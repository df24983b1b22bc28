//! Pre-loaded bars for a backtest. The event loop never performs I/O.

use std::collections::BTreeMap;
use tracing::{info, warn};

use bistlab_core::data::MarketDataSource;
use bistlab_core::{Classified, DataSource, Interval, Period, Series};

#[derive(Debug, Clone, Default)]
pub struct History {
    /// Daily series per ticker.
    pub series: BTreeMap<String, Series>,
    /// Market-filter reference; the gate stays open without it.
    pub index: Option<Series>,
    /// Problems met while loading.
    pub warnings: Vec<String>,
}

impl History {
    pub fn new(series: impl IntoIterator<Item = Series>, index: Option<Series>) -> Self {
        Self {
            series: series
                .into_iter()
                .map(|s| (s.ticker().to_string(), s))
                .collect(),
            index,
            warnings: Vec::new(),
        }
    }

    pub fn has_synthetic(&self) -> bool {
        self.series
            .values()
            .chain(self.index.iter())
            .any(|s| s.source() == DataSource::Synthetic)
    }
}

/// Fetch daily bars for every ticker and the index. Failures become warnings;
/// the run continues with whatever loaded.
pub fn load_history(
    source: &dyn MarketDataSource,
    tickers: &[String],
    index_ticker: &str,
    period: Period,
) -> History {
    let mut history = History::default();
    for ticker in tickers {
        match source.fetch_bars(ticker, Interval::OneDay, period) {
            Ok(series) => {
                history.series.insert(ticker.clone(), series);
            }
            Err(e) => {
                warn!(ticker = %ticker, kind = %e.kind(), error = %e, "history not loaded");
                history
                    .warnings
                    .push(format!("{ticker}: history unavailable ({})", e.kind()));
            }
        }
    }
    match source.fetch_bars(index_ticker, Interval::OneDay, period) {
        Ok(series) => history.index = Some(series),
        Err(e) => {
            warn!(index = %index_ticker, error = %e, "index history not loaded");
            history.warnings.push(format!(
                "{index_ticker}: index unavailable ({}), market gate left open",
                e.kind()
            ));
        }
    }
    info!(
        tickers = history.series.len(),
        requested = tickers.len(),
        index = history.index.is_some(),
        "backtest history loaded"
    );
    history
}
