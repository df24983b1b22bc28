//! A scored, levelled trade candidate. A pure value, never a position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::series::DataSource;
use crate::levels::Levels;
use crate::scoring::Score;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub sector: String,
    pub score: Score,
    pub levels: Levels,
    pub reasons: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub data_source: DataSource,
}

impl Signal {
    pub fn total(&self) -> u8 {
        self.score.total
    }

    pub fn is_synthetic(&self) -> bool {
        self.data_source == DataSource::Synthetic
    }
}
