//! Daily picks file: `{last_update, latest, history}` as one JSON document.
//!
//! Writes go to a sibling `.tmp` file first and are renamed into place, so a
//! reader never sees a half-written file.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use bistlab_core::{Classified, ErrorKind};

use crate::generator::DailyPicks;

/// Days of picks kept in the file.
pub const HISTORY_CAP: usize = 30;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("{path}: malformed JSON: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

impl Classified for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Transient,
            Self::Json { .. } => ErrorKind::Internal,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Serialize `value` and atomically replace `path` with it.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(&json).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err(path))?;
    debug!(path = %path.display(), bytes = json.len(), "wrote file");
    Ok(())
}

/// Read and parse `path`; `None` when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicksFile {
    pub last_update: DateTime<Utc>,
    pub latest: DailyPicks,
    /// Newest first, at most [`HISTORY_CAP`] entries, one per scan date.
    pub history: Vec<DailyPicks>,
}

pub struct PicksStore {
    path: PathBuf,
}

impl PicksStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<PicksFile>, StoreError> {
        read_json(&self.path)
    }

    /// Record `picks` as the latest scan. An existing history entry for the same
    /// scan date is replaced.
    pub fn save(&self, picks: &DailyPicks) -> Result<PicksFile, StoreError> {
        let mut history = self.load()?.map(|f| f.history).unwrap_or_default();
        history.retain(|p| p.scan_date != picks.scan_date);
        history.push(picks.clone());
        history.sort_by(|a, b| b.scan_date.cmp(&a.scan_date));
        history.truncate(HISTORY_CAP);

        let file = PicksFile {
            last_update: picks.scan_time,
            latest: picks.clone(),
            history,
        };
        write_json_atomic(&self.path, &file)?;
        info!(
            path = %self.path.display(),
            scan_date = %picks.scan_date,
            picks = picks.picks.len(),
            "daily picks saved"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistlab_core::TradingPhase;
    use chrono::{Duration, NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn picks_for(date: NaiveDate) -> DailyPicks {
        DailyPicks {
            scan_date: date,
            scan_time: Utc.from_utc_datetime(&date.and_hms_opt(15, 30, 0).unwrap()),
            market_ok: true,
            phase: TradingPhase::Closed,
            picks: Vec::new(),
            warnings: Vec::new(),
            strategy_version: "test".into(),
            scanned: 30,
            failures: Vec::new(),
        }
    }

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = PicksStore::new(tmp.path().join("picks.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn same_date_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let store = PicksStore::new(tmp.path().join("picks.json"));
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();

        store.save(&picks_for(day)).unwrap();
        let mut again = picks_for(day);
        again.warnings.push("rerun".into());
        let file = store.save(&again).unwrap();

        assert_eq!(file.history.len(), 1);
        assert_eq!(file.latest.warnings, vec!["rerun".to_string()]);
        assert_eq!(store.load().unwrap().unwrap(), file);
    }

    #[test]
    fn history_is_capped_and_sorted_descending() {
        let tmp = TempDir::new().unwrap();
        let store = PicksStore::new(tmp.path().join("nested/dir/picks.json"));
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..40 {
            store.save(&picks_for(start + Duration::days(i))).unwrap();
        }
        let file = store.load().unwrap().unwrap();
        assert_eq!(file.history.len(), HISTORY_CAP);
        assert!(file
            .history
            .windows(2)
            .all(|w| w[0].scan_date > w[1].scan_date));
        assert_eq!(file.history[0].scan_date, start + Duration::days(39));
        assert_eq!(file.latest.scan_date, start + Duration::days(39));
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("picks.json");
        PicksStore::new(&path)
            .save(&picks_for(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()))
            .unwrap();
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("picks.json")]);
    }

    #[test]
    fn corrupt_file_is_an_internal_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("picks.json");
        fs::write(&path, "{not json").unwrap();
        let err = PicksStore::new(&path).load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
