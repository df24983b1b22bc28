//! Optional JSON persistence of the alert list.

use std::path::{Path, PathBuf};

use super::model::Alert;
use crate::picks_store::{read_json, write_json_atomic, StoreError};

pub struct AlertStore {
    path: PathBuf,
}

impl AlertStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty when the file does not exist yet.
    pub fn load(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, alerts: &[Alert]) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &alerts)
    }
}
