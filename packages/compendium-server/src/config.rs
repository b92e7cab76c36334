//! Service configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::statement::validate_table_name;

pub const DEFAULT_TABLE_NAME: &str = "compendium";
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_RETAINED_RUNS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompendiumConfig {
    /// Snapshot directory; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Table name rendered into statements.
    pub table_name: String,
    /// Fan-out pool size; `None` uses rayon's global pool.
    pub fanout_threads: Option<usize>,
    /// Runs that may wait for the background worker before `submit` blocks.
    pub queue_capacity: usize,
    /// Finished runs kept for status lookups.
    pub retained_runs: usize,
}

impl Default for CompendiumConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            fanout_threads: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retained_runs: DEFAULT_RETAINED_RUNS,
        }
    }
}

impl CompendiumConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.table_name)
    }
}
