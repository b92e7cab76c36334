//! Version sources for ingestion runs.
//!
//! Versions are fixed-width UTC timestamps (`YYYY-MM-DDTHH:MM:SS.mmmZ`), so
//! string order is chronological order. Stale-edge detection compares with a
//! strict `<`, so no clock may ever hand out the same version twice.

use std::sync::Mutex;

use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{CompendiumError, Result};

const NANOS_PER_MILLI: i128 = 1_000_000;

pub trait VersionClock: Send + Sync {
    /// Next version; strictly greater than every version previously returned.
    fn next_version(&self) -> Result<String>;
}

/// Render unix milliseconds as a version string.
pub fn format_millis(millis: i128) -> Result<String> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    let at = OffsetDateTime::from_unix_timestamp_nanos(millis * NANOS_PER_MILLI)
        .map_err(|e| CompendiumError::invalid_input(format!("version out of range: {e}")))?;
    at.format(format)
        .map_err(|e| CompendiumError::invalid_input(format!("version format: {e}")))
}

/// Unix milliseconds of a version string.
pub fn parse_millis(version: &str) -> Result<i128> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    let at = PrimitiveDateTime::parse(version, format)
        .map_err(|e| CompendiumError::invalid_input(format!("version '{version}': {e}")))?;
    Ok(at.assume_utc().unix_timestamp_nanos() / NANOS_PER_MILLI)
}

/// Wall clock, bumped by 1 ms whenever it would repeat or go backwards.
#[derive(Default)]
pub struct SystemClock {
    last_millis: Mutex<Option<i128>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose versions all sort after `version`, for stores that
    /// already hold versions from an earlier process or a faster clock.
    pub fn resuming_after(version: &str) -> Result<Self> {
        Ok(Self {
            last_millis: Mutex::new(Some(parse_millis(version)?)),
        })
    }
}

impl VersionClock for SystemClock {
    fn next_version(&self) -> Result<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos() / NANOS_PER_MILLI;
        let mut last = self.last_millis.lock()?;
        let next = match *last {
            Some(prev) if now <= prev => prev + 1,
            _ => now,
        };
        *last = Some(next);
        format_millis(next)
    }
}

/// Deterministic clock for tests: starts at a fixed instant and advances by
/// `step_millis` per call.
pub struct ManualClock {
    next_millis: Mutex<i128>,
    step_millis: i128,
}

impl ManualClock {
    /// 2024-01-01T00:00:00.000Z, one second per version.
    pub fn new() -> Self {
        Self::starting_at(1_704_067_200_000, 1_000)
    }

    pub fn starting_at(millis: i128, step_millis: i128) -> Self {
        Self {
            next_millis: Mutex::new(millis),
            step_millis: step_millis.max(1),
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionClock for ManualClock {
    fn next_version(&self) -> Result<String> {
        let mut next = self.next_millis.lock()?;
        let version = format_millis(*next)?;
        *next += self.step_millis;
        Ok(version)
    }
}
