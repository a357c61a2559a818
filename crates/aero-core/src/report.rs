//! Boundary towards logging and reporting
//!
//! Samples carry monotonic device time only. This module turns them into
//! what the log writer and dashboard consume: wall-clock stamps and CSV rows.

use core::fmt::Write;

use thiserror_no_std::Error;

use crate::acquisition::Sample;

pub const CSV_HEADER: &str = "unix_ms,time_ms,dp_Pa,tempP_C,tempEnv_C,absP_Pa,RH_pct,rho_kgm3";

/// Capacity of one formatted row.
pub const CSV_ROW_CAPACITY: usize = 160;

pub type CsvRow = heapless::String<CSV_ROW_CAPACITY>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    #[error("row exceeds the CSV row capacity")]
    RowOverflow,
}

/// Offset between wall-clock epoch milliseconds and monotonic device time.
///
/// Until an external source sets it the offset is zero and "unix" stamps are
/// just device uptime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallClock {
    offset_ms: i64,
    synced: bool,
}

impl WallClock {
    /// Record that `epoch_ms` corresponds to monotonic time `monotonic_ms`.
    pub fn sync(&mut self, epoch_ms: u64, monotonic_ms: u64) {
        self.offset_ms = epoch_ms as i64 - monotonic_ms as i64;
        self.synced = true;
    }

    pub const fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn unix_ms(&self, monotonic_ms: u64) -> u64 {
        (monotonic_ms as i64).saturating_add(self.offset_ms).max(0) as u64
    }
}

/// Format one CSV row for `sample`, matching [`CSV_HEADER`].
pub fn csv_row(sample: &Sample, clock: &WallClock) -> Result<CsvRow, ReportError> {
    let mut row = CsvRow::new();
    write!(
        row,
        "{},{},{:.4},{:.3},{:.3},{:.1},{:.1},{:.4}",
        clock.unix_ms(sample.t_ms),
        sample.t_ms,
        sample.dp_pa,
        sample.temp_p_c,
        sample.temp_env_c,
        sample.abs_p_pa,
        sample.rh_pct,
        sample.rho_kgm3,
    )
    .map_err(|_| ReportError::RowOverflow)?;
    Ok(row)
}

/// Decides when the next log row is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSchedule {
    interval_ms: u32,
    next_due_ms: Option<u64>,
}

impl LogSchedule {
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            next_due_ms: None,
        }
    }

    pub const fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Change the interval; the next row is due immediately.
    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval_ms = interval_ms;
        self.next_due_ms = None;
    }

    /// Returns true, and schedules the following row, if a row is due at `now_ms`.
    pub fn due(&mut self, now_ms: u64) -> bool {
        match self.next_due_ms {
            Some(next) if now_ms < next => false,
            _ => {
                self.next_due_ms = Some(now_ms + u64::from(self.interval_ms));
                true
            }
        }
    }
}
