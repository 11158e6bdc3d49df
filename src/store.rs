//! Storage seams for the risk engine.
//!
//! The source system was rewritten once per backend (managed Postgres, two
//! Google Sheets client styles, local spreadsheet files); here a backend is
//! one adapter implementing these three traits instead.

#![allow(async_fn_in_trait)]

use crate::error::StoreError;
use crate::models::{AttendanceRecord, Member, RiskSummaryEntry};

/// Read side of the member roster.
pub trait RosterStore {
    /// Every known member, unfiltered.
    async fn list_members(&self) -> Result<Vec<Member>, StoreError>;
}

/// Read side of the attendance log.
pub trait AttendanceStore {
    /// The full attendance history, all dates and all home cells.
    async fn list_records(&self) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Write side of the derived risk summary.
pub trait SummarySink {
    /// Clear all prior entries and write the given set as one unit. Called
    /// once per engine run, including with an empty list so stale flags are
    /// removed when nobody is at risk any more.
    async fn replace_all(&self, entries: &[RiskSummaryEntry]) -> Result<(), StoreError>;
}
