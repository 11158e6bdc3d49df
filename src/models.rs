use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One congregation member as held in the roster.
///
/// `name` is the working key: the source system never assigned members a
/// synthetic id, so uniqueness holds only by convention within a home cell.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub home_cell: Option<String>,
    pub phone: Option<String>,
}

/// Presence at a single service, stored as the literal tokens "Yes"/"No".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    Yes,
    No,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Yes => "Yes",
            Presence::No => "No",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePresenceError(pub String);

impl fmt::Display for ParsePresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "presence must be \"Yes\" or \"No\", got {:?}", self.0)
    }
}

impl std::error::Error for ParsePresenceError {}

impl FromStr for Presence {
    type Err = ParsePresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Yes" => Ok(Presence::Yes),
            "No" => Ok(Presence::No),
            other => Err(ParsePresenceError(other.to_string())),
        }
    }
}

/// One attendance row: a member's presence at one service of one home cell.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub service_date: NaiveDate,
    pub home_cell: String,
    pub member_name: String,
    pub present: Presence,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

/// A flagged at-risk member, derived by the risk engine. The summary table
/// holds only these; it is rebuilt whole on every run and never patched.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummaryEntry {
    pub member_name: String,
    pub home_cell: Option<String>,
    /// Presence over the window's services, most recent first.
    pub recent_statuses: Vec<Presence>,
    pub missed_count: u32,
    pub computed_at: DateTime<Utc>,
}

impl RiskSummaryEntry {
    /// Display form relied on by downstream consumers: the status tokens
    /// joined with " | ", most recent first, e.g. "No | No | Yes".
    pub fn statuses_display(&self) -> String {
        self.recent_statuses
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// How an engine run ended. The two short-circuit variants are expected
/// conditions for a young congregation, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Roster or attendance history was empty.
    InsufficientData,
    /// Fewer than three distinct service dates exist anywhere; carries the
    /// count that does exist.
    InsufficientHistory(usize),
    /// Summary computed and persisted; carries the number of flagged members.
    Success(usize),
}

#[derive(Debug, Clone)]
pub struct WelfareRecord {
    pub contribution_date: NaiveDate,
    pub member_name: String,
    pub home_cell: Option<String>,
    pub amount_ghs: f64,
    pub collected_by: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OfferingRecord {
    pub offering_date: NaiveDate,
    pub amount_ghs: f64,
    pub meeting_type: String,
    pub description: Option<String>,
    pub entered_by: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Announcement {
    pub posted_on: NaiveDate,
    pub title: String,
    pub message: String,
    pub posted_by: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_round_trips_storage_tokens() {
        assert_eq!("Yes".parse::<Presence>().unwrap(), Presence::Yes);
        assert_eq!("No".parse::<Presence>().unwrap(), Presence::No);
        assert_eq!(Presence::Yes.to_string(), "Yes");
        assert_eq!(Presence::No.to_string(), "No");
    }

    #[test]
    fn presence_rejects_other_tokens() {
        assert!("yes".parse::<Presence>().is_err());
        assert!("Maybe".parse::<Presence>().is_err());
        assert!("".parse::<Presence>().is_err());
    }

    #[test]
    fn statuses_display_uses_pipe_separator() {
        let entry = RiskSummaryEntry {
            member_name: "Ama".to_string(),
            home_cell: Some("Cell A".to_string()),
            recent_statuses: vec![Presence::No, Presence::No, Presence::Yes],
            missed_count: 2,
            computed_at: Utc::now(),
        };
        assert_eq!(entry.statuses_display(), "No | No | Yes");
    }
}
