//! At-risk member detection.
//!
//! A member is flagged when they missed at least two of the three most
//! recent services and were not present at any of them. Attending even one
//! service in the window clears risk status regardless of the miss count:
//! recent re-engagement always wins over history.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::error::EngineError;
use crate::models::{AttendanceRecord, Member, Presence, RiskSummaryEntry, RunOutcome};
use crate::store::SummarySink;

/// Number of most recent distinct service dates considered per run.
pub const SERVICE_WINDOW: usize = 3;

/// The most recent distinct service dates across the whole attendance log,
/// newest first, capped at [`SERVICE_WINDOW`]. The window is system-wide, not
/// per home cell: a cell whose leader records sporadically is still measured
/// against dates other cells held services on.
pub fn recent_service_dates(attendance: &[AttendanceRecord]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = attendance.iter().map(|r| r.service_date).collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();
    dates.truncate(SERVICE_WINDOW);
    dates
}

/// Compute the at-risk summary from an already-fetched roster and attendance
/// log. Pure: no storage access, no clock access beyond the supplied
/// `computed_at` stamp.
///
/// A missing record for a window date counts as an absence; an unrecorded
/// service is held against the member. Only flagged members produce entries,
/// so an empty result with `Success(0)` means nobody is currently at risk.
pub fn compute_risk_summary(
    roster: &[Member],
    attendance: &[AttendanceRecord],
    computed_at: DateTime<Utc>,
) -> (Vec<RiskSummaryEntry>, RunOutcome) {
    if roster.is_empty() || attendance.is_empty() {
        return (Vec::new(), RunOutcome::InsufficientData);
    }

    let window = recent_service_dates(attendance);
    if window.len() < SERVICE_WINDOW {
        return (Vec::new(), RunOutcome::InsufficientHistory(window.len()));
    }

    // First record in input order wins for a (member, date) pair, matching
    // the source's first-row selection when duplicates exist.
    let mut by_member_date: HashMap<(&str, NaiveDate), Presence> = HashMap::new();
    for record in attendance {
        by_member_date
            .entry((record.member_name.as_str(), record.service_date))
            .or_insert(record.present);
    }

    let mut entries = Vec::new();
    for member in roster {
        let mut statuses = Vec::with_capacity(SERVICE_WINDOW);
        let mut missed_count = 0u32;
        let mut attended_recently = false;

        for &date in &window {
            match by_member_date.get(&(member.name.as_str(), date)) {
                Some(Presence::Yes) => {
                    statuses.push(Presence::Yes);
                    attended_recently = true;
                }
                Some(Presence::No) => {
                    statuses.push(Presence::No);
                    missed_count += 1;
                }
                None => {
                    statuses.push(Presence::No);
                    missed_count += 1;
                }
            }
        }

        if missed_count >= 2 && !attended_recently {
            entries.push(RiskSummaryEntry {
                member_name: member.name.clone(),
                home_cell: member.home_cell.clone(),
                recent_statuses: statuses,
                missed_count,
                computed_at,
            });
        }
    }

    let flagged = entries.len();
    (entries, RunOutcome::Success(flagged))
}

/// Run the engine over fetched inputs and persist the result.
///
/// The sink is rewritten on every `Success`, empty result included, so flags
/// for members who have since re-engaged do not linger. On a write failure
/// the sink must be assumed unchanged; retrying is the caller's decision.
pub async fn run<S: SummarySink>(
    roster: &[Member],
    attendance: &[AttendanceRecord],
    sink: &S,
    now: DateTime<Utc>,
) -> Result<RunOutcome, EngineError> {
    let (entries, outcome) = compute_risk_summary(roster, attendance, now);

    if let RunOutcome::Success(flagged) = outcome {
        sink.replace_all(&entries)
            .await
            .map_err(EngineError::SinkWrite)?;
        info!(flagged, "risk summary rewritten");
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::StoreError;

    fn member(name: &str, cell: &str) -> Member {
        Member {
            name: name.to_string(),
            home_cell: Some(cell.to_string()),
            phone: None,
        }
    }

    fn record(date: (i32, u32, u32), name: &str, present: Presence) -> AttendanceRecord {
        AttendanceRecord {
            service_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            home_cell: "Cell A".to_string(),
            member_name: name.to_string(),
            present,
            recorded_by: "leader".to_string(),
            recorded_at: Utc::now(),
        }
    }

    fn flagged_names(entries: &[RiskSummaryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.member_name.as_str()).collect()
    }

    #[test]
    fn empty_inputs_are_insufficient_data() {
        let (entries, outcome) = compute_risk_summary(&[], &[], Utc::now());
        assert!(entries.is_empty());
        assert_eq!(outcome, RunOutcome::InsufficientData);

        let roster = vec![member("Ama", "Cell A")];
        let (entries, outcome) = compute_risk_summary(&roster, &[], Utc::now());
        assert!(entries.is_empty());
        assert_eq!(outcome, RunOutcome::InsufficientData);
    }

    #[test]
    fn fewer_than_three_service_dates_short_circuits() {
        let roster = vec![member("Ama", "Cell A")];
        let attendance = vec![
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 3, 10), "Ama", Presence::No),
        ];
        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert!(entries.is_empty());
        assert_eq!(outcome, RunOutcome::InsufficientHistory(2));
    }

    #[test]
    fn repeated_dates_count_once_toward_history() {
        let roster = vec![member("Ama", "Cell A")];
        // Two distinct dates, one of them recorded for several members.
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 10), "Kofi", Presence::Yes),
            record((2026, 3, 10), "Esi", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
        ];
        let (_, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert_eq!(outcome, RunOutcome::InsufficientHistory(2));
    }

    #[test]
    fn one_attendance_in_window_clears_the_flag() {
        // Ama missed the two most recent services but was present at the
        // third: missed_count is 2 yet she is not flagged.
        let roster = vec![member("Ama", "Cell A")];
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::Yes),
        ];
        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert!(entries.is_empty());
        assert_eq!(outcome, RunOutcome::Success(0));
    }

    #[test]
    fn missing_record_counts_as_absence() {
        // No record at all for Feb 24: treated the same as an explicit "No".
        let roster = vec![member("Ama", "Cell A"), member("Kofi", "Cell A")];
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Kofi", Presence::Yes),
            record((2026, 3, 10), "Kofi", Presence::Yes),
            record((2026, 3, 3), "Kofi", Presence::Yes),
        ];
        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert_eq!(outcome, RunOutcome::Success(1));
        assert_eq!(flagged_names(&entries), vec!["Ama"]);
        assert_eq!(entries[0].missed_count, 3);
        assert_eq!(entries[0].statuses_display(), "No | No | No");
    }

    #[test]
    fn member_with_no_records_matches_fully_absent_member() {
        let roster = vec![member("Ama", "Cell A"), member("Yaw", "Cell B")];
        // Yaw has zero records anywhere; Ama has three explicit absences.
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
        ];
        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert_eq!(outcome, RunOutcome::Success(2));
        let ama = entries.iter().find(|e| e.member_name == "Ama").unwrap();
        let yaw = entries.iter().find(|e| e.member_name == "Yaw").unwrap();
        assert_eq!(ama.missed_count, 3);
        assert_eq!(yaw.missed_count, 3);
        assert_eq!(ama.statuses_display(), yaw.statuses_display());
    }

    #[test]
    fn window_dates_come_out_newest_first() {
        let attendance = vec![
            record((2026, 2, 24), "Esi", Presence::Yes),
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 17), "Ama", Presence::No),
            record((2026, 3, 3), "Esi", Presence::Yes),
        ];
        let window = recent_service_dates(&attendance);
        assert_eq!(
            window,
            vec![
                NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
                NaiveDate::from_ymd_opt(2026, 2, 24).unwrap(),
            ]
        );

        let reversed: Vec<_> = attendance.into_iter().rev().collect();
        assert_eq!(recent_service_dates(&reversed), window);
    }

    #[test]
    fn input_order_does_not_change_the_summary() {
        let roster = vec![member("Ama", "Cell A"), member("Esi", "Cell A")];
        let attendance = vec![
            record((2026, 2, 24), "Esi", Presence::Yes),
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 3, 10), "Esi", Presence::Yes),
            record((2026, 3, 3), "Esi", Presence::Yes),
        ];
        let stamp = Utc::now();
        let (entries, _) = compute_risk_summary(&roster, &attendance, stamp);
        assert_eq!(flagged_names(&entries), vec!["Ama"]);
        assert_eq!(entries[0].statuses_display(), "No | No | No");

        let reversed: Vec<_> = attendance.into_iter().rev().collect();
        let (entries_rev, _) = compute_risk_summary(&roster, &reversed, stamp);
        assert_eq!(entries_rev[0].recent_statuses, entries[0].recent_statuses);
        assert_eq!(entries_rev[0].missed_count, entries[0].missed_count);
    }

    #[test]
    fn dates_outside_the_window_are_ignored() {
        let roster = vec![member("Ama", "Cell A")];
        let mut attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
        ];
        let (baseline, _) = compute_risk_summary(&roster, &attendance, Utc::now());

        // A fourth, older service where Ama was present must change nothing.
        attendance.push(record((2026, 2, 17), "Ama", Presence::Yes));
        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert_eq!(outcome, RunOutcome::Success(1));
        assert_eq!(entries[0].missed_count, baseline[0].missed_count);
        assert_eq!(entries[0].statuses_display(), baseline[0].statuses_display());
    }

    #[test]
    fn window_is_system_wide_across_cells() {
        // Cell B only ever met on Mar 10. Its member Yaw is measured against
        // the three most recent dates overall, so the two Cell A services he
        // has no records for count as misses.
        let roster = vec![member("Yaw", "Cell B")];
        let mut attendance = vec![
            record((2026, 3, 10), "Ama", Presence::Yes),
            record((2026, 3, 3), "Ama", Presence::Yes),
            record((2026, 2, 24), "Ama", Presence::Yes),
        ];
        let mut yaw_record = record((2026, 3, 10), "Yaw", Presence::No);
        yaw_record.home_cell = "Cell B".to_string();
        attendance.push(yaw_record);

        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert_eq!(outcome, RunOutcome::Success(1));
        assert_eq!(entries[0].missed_count, 3);
    }

    #[test]
    fn duplicate_records_for_one_service_first_wins() {
        let roster = vec![member("Ama", "Cell A")];
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::Yes),
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
        ];
        // The first Mar 10 row says present, so Ama is not flagged.
        let (entries, outcome) = compute_risk_summary(&roster, &attendance, Utc::now());
        assert_eq!(outcome, RunOutcome::Success(0));
        assert!(entries.is_empty());
    }

    #[test]
    fn recomputation_is_idempotent() {
        let roster = vec![
            member("Ama", "Cell A"),
            member("Kofi", "Cell A"),
            member("Yaw", "Cell B"),
        ];
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
            record((2026, 3, 10), "Kofi", Presence::Yes),
        ];
        let stamp = Utc::now();
        let (first, _) = compute_risk_summary(&roster, &attendance, stamp);
        let (second, _) = compute_risk_summary(&roster, &attendance, stamp);
        assert_eq!(flagged_names(&first), flagged_names(&second));
        let firsts: Vec<String> = first.iter().map(|e| e.statuses_display()).collect();
        let seconds: Vec<String> = second.iter().map(|e| e.statuses_display()).collect();
        assert_eq!(firsts, seconds);
    }

    /// Sink double that records every replace_all call.
    struct MemorySink {
        writes: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl MemorySink {
        fn new() -> Self {
            MemorySink {
                writes: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl SummarySink for MemorySink {
        async fn replace_all(&self, entries: &[RiskSummaryEntry]) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::new(
                    "replace summary",
                    anyhow::anyhow!("sink unreachable"),
                ));
            }
            let names = entries.iter().map(|e| e.member_name.clone()).collect();
            self.writes.lock().unwrap().push(names);
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_clears_sink_even_when_nobody_is_at_risk() {
        let roster = vec![member("Ama", "Cell A")];
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::Yes),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
        ];
        let sink = MemorySink::new();
        let outcome = run(&roster, &attendance, &sink, Utc::now()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Success(0));
        // One write happened, carrying zero entries.
        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].is_empty());
    }

    #[tokio::test]
    async fn run_skips_sink_on_insufficient_history() {
        let roster = vec![member("Ama", "Cell A")];
        let attendance = vec![record((2026, 3, 10), "Ama", Presence::No)];
        let sink = MemorySink::new();
        let outcome = run(&roster, &attendance, &sink, Utc::now()).await.unwrap();
        assert_eq!(outcome, RunOutcome::InsufficientHistory(1));
        assert!(sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_reports_sink_write_failure() {
        let roster = vec![member("Ama", "Cell A")];
        let attendance = vec![
            record((2026, 3, 10), "Ama", Presence::No),
            record((2026, 3, 3), "Ama", Presence::No),
            record((2026, 2, 24), "Ama", Presence::No),
        ];
        let sink = MemorySink {
            writes: Mutex::new(Vec::new()),
            fail: true,
        };
        let err = run(&roster, &attendance, &sink, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SinkWrite(_)));
    }
}
