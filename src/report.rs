use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{AttendanceRecord, Member, Presence, RiskSummaryEntry};
use crate::risk;

/// Overall attendance rate across the whole log, as a percentage.
pub fn attendance_rate(attendance: &[AttendanceRecord]) -> f64 {
    if attendance.is_empty() {
        return 0.0;
    }
    let present = attendance
        .iter()
        .filter(|r| r.present == Presence::Yes)
        .count();
    present as f64 / attendance.len() as f64 * 100.0
}

/// Flagged entries grouped by home cell, unassigned members last. Display
/// code works cell by cell, so the report does too.
pub fn group_by_cell(entries: &[RiskSummaryEntry]) -> BTreeMap<String, Vec<&RiskSummaryEntry>> {
    let mut grouped: BTreeMap<String, Vec<&RiskSummaryEntry>> = BTreeMap::new();
    for entry in entries {
        let cell = entry
            .home_cell
            .clone()
            .unwrap_or_else(|| "(no cell)".to_string());
        grouped.entry(cell).or_default().push(entry);
    }
    grouped
}

pub fn build_report(
    roster: &[Member],
    attendance: &[AttendanceRecord],
    entries: &[RiskSummaryEntry],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Congregation Attendance Report");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Members on roster: {}", roster.len());
    let _ = writeln!(output, "- Attendance records: {}", attendance.len());

    let dates = risk::recent_service_dates(attendance);
    match dates.first() {
        Some(latest) => {
            let _ = writeln!(output, "- Most recent service: {latest}");
            let _ = writeln!(
                output,
                "- Attendance rate: {:.1}%",
                attendance_rate(attendance)
            );
        }
        None => {
            let _ = writeln!(output, "- No services recorded yet");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Members at Risk");

    if entries.is_empty() {
        let _ = writeln!(output, "No members are currently at risk.");
    } else {
        let _ = writeln!(
            output,
            "Missed 2+ of the last {} services with no recent attendance.",
            risk::SERVICE_WINDOW
        );
        for (cell, cell_entries) in group_by_cell(entries) {
            let _ = writeln!(output);
            let _ = writeln!(output, "### {cell}");
            for entry in cell_entries {
                let _ = writeln!(
                    output,
                    "- {}: {} (missed {} of {})",
                    entry.member_name,
                    entry.statuses_display(),
                    entry.missed_count,
                    risk::SERVICE_WINDOW
                );
            }
        }
    }

    output
}
