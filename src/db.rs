use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{
    Announcement, AttendanceRecord, Member, OfferingRecord, Presence, RiskSummaryEntry,
    WelfareRecord,
};
use crate::store::{AttendanceStore, RosterStore, SummarySink};

/// PostgreSQL adapter: one struct satisfying all three storage seams plus
/// the surrounding bookkeeping tables (welfare, offerings, announcements).
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS church")
        .execute(pool)
        .await?;

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS church.members (
            member_name TEXT NOT NULL,
            home_cell   TEXT,
            phone       TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS church.attendance (
            service_date DATE NOT NULL,
            home_cell    TEXT NOT NULL,
            member_name  TEXT NOT NULL,
            present      TEXT NOT NULL,
            recorded_by  TEXT NOT NULL,
            recorded_at  TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS church.attendance_summary (
            member_name  TEXT NOT NULL,
            home_cell    TEXT,
            last_three   TEXT NOT NULL,
            missed_count INT NOT NULL,
            computed_at  TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS church.welfare (
            contribution_date DATE NOT NULL,
            member_name       TEXT NOT NULL,
            home_cell         TEXT,
            amount_ghs        DOUBLE PRECISION NOT NULL,
            collected_by      TEXT NOT NULL,
            recorded_at       TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS church.offerings (
            offering_date DATE NOT NULL,
            amount_ghs    DOUBLE PRECISION NOT NULL,
            meeting_type  TEXT NOT NULL,
            description   TEXT,
            entered_by    TEXT NOT NULL,
            recorded_at   TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS church.announcements (
            posted_on   DATE NOT NULL,
            title       TEXT NOT NULL,
            message     TEXT NOT NULL,
            posted_by   TEXT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ];

    for ddl in tables {
        sqlx::query(ddl).execute(pool).await?;
    }

    // One record per member per service per cell, enforced at the store
    // level so bulk imports cannot pile up duplicates.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS attendance_member_service \
         ON church.attendance (service_date, home_cell, member_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let members = [
        ("Ama Mensah", "Cell A", Some("+233201234001")),
        ("Kofi Boateng", "Cell A", Some("+233201234002")),
        ("Esi Owusu", "Cell A", None),
        ("Yaw Darko", "Cell B", Some("+233201234004")),
        ("Akosua Asante", "Cell B", None),
    ];

    for (name, cell, phone) in members {
        let exists = sqlx::query("SELECT 1 FROM church.members WHERE member_name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            sqlx::query(
                "INSERT INTO church.members (member_name, home_cell, phone) VALUES ($1, $2, $3)",
            )
            .bind(name)
            .bind(cell)
            .bind(phone)
            .execute(pool)
            .await?;
        }
    }

    // Three services of history so the risk engine has a full window.
    let services = [
        NaiveDate::from_ymd_opt(2026, 2, 24),
        NaiveDate::from_ymd_opt(2026, 3, 3),
        NaiveDate::from_ymd_opt(2026, 3, 10),
    ];
    let marks = [
        ("Ama Mensah", "Cell A", [Presence::Yes, Presence::No, Presence::No]),
        ("Kofi Boateng", "Cell A", [Presence::Yes, Presence::Yes, Presence::Yes]),
        ("Esi Owusu", "Cell A", [Presence::No, Presence::No, Presence::No]),
        ("Yaw Darko", "Cell B", [Presence::Yes, Presence::Yes, Presence::No]),
        ("Akosua Asante", "Cell B", [Presence::No, Presence::Yes, Presence::Yes]),
    ];

    for (name, cell, presences) in marks {
        for (service, present) in services.iter().zip(presences) {
            let service = service.ok_or_else(|| anyhow::anyhow!("invalid seed date"))?;
            let exists = sqlx::query(
                "SELECT 1 FROM church.attendance \
                 WHERE service_date = $1 AND home_cell = $2 AND member_name = $3",
            )
            .bind(service)
            .bind(cell)
            .bind(name)
            .fetch_optional(pool)
            .await?;
            if exists.is_some() {
                continue;
            }
            sqlx::query(
                "INSERT INTO church.attendance \
                 (service_date, home_cell, member_name, present, recorded_by, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(service)
            .bind(cell)
            .bind(name)
            .bind(present.as_str())
            .bind("seed")
            .bind(Utc::now())
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

impl RosterStore for PgStore {
    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        let rows = sqlx::query(
            "SELECT member_name, home_cell, phone FROM church.members ORDER BY member_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new("list members", e))?;

        let members = rows
            .into_iter()
            .map(|row| Member {
                name: row.get("member_name"),
                home_cell: row.get("home_cell"),
                phone: row.get("phone"),
            })
            .collect();

        Ok(members)
    }
}

impl AttendanceStore for PgStore {
    async fn list_records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT service_date, home_cell, member_name, present, recorded_by, recorded_at \
             FROM church.attendance",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new("list attendance", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let token: String = row.get("present");
            // A corrupt presence token must not abort the whole run.
            let present = match token.parse::<Presence>() {
                Ok(p) => p,
                Err(err) => {
                    warn!(%err, "skipping malformed attendance row");
                    continue;
                }
            };
            records.push(AttendanceRecord {
                service_date: row.get("service_date"),
                home_cell: row.get("home_cell"),
                member_name: row.get("member_name"),
                present,
                recorded_by: row.get("recorded_by"),
                recorded_at: row.get("recorded_at"),
            });
        }

        Ok(records)
    }
}

impl SummarySink for PgStore {
    async fn replace_all(&self, entries: &[RiskSummaryEntry]) -> Result<(), StoreError> {
        // Clear and rewrite inside one transaction so readers never observe
        // a half-written summary and a failed run leaves the old one intact.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::new("begin summary rewrite", e))?;

        sqlx::query("DELETE FROM church.attendance_summary")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::new("clear summary", e))?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO church.attendance_summary \
                 (member_name, home_cell, last_three, missed_count, computed_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&entry.member_name)
            .bind(&entry.home_cell)
            .bind(entry.statuses_display())
            .bind(entry.missed_count as i32)
            .bind(entry.computed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::new("write summary entry", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::new("commit summary rewrite", e))?;

        debug!(entries = entries.len(), "summary table replaced");
        Ok(())
    }
}

/// Submit one service's attendance for a home cell: delete whatever was
/// recorded for the (date, cell) pair, then insert a row for every member.
/// The delete-then-insert pair runs in one transaction and is what keeps the
/// table at one record per member per service.
pub async fn submit_attendance(
    pool: &PgPool,
    service_date: NaiveDate,
    home_cell: &str,
    marks: &[(String, Presence)],
    recorded_by: &str,
    recorded_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM church.attendance WHERE service_date = $1 AND home_cell = $2")
        .bind(service_date)
        .bind(home_cell)
        .execute(&mut *tx)
        .await?;

    for (member_name, present) in marks {
        sqlx::query(
            "INSERT INTO church.attendance \
             (service_date, home_cell, member_name, present, recorded_by, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(service_date)
        .bind(home_cell)
        .bind(member_name)
        .bind(present.as_str())
        .bind(recorded_by)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[derive(serde::Deserialize)]
struct ImportRow {
    service_date: String,
    home_cell: String,
    member_name: String,
    present: String,
    recorded_by: String,
}

/// Validate raw CSV rows into attendance records. Malformed rows (bad
/// structure, unparseable date, bad presence token) are skipped with a
/// warning rather than aborting the batch, and a repeated
/// (service_date, home_cell, member_name) key keeps only its first row.
/// Returns the surviving records and the skipped count.
fn parse_import_rows<I>(rows: I, recorded_at: DateTime<Utc>) -> (Vec<AttendanceRecord>, usize)
where
    I: IntoIterator<Item = Result<ImportRow, csv::Error>>,
{
    let mut seen: std::collections::HashSet<(NaiveDate, String, String)> =
        std::collections::HashSet::new();
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for result in rows {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(%err, "skipping unreadable CSV row");
                skipped += 1;
                continue;
            }
        };
        let service_date = match row.service_date.parse::<NaiveDate>() {
            Ok(d) => d,
            Err(err) => {
                warn!(%err, date = %row.service_date, "skipping row with bad service date");
                skipped += 1;
                continue;
            }
        };
        let present = match row.present.parse::<Presence>() {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, member = %row.member_name, "skipping row with bad presence");
                skipped += 1;
                continue;
            }
        };
        let key = (service_date, row.home_cell.clone(), row.member_name.clone());
        if !seen.insert(key) {
            warn!(member = %row.member_name, date = %service_date, "skipping duplicate row");
            skipped += 1;
            continue;
        }

        records.push(AttendanceRecord {
            service_date,
            home_cell: row.home_cell,
            member_name: row.member_name,
            present,
            recorded_by: row.recorded_by,
            recorded_at,
        });
    }

    (records, skipped)
}

/// Bulk-load attendance rows from a CSV file. Malformed rows are skipped
/// with a warning, and rows whose (service_date, home_cell, member_name)
/// already exists are left alone, so re-importing the same file is a no-op.
/// Returns (inserted, skipped).
pub async fn import_attendance_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<(usize, usize)> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let (records, skipped) = parse_import_rows(reader.deserialize::<ImportRow>(), Utc::now());

    let mut inserted = 0usize;
    for record in &records {
        let result = sqlx::query(
            "INSERT INTO church.attendance \
             (service_date, home_cell, member_name, present, recorded_by, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (service_date, home_cell, member_name) DO NOTHING",
        )
        .bind(record.service_date)
        .bind(&record.home_cell)
        .bind(&record.member_name)
        .bind(record.present.as_str())
        .bind(&record.recorded_by)
        .bind(record.recorded_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok((inserted, skipped))
}

/// The persisted risk summary, optionally filtered to one home cell.
pub async fn fetch_summary(
    pool: &PgPool,
    home_cell: Option<&str>,
) -> anyhow::Result<Vec<RiskSummaryEntry>> {
    let mut query = String::from(
        "SELECT member_name, home_cell, last_three, missed_count, computed_at \
         FROM church.attendance_summary",
    );
    if home_cell.is_some() {
        query.push_str(" WHERE home_cell = $1");
    }
    query.push_str(" ORDER BY home_cell, member_name");

    let mut rows = sqlx::query(&query);
    if let Some(cell) = home_cell {
        rows = rows.bind(cell);
    }

    let fetched = rows.fetch_all(pool).await?;
    let mut entries = Vec::with_capacity(fetched.len());
    for row in fetched {
        let last_three: String = row.get("last_three");
        let mut statuses = Vec::new();
        for token in last_three.split(" | ") {
            match token.parse::<Presence>() {
                Ok(p) => statuses.push(p),
                Err(err) => warn!(%err, "skipping malformed summary status token"),
            }
        }
        let missed: i32 = row.get("missed_count");
        entries.push(RiskSummaryEntry {
            member_name: row.get("member_name"),
            home_cell: row.get("home_cell"),
            recent_statuses: statuses,
            missed_count: missed.max(0) as u32,
            computed_at: row.get("computed_at"),
        });
    }
    Ok(entries)
}

pub async fn add_welfare(pool: &PgPool, record: &WelfareRecord) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO church.welfare \
         (contribution_date, member_name, home_cell, amount_ghs, collected_by, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(record.contribution_date)
    .bind(&record.member_name)
    .bind(&record.home_cell)
    .bind(record.amount_ghs)
    .bind(&record.collected_by)
    .bind(record.recorded_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_welfare(pool: &PgPool) -> anyhow::Result<Vec<WelfareRecord>> {
    let rows = sqlx::query(
        "SELECT contribution_date, member_name, home_cell, amount_ghs, collected_by, recorded_at \
         FROM church.welfare ORDER BY recorded_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| WelfareRecord {
            contribution_date: row.get("contribution_date"),
            member_name: row.get("member_name"),
            home_cell: row.get("home_cell"),
            amount_ghs: row.get("amount_ghs"),
            collected_by: row.get("collected_by"),
            recorded_at: row.get("recorded_at"),
        })
        .collect())
}

pub async fn add_offering(pool: &PgPool, record: &OfferingRecord) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO church.offerings \
         (offering_date, amount_ghs, meeting_type, description, entered_by, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(record.offering_date)
    .bind(record.amount_ghs)
    .bind(&record.meeting_type)
    .bind(&record.description)
    .bind(&record.entered_by)
    .bind(record.recorded_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_offerings(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<OfferingRecord>> {
    let rows = sqlx::query(
        "SELECT offering_date, amount_ghs, meeting_type, description, entered_by, recorded_at \
         FROM church.offerings ORDER BY recorded_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| OfferingRecord {
            offering_date: row.get("offering_date"),
            amount_ghs: row.get("amount_ghs"),
            meeting_type: row.get("meeting_type"),
            description: row.get("description"),
            entered_by: row.get("entered_by"),
            recorded_at: row.get("recorded_at"),
        })
        .collect())
}

pub async fn add_announcement(pool: &PgPool, announcement: &Announcement) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO church.announcements (posted_on, title, message, posted_by, recorded_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(announcement.posted_on)
    .bind(&announcement.title)
    .bind(&announcement.message)
    .bind(&announcement.posted_by)
    .bind(announcement.recorded_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_announcements(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<Announcement>> {
    let rows = sqlx::query(
        "SELECT posted_on, title, message, posted_by, recorded_at \
         FROM church.announcements ORDER BY recorded_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Announcement {
            posted_on: row.get("posted_on"),
            title: row.get("title"),
            message: row.get("message"),
            posted_by: row.get("posted_by"),
            recorded_at: row.get("recorded_at"),
        })
        .collect())
}
