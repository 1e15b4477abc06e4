use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plaudit_contracts::{
    AlertReason, ClientProfile, DeliveryMethod, NewSubmission, Ratings, Submission,
    SubmissionPatch, SubmissionStatus,
};
use plaudit_kernel::{apply_patch, parse_rfc3339};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Keyed-record access to submissions. Every call is fallible I/O; nothing here
/// retries.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert(&self, new: NewSubmission) -> Result<i64, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Submission>, StoreError>;

    /// Applies `patch` and returns the row as stored afterwards.
    async fn update_fields(
        &self,
        id: i64,
        patch: &SubmissionPatch,
    ) -> Result<Submission, StoreError>;

    /// True when a row for `email` is still in an active status.
    async fn check_duplicate_active(&self, email: &str) -> Result<bool, StoreError>;

    async fn list_by_status(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, StoreError>;

    fn backend_name(&self) -> &'static str;
}

fn same_email(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[derive(Default)]
struct MemoryRows {
    next_id: i64,
    rows: BTreeMap<i64, Submission>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryRows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert(&self, new: NewSubmission) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.rows.insert(id, new.into_submission(id));
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Submission>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .find(|row| row.token.as_deref() == Some(token))
            .cloned())
    }

    async fn update_fields(
        &self,
        id: i64,
        patch: &SubmissionPatch,
    ) -> Result<Submission, StoreError> {
        let mut inner = self.inner.lock().await;
        let row = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let mut updated = row.clone();
        apply_patch(&mut updated, patch)?;
        *row = updated.clone();
        Ok(updated)
    }

    async fn check_duplicate_active(&self, email: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .any(|row| same_email(&row.email, email) && row.status.is_active()))
    }

    async fn list_by_status(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .filter(|row| statuses.contains(&row.status))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

const COLUMNS: &str = "id, email, submitted_at, ratings_json, consent_raw, open_feedback, \
    status, avg_rating, qualified, alert_reason, profile_json, token, draft_text, regen_count, \
    delivery_method, sent_at, copied_at, posted_at, reminded_at, error";

/// Rows in one sqlite file. Statements run on the blocking pool, never on the
/// async executor.
pub struct SqliteStore {
    conn: Arc<std::sync::Mutex<Connection>>,
}

struct RawRow {
    id: i64,
    email: String,
    submitted_at: String,
    ratings_json: String,
    consent_raw: String,
    open_feedback: Option<String>,
    status: String,
    avg_rating: f64,
    qualified: i64,
    alert_reason: Option<String>,
    profile_json: String,
    token: Option<String>,
    draft_text: Option<String>,
    regen_count: i64,
    delivery_method: String,
    sent_at: Option<String>,
    copied_at: Option<String>,
    posted_at: Option<String>,
    reminded_at: Option<String>,
    error: Option<String>,
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        email: row.get(1)?,
        submitted_at: row.get(2)?,
        ratings_json: row.get(3)?,
        consent_raw: row.get(4)?,
        open_feedback: row.get(5)?,
        status: row.get(6)?,
        avg_rating: row.get(7)?,
        qualified: row.get(8)?,
        alert_reason: row.get(9)?,
        profile_json: row.get(10)?,
        token: row.get(11)?,
        draft_text: row.get(12)?,
        regen_count: row.get(13)?,
        delivery_method: row.get(14)?,
        sent_at: row.get(15)?,
        copied_at: row.get(16)?,
        posted_at: row.get(17)?,
        reminded_at: row.get(18)?,
        error: row.get(19)?,
    })
}

fn decode_ts(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match value {
        Some(v) => parse_rfc3339(&v)
            .map(Some)
            .ok_or_else(|| StoreError::Decode(format!("{field} is not RFC3339: {v}"))),
        None => Ok(None),
    }
}

fn decode(raw: RawRow) -> Result<Submission, StoreError> {
    let ratings: Ratings = serde_json::from_str(&raw.ratings_json)
        .map_err(|e| StoreError::Decode(format!("ratings: {e}")))?;
    let profile: ClientProfile = serde_json::from_str(&raw.profile_json)
        .map_err(|e| StoreError::Decode(format!("profile: {e}")))?;
    let status = SubmissionStatus::parse(&raw.status)
        .ok_or_else(|| StoreError::Decode(format!("unknown status {}", raw.status)))?;
    let delivery_method = DeliveryMethod::parse(&raw.delivery_method).ok_or_else(|| {
        StoreError::Decode(format!("unknown delivery method {}", raw.delivery_method))
    })?;
    let alert_reason = match raw.alert_reason {
        Some(v) => Some(
            AlertReason::parse(&v)
                .ok_or_else(|| StoreError::Decode(format!("unknown alert reason {v}")))?,
        ),
        None => None,
    };
    let submitted_at = parse_rfc3339(&raw.submitted_at)
        .ok_or_else(|| StoreError::Decode("submitted_at is not RFC3339".to_string()))?;

    Ok(Submission {
        id: raw.id,
        email: raw.email,
        submitted_at,
        ratings,
        consent_raw: raw.consent_raw,
        open_feedback: raw.open_feedback,
        status,
        avg_rating: raw.avg_rating,
        qualified: raw.qualified != 0,
        alert_reason,
        profile,
        token: raw.token,
        draft_text: raw.draft_text,
        regen_count: u32::try_from(raw.regen_count)
            .map_err(|_| StoreError::Decode("regen_count out of range".to_string()))?,
        delivery_method,
        sent_at: decode_ts("sent_at", raw.sent_at)?,
        copied_at: decode_ts("copied_at", raw.copied_at)?,
        posted_at: decode_ts("posted_at", raw.posted_at)?,
        reminded_at: decode_ts("reminded_at", raw.reminded_at)?,
        error: raw.error,
    })
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(e.to_string()))
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS submissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                ratings_json TEXT NOT NULL,
                consent_raw TEXT NOT NULL,
                open_feedback TEXT,
                status TEXT NOT NULL,
                avg_rating REAL NOT NULL,
                qualified INTEGER NOT NULL,
                alert_reason TEXT,
                profile_json TEXT NOT NULL,
                token TEXT UNIQUE,
                draft_text TEXT,
                regen_count INTEGER NOT NULL DEFAULT 0,
                delivery_method TEXT NOT NULL DEFAULT 'NONE',
                sent_at TEXT,
                copied_at TEXT,
                posted_at TEXT,
                reminded_at TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_submissions_email ON submissions(email);
            CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status);
            ",
        )?;
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("connection mutex poisoned: {e}")))?;
            work(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("spawn_blocking failed: {e}")))?
    }

    fn select_one(
        conn: &Connection,
        filter: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Option<Submission>, StoreError> {
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM submissions WHERE {filter}"),
                [param],
                read_raw,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    /// Writes `sub` back, honouring the guard carried by `patch` in SQL too so
    /// a writer sharing the file cannot be overwritten.
    fn write_row(
        conn: &Connection,
        sub: &Submission,
        patch: &SubmissionPatch,
    ) -> Result<(), StoreError> {
        let changed = conn.execute(
            "
            UPDATE submissions SET
                status = ?2,
                alert_reason = ?3,
                profile_json = ?4,
                token = ?5,
                draft_text = ?6,
                regen_count = ?7,
                delivery_method = ?8,
                sent_at = ?9,
                copied_at = ?10,
                posted_at = ?11,
                reminded_at = ?12,
                error = ?13
            WHERE id = ?1
              AND (?14 IS NULL OR status = ?14)
              AND (?15 IS NULL OR regen_count = ?15)
            ",
            params![
                sub.id,
                sub.status.as_str(),
                sub.alert_reason.map(AlertReason::as_str),
                encode_json(&sub.profile)?,
                sub.token,
                sub.draft_text,
                i64::from(sub.regen_count),
                sub.delivery_method.as_str(),
                sub.sent_at.map(|v| v.to_rfc3339()),
                sub.copied_at.map(|v| v.to_rfc3339()),
                sub.posted_at.map(|v| v.to_rfc3339()),
                sub.reminded_at.map(|v| v.to_rfc3339()),
                sub.error,
                patch.expected_status.map(SubmissionStatus::as_str),
                patch.expected_regen_count.map(i64::from),
            ],
        )?;
        if changed == 0 {
            return match Self::select_one(conn, "id = ?1", &sub.id)? {
                Some(current) => Err(StoreError::Stale {
                    submission_id: sub.id,
                    found: current.status,
                }),
                None => Err(StoreError::NotFound(sub.id)),
            };
        }
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn insert(&self, new: NewSubmission) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "
                INSERT INTO submissions
                (email, submitted_at, ratings_json, consent_raw, open_feedback, status,
                 avg_rating, qualified, profile_json, regen_count, delivery_method)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
                ",
                params![
                    new.email,
                    new.submitted_at.to_rfc3339(),
                    encode_json(&new.ratings)?,
                    new.consent_raw,
                    new.open_feedback,
                    SubmissionStatus::Pending.as_str(),
                    new.avg_rating,
                    if new.qualified { 1 } else { 0 },
                    encode_json(&new.profile)?,
                    DeliveryMethod::None.as_str(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError> {
        self.with_conn(move |conn| Self::select_one(conn, "id = ?1", &id))
            .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Submission>, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| Self::select_one(conn, "token = ?1", &token))
            .await
    }

    async fn update_fields(
        &self,
        id: i64,
        patch: &SubmissionPatch,
    ) -> Result<Submission, StoreError> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let mut row =
                Self::select_one(conn, "id = ?1", &id)?.ok_or(StoreError::NotFound(id))?;
            apply_patch(&mut row, &patch)?;
            Self::write_row(conn, &row, &patch)?;
            Ok(row)
        })
        .await
    }

    async fn check_duplicate_active(&self, email: &str) -> Result<bool, StoreError> {
        let email = email.trim().to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT status FROM submissions WHERE lower(email) = lower(?1)")?;
            let statuses = stmt
                .query_map(params![email], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(statuses
                .iter()
                .filter_map(|s| SubmissionStatus::parse(s))
                .any(SubmissionStatus::is_active))
        })
        .await
    }

    async fn list_by_status(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let statuses = statuses.to_vec();
        self.with_conn(move |conn| {
            let placeholders = (1..=statuses.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM submissions WHERE status IN ({placeholders}) ORDER BY id"
            ))?;
            let raws = stmt
                .query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), read_raw)?
                .collect::<Result<Vec<_>, _>>()?;
            raws.into_iter().map(decode).collect()
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
