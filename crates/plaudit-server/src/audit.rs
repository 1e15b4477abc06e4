use std::sync::Arc;

use plaudit_contracts::AuditEvent;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Append-only, hash-chained JSONL audit log.
pub struct AuditLog {
    file: Mutex<tokio::fs::File>,
    immutable_mirror: Option<Mutex<tokio::fs::File>>,
    sqlite: Option<Arc<std::sync::Mutex<Connection>>>,
    last_hash: Mutex<Option<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuditRecord {
    pub audit_id: String,
    pub ts: String,
    pub event_type: String,
    pub reference: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl AuditRecord {
    fn from_event(event: AuditEvent) -> Self {
        Self {
            audit_id: format!("audit_{}", uuid::Uuid::new_v4().as_simple()),
            ts: event.ts.to_rfc3339(),
            event_type: event.event_type,
            reference: event.reference,
            details: event.details,
            prev_hash: None,
            record_hash: String::new(),
        }
    }
}

async fn open_append(path: &str) -> Result<tokio::fs::File, StoreError> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StoreError::Audit(format!("open {path}: {e}")))
}

impl AuditLog {
    pub async fn open(
        path: &str,
        sqlite_path: Option<&str>,
        immutable_mirror_path: Option<&str>,
    ) -> Result<Self, StoreError> {
        let last_hash = std::fs::read_to_string(path).ok().and_then(|text| {
            text.lines().rev().find_map(|line| {
                serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| {
                        v.get("record_hash")
                            .and_then(|hash| hash.as_str())
                            .map(|s| s.to_string())
                    })
            })
        });

        let file = open_append(path).await?;
        let immutable_mirror = match immutable_mirror_path {
            Some(p) if !p.is_empty() => Some(Mutex::new(open_append(p).await?)),
            _ => None,
        };

        let sqlite = match sqlite_path {
            Some(p) => {
                let conn = Connection::open(p)?;
                conn.execute_batch(
                    "
                    CREATE TABLE IF NOT EXISTS audit_records (
                        audit_id TEXT PRIMARY KEY,
                        ts TEXT NOT NULL,
                        event_type TEXT NOT NULL,
                        reference TEXT NOT NULL,
                        details TEXT NOT NULL,
                        record_json TEXT NOT NULL
                    );
                    ",
                )?;
                Some(Arc::new(std::sync::Mutex::new(conn)))
            }
            None => None,
        };

        Ok(Self {
            file: Mutex::new(file),
            immutable_mirror,
            sqlite,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub async fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        let mut rec = AuditRecord::from_event(event);

        // The hash lock is held across the write so the chain stays linear.
        let mut last_hash = self.last_hash.lock().await;
        rec.prev_hash = last_hash.clone();
        let seed = serde_json::to_string(&rec).map_err(|e| StoreError::Audit(e.to_string()))?;
        rec.record_hash = hash_hex(seed.as_bytes());
        let line = serde_json::to_string(&rec).map_err(|e| StoreError::Audit(e.to_string()))?;

        {
            let mut file = self.file.lock().await;
            write_line(&mut file, &line).await?;
        }
        // The primary line is the chain; later records link to it even if a
        // mirror write below fails.
        *last_hash = Some(rec.record_hash.clone());
        if let Some(mirror) = &self.immutable_mirror {
            let mut mirror_file = mirror.lock().await;
            write_line(&mut mirror_file, &line).await?;
        }
        drop(last_hash);

        if let Some(sqlite) = &self.sqlite {
            let conn = Arc::clone(sqlite);
            tokio::task::spawn_blocking(move || {
                let conn = conn
                    .lock()
                    .map_err(|e| StoreError::Audit(format!("audit mirror mutex poisoned: {e}")))?;
                conn.execute(
                    "
                    INSERT OR REPLACE INTO audit_records
                    (audit_id, ts, event_type, reference, details, record_json)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ",
                    params![
                        rec.audit_id,
                        rec.ts,
                        rec.event_type,
                        rec.reference,
                        rec.details,
                        line
                    ],
                )?;
                Ok::<(), StoreError>(())
            })
            .await
            .map_err(|e| StoreError::Audit(format!("spawn_blocking failed: {e}")))??;
        }
        Ok(())
    }
}

async fn write_line(file: &mut tokio::fs::File, line: &str) -> Result<(), StoreError> {
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| StoreError::Audit(e.to_string()))?;
    file.write_all(b"\n")
        .await
        .map_err(|e| StoreError::Audit(e.to_string()))?;
    file.flush()
        .await
        .map_err(|e| StoreError::Audit(e.to_string()))
}

fn hash_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn read_audit_records(path: &str) -> Result<Vec<AuditRecord>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| format!("line {} parse failed: {e}", idx + 1))
        })
        .collect()
}

pub fn verify_audit_chain(path: &str) -> Result<String, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut prev: Option<String> = None;
    let mut count = 0usize;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec: AuditRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {} parse failed: {e}", idx + 1))?;
        if count > 0 && rec.prev_hash != prev {
            return Err(format!(
                "line {} prev_hash mismatch: expected {:?}, got {:?}",
                idx + 1,
                prev,
                rec.prev_hash
            ));
        }
        let mut seeded = rec.clone();
        seeded.record_hash.clear();
        let seed = serde_json::to_string(&seeded)
            .map_err(|e| format!("line {} hash seed serialize failed: {e}", idx + 1))?;
        let expected_hash = hash_hex(seed.as_bytes());
        if rec.record_hash != expected_hash {
            return Err(format!(
                "line {} record_hash mismatch: expected {}, got {}",
                idx + 1,
                expected_hash,
                rec.record_hash
            ));
        }
        prev = Some(rec.record_hash);
        count += 1;
    }

    Ok(format!("audit chain verified: {count} records"))
}

pub fn verify_audit_chain_with_mirror(
    path: &str,
    mirror_path: Option<&str>,
) -> Result<String, String> {
    let summary = verify_audit_chain(path)?;
    if let Some(mirror) = mirror_path {
        let primary = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let copy = std::fs::read_to_string(mirror).map_err(|e| e.to_string())?;
        if primary != copy {
            return Err(format!("mirror {mirror} diverges from {path}"));
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(suffix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("plaudit-audit-unit-{nanos}.{suffix}"))
            .to_string_lossy()
            .to_string()
    }

    #[tokio::test]
    async fn chain_continues_across_reopen() {
        let path = temp_path("jsonl");
        {
            let log = AuditLog::open(&path, None, None).await.unwrap();
            log.append(AuditEvent::new("FORM_SUBMIT", 1, "first"))
                .await
                .unwrap();
        }
        let log = AuditLog::open(&path, None, None).await.unwrap();
        log.append(AuditEvent::new("QUALIFIED", 1, "second"))
            .await
            .unwrap();

        let records = read_audit_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].prev_hash.as_deref(), Some(records[0].record_hash.as_str()));
        assert_eq!(records[0].reference, "row_1");
        assert!(verify_audit_chain(&path).is_ok());
    }

    #[tokio::test]
    async fn tampered_details_are_detected() {
        let path = temp_path("jsonl");
        let log = AuditLog::open(&path, None, None).await.unwrap();
        for n in 0..3 {
            log.append(AuditEvent::new("APPROVED", n, "ok")).await.unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replacen("\"ok\"", "\"forged\"", 1)).unwrap();
        assert!(verify_audit_chain(&path).is_err());
    }

    #[tokio::test]
    async fn mirror_matches_primary() {
        let path = temp_path("jsonl");
        let mirror = temp_path("mirror.jsonl");
        let log = AuditLog::open(&path, None, Some(&mirror)).await.unwrap();
        log.append(AuditEvent::new("DECLINED", 4, "x")).await.unwrap();
        assert!(verify_audit_chain_with_mirror(&path, Some(&mirror)).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_mirror_write_keeps_primary_chain_linked() {
        let path = temp_path("jsonl");
        let log = AuditLog::open(&path, None, Some("/dev/full")).await.unwrap();
        for n in 0..3 {
            let err = log
                .append(AuditEvent::new("NOTIFICATION_SENT", n, "mirror full"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Audit(_)));
        }

        let records = read_audit_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].prev_hash.as_deref(), Some(records[1].record_hash.as_str()));
        assert!(verify_audit_chain(&path).is_ok());
    }
}
