// ==========================================
// 商品目录库存后端 - 导入审计 Repository
// ==========================================
// 职责: 导入报告的持久化与查询（import_audit 表）
// 红线: 审计写入失败不影响已提交的批次
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::import::{ImportAuditRecord, ImportReport, ImportStatus, OutcomeCounts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// ImportAuditRepository Trait
// ==========================================
#[async_trait]
pub trait ImportAuditRepository: Send + Sync {
    /// 写入一次导入的报告（摘要列 + 完整报告 JSON）
    async fn insert_audit(&self, report: &ImportReport) -> RepositoryResult<()>;

    /// 查询最近的导入记录（按完成时间倒序）
    async fn recent_audits(&self, limit: usize) -> RepositoryResult<Vec<ImportAuditRecord>>;

    /// 取回完整报告
    async fn get_audit_report(&self, import_id: &str) -> RepositoryResult<Option<ImportReport>>;
}

fn parse_timestamp(raw: &str, column: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::FieldValueError {
            field: column.to_string(),
            message: e.to_string(),
        })
}

// ==========================================
// ImportAuditRepositoryImpl
// ==========================================
pub struct ImportAuditRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl ImportAuditRepositoryImpl {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

/// 审计表原始行（时间戳与状态尚未解析）
struct AuditRow {
    import_id: String,
    file_name: Option<String>,
    status: String,
    counts: OutcomeCounts,
    started_at: String,
    finished_at: String,
    elapsed_ms: i64,
}

impl AuditRow {
    fn into_record(self) -> RepositoryResult<ImportAuditRecord> {
        let status = ImportStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("未知导入状态: {}", self.status),
            }
        })?;

        Ok(ImportAuditRecord {
            import_id: self.import_id,
            file_name: self.file_name,
            status,
            counts: self.counts,
            started_at: parse_timestamp(&self.started_at, "started_at")?,
            finished_at: parse_timestamp(&self.finished_at, "finished_at")?,
            elapsed_ms: self.elapsed_ms.max(0) as u64,
        })
    }
}

#[async_trait]
impl ImportAuditRepository for ImportAuditRepositoryImpl {
    async fn insert_audit(&self, report: &ImportReport) -> RepositoryResult<()> {
        let report_json = serde_json::to_string(report)?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO import_audit (
                import_id, file_name, status,
                total_rows, inserted_rows, updated_rows, skipped_rows, failed_rows,
                started_at, finished_at, elapsed_ms, report_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                report.import_id,
                report.file_name,
                report.status.as_str(),
                report.counts.total as i64,
                report.counts.inserted as i64,
                report.counts.updated as i64,
                report.counts.skipped as i64,
                report.counts.failed as i64,
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
                report.elapsed_ms as i64,
                report_json,
            ],
        )?;

        Ok(())
    }

    async fn recent_audits(&self, limit: usize) -> RepositoryResult<Vec<ImportAuditRecord>> {
        let rows = {
            let conn = self
                .conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;

            let mut stmt = conn.prepare(
                r#"
                SELECT import_id, file_name, status,
                       total_rows, inserted_rows, updated_rows, skipped_rows, failed_rows,
                       started_at, finished_at, elapsed_ms
                FROM import_audit
                ORDER BY finished_at DESC
                LIMIT ?1
                "#,
            )?;

            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(AuditRow {
                        import_id: row.get(0)?,
                        file_name: row.get(1)?,
                        status: row.get(2)?,
                        counts: OutcomeCounts {
                            total: row.get::<_, i64>(3)? as usize,
                            inserted: row.get::<_, i64>(4)? as usize,
                            updated: row.get::<_, i64>(5)? as usize,
                            skipped: row.get::<_, i64>(6)? as usize,
                            failed: row.get::<_, i64>(7)? as usize,
                        },
                        started_at: row.get(8)?,
                        finished_at: row.get(9)?,
                        elapsed_ms: row.get(10)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(AuditRow::into_record).collect()
    }

    async fn get_audit_report(&self, import_id: &str) -> RepositoryResult<Option<ImportReport>> {
        let json: Option<String> = {
            let conn = self
                .conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;

            conn.query_row(
                "SELECT report_json FROM import_audit WHERE import_id = ?1",
                params![import_id],
                |row| row.get(0),
            )
            .optional()?
        };

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import::RowOutcome;

    fn setup_repo() -> ImportAuditRepositoryImpl {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ImportAuditRepositoryImpl::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn report(import_id: &str, finished_offset_secs: i64) -> ImportReport {
        let started_at = Utc::now();
        let mut counts = OutcomeCounts::default();
        counts.record(crate::domain::import::OutcomeKind::Inserted);

        ImportReport {
            import_id: import_id.to_string(),
            file_name: Some("items.csv".to_string()),
            status: ImportStatus::Completed,
            counts,
            outcomes: vec![RowOutcome::Inserted {
                row_index: 1,
                natural_key: "A1".to_string(),
            }],
            started_at,
            finished_at: started_at + chrono::Duration::seconds(finished_offset_secs),
            elapsed_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_report() {
        let repo = setup_repo();
        let original = report("imp-1", 1);
        repo.insert_audit(&original).await.unwrap();

        let fetched = repo.get_audit_report("imp-1").await.unwrap().unwrap();
        assert_eq!(fetched.outcomes, original.outcomes);
        assert_eq!(fetched.counts, original.counts);

        assert!(repo.get_audit_report("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_audits_newest_first() {
        let repo = setup_repo();
        repo.insert_audit(&report("older", 1)).await.unwrap();
        repo.insert_audit(&report("newer", 60)).await.unwrap();

        let records = repo.recent_audits(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].import_id, "newer");
        assert_eq!(records[1].counts.inserted, 1);
    }

    #[tokio::test]
    async fn test_status_column_parsed_back() {
        let repo = setup_repo();
        let mut cancelled = report("cut-short", 5);
        cancelled.status = ImportStatus::Cancelled;
        repo.insert_audit(&cancelled).await.unwrap();

        let records = repo.recent_audits(1).await.unwrap();
        assert_eq!(records[0].status, ImportStatus::Cancelled);

        repo.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE import_audit SET status = 'HALF_DONE' WHERE import_id = 'cut-short'",
                [],
            )
            .unwrap();
        match repo.recent_audits(1).await {
            Err(RepositoryError::FieldValueError { field, message }) => {
                assert_eq!(field, "status");
                assert!(message.contains("HALF_DONE"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
