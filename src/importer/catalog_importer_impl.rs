// ==========================================
// 商品目录库存后端 - 目录导入器实现
// ==========================================
// 职责: 整合导入管道，从文件到数据库
// 流程: 预检 → 流式解析 → 校验 → 映射 → 冲突判定 → 分批提交 → 报告
// 红线: 每个数据行恰好一个结果；批次严格按输入顺序提交
// ==========================================

use crate::config::ImportConfig;
use crate::domain::import::{ImportReport, ImportStatus, RawRow, RowError, RowOutcome};
use crate::importer::batch_committer::BatchCommitter;
use crate::importer::catalog_importer_trait::{CatalogImporter, RowSource};
use crate::importer::conflict_handler::ConflictResolver;
use crate::importer::error::ImportResult;
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{open_source, pre_scan_blocking, spawn_row_stream, CsvSource};
use crate::importer::progress::{ImportHandle, REASON_CANCELLED};
use crate::importer::row_validator::RowValidator;
use crate::importer::schema::ImportSchema;
use crate::repository::{CatalogRepository, ImportAuditRepository};
use async_trait::async_trait;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// ==========================================
// CatalogImporterImpl - 目录导入器实现
// ==========================================
pub struct CatalogImporterImpl {
    // 数据访问层
    repo: Arc<dyn CatalogRepository>,
    audit_repo: Option<Arc<dyn ImportAuditRepository>>,

    // 导入契约与运行参数
    schema: ImportSchema,
    config: ImportConfig,
}

/// 单次导入内的管道阶段
struct Stages {
    validator: RowValidator,
    mapper: FieldMapper,
    resolver: ConflictResolver,
    committer: BatchCommitter,
}

impl CatalogImporterImpl {
    /// 创建导入器
    ///
    /// # 参数
    /// - repo: 目录仓储
    /// - schema: 导入 schema（每次导入前校验）
    /// - config: 导入配置（调用方负责从配置层读取）
    pub fn new(repo: Arc<dyn CatalogRepository>, schema: ImportSchema, config: ImportConfig) -> Self {
        Self {
            repo,
            audit_repo: None,
            schema,
            config,
        }
    }

    /// 启用审计落库（仍受 persist_audit 开关控制）
    pub fn with_audit_repo(mut self, audit_repo: Arc<dyn ImportAuditRepository>) -> Self {
        self.audit_repo = Some(audit_repo);
        self
    }

    pub fn schema(&self) -> &ImportSchema {
        &self.schema
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// 处理单个数据行：校验 → 映射 → 登记候选
    async fn process_row(
        &self,
        row: RawRow,
        stages: &mut Stages,
        handle: &ImportHandle,
    ) -> ImportResult<()> {
        let row_index = row.index();

        let record = match stages.validator.validate(&row) {
            Ok(record) => record,
            Err(field_errors) => {
                debug!(row_index, errors = field_errors.len(), "行校验失败");
                return handle.record(RowOutcome::Failed {
                    row_index,
                    natural_key: None,
                    errors: field_errors.into_iter().map(RowError::Field).collect(),
                });
            }
        };

        // 主键可计算时先登记，映射失败的行同样占用该主键
        let natural_key = stages.mapper.natural_key(&record);
        if let Some(key) = &natural_key {
            if let Err(duplicate) = stages.resolver.claim(row_index, key) {
                debug!(row_index, "文件内重复主键");
                return handle.record(duplicate);
            }
        }

        let item = match stages.mapper.to_entity(&record).await {
            Ok(item) => item,
            Err(errors) => {
                debug!(row_index, errors = errors.len(), "实体映射失败");
                return handle.record(RowOutcome::Failed {
                    row_index,
                    natural_key: natural_key.map(|k| k.to_string()),
                    errors,
                });
            }
        };

        if let Err(duplicate) = stages.resolver.admit(row_index, item) {
            debug!(row_index, "文件内重复主键");
            handle.record(duplicate)?;
        }
        Ok(())
    }

    /// 判定并提交当前缓冲的候选
    async fn flush(&self, stages: &mut Stages, handle: &ImportHandle) -> ImportResult<()> {
        let batch = stages.resolver.resolve_pending(self.repo.as_ref()).await;
        for outcome in batch.settled {
            handle.record(outcome)?;
        }
        for outcome in stages.committer.commit(batch.changes).await {
            handle.record(outcome)?;
        }
        Ok(())
    }

    /// 取消收尾：未提交的候选与未读到的行记为 Skipped
    fn settle_cancelled(&self, stages: &mut Stages, handle: &ImportHandle) -> ImportResult<usize> {
        let mut skipped = 0usize;
        for (row_index, item) in stages.resolver.take_pending() {
            handle.record(RowOutcome::Skipped {
                row_index,
                natural_key: Some(item.natural_key.to_string()),
                reason: REASON_CANCELLED.to_string(),
            })?;
            skipped += 1;
        }
        Ok(skipped + handle.fill_missing(REASON_CANCELLED)?)
    }

    async fn persist_audit(&self, report: &ImportReport) {
        if !self.config.persist_audit {
            return;
        }
        if let Some(audit_repo) = &self.audit_repo {
            if let Err(e) = audit_repo.insert_audit(report).await {
                warn!(import_id = %report.import_id, error = %e, "导入审计写入失败");
            }
        }
    }
}

#[async_trait]
impl CatalogImporter for CatalogImporterImpl {
    #[instrument(skip(self, source, handle), fields(import_id = %handle.import_id()))]
    async fn import_source(
        &self,
        source: Box<dyn RowSource>,
        file_name: Option<String>,
        handle: Arc<ImportHandle>,
    ) -> ImportResult<ImportReport> {
        self.schema.validate()?;
        self.config.validate()?;
        handle.set_file_name(file_name.clone())?;

        info!(
            file_name = ?file_name,
            max_batch_size = self.config.max_batch_size,
            allow_updates = self.config.allow_updates,
            "开始导入商品目录"
        );

        // === 步骤 1: 结构预检 ===
        let dialect = self.schema.dialect;
        let (source, scan) = pre_scan_blocking(source, dialect).await?;
        let scan = scan.map_err(|e| {
            warn!(error = %e, "结构预检失败，未写入任何数据");
            e
        })?;
        let binding = match &scan.header {
            Some(header) => self.schema.bind_header(header)?,
            None => self.schema.bind_positional(),
        };
        handle.set_total_rows(scan.data_rows);
        info!(data_rows = scan.data_rows, "结构预检完成");

        // === 步骤 2: 组装管道阶段 ===
        let mut stages = Stages {
            validator: RowValidator::new(&self.schema, binding)?,
            mapper: FieldMapper::new(Arc::clone(&self.repo), self.schema.identity_key.clone()),
            resolver: ConflictResolver::new(self.config.allow_updates, self.config.update_strategy),
            committer: BatchCommitter::new(
                Arc::clone(&self.repo),
                self.config.batch_commit_timeout(),
                self.config.retry_individually_on_batch_failure,
            ),
        };

        // === 步骤 3: 流式处理，批满即提交 ===
        let (mut rows, parse_task) = spawn_row_stream(source, dialect, self.config.parse_buffer_rows);
        let mut cancelled = false;

        while let Some(item) = rows.recv().await {
            if handle.is_cancelled() {
                cancelled = true;
                break;
            }

            let row = match item {
                Ok(row) => row,
                Err(e) => {
                    // 预检通过后仍出错，说明文件在两遍之间被修改
                    error!(error = %e, "流式解析失败，导入中止");
                    drop(rows);
                    parse_task.await?;
                    return Err(e.into());
                }
            };

            self.process_row(row, &mut stages, &handle).await?;

            if stages.resolver.pending_len() >= self.config.max_batch_size {
                if handle.is_cancelled() {
                    cancelled = true;
                    break;
                }
                self.flush(&mut stages, &handle).await?;
            }
        }

        if !cancelled && stages.resolver.pending_len() > 0 {
            if handle.is_cancelled() {
                cancelled = true;
            } else {
                self.flush(&mut stages, &handle).await?;
            }
        }

        // 接收端关闭后解析线程随即退出
        drop(rows);
        parse_task.await?;

        // === 步骤 4: 报告 ===
        let status = if cancelled {
            let skipped = self.settle_cancelled(&mut stages, &handle)?;
            info!(skipped, "导入已取消，剩余行记为跳过");
            ImportStatus::Cancelled
        } else {
            ImportStatus::Completed
        };

        let report = handle.finish(status)?;
        if !cancelled && report.counts.total != scan.data_rows {
            warn!(
                expected = scan.data_rows,
                actual = report.counts.total,
                "行结果数与预检行数不一致"
            );
        }

        self.persist_audit(&report).await;

        info!(
            status = report.status.as_str(),
            total = report.counts.total,
            inserted = report.counts.inserted,
            updated = report.counts.updated,
            skipped = report.counts.skipped,
            failed = report.counts.failed,
            batches = stages.committer.batches_committed(),
            elapsed_ms = report.elapsed_ms,
            "导入完成"
        );

        Ok(report)
    }

    async fn import_reader<R>(&self, reader: R, file_name: Option<String>) -> ImportResult<ImportReport>
    where
        R: Read + Seek + Send + 'static,
    {
        let handle = ImportHandle::new(file_name.clone());
        self.import_source(Box::new(CsvSource::new(reader)), file_name, handle)
            .await
    }

    async fn import_file<P: AsRef<Path> + Send>(&self, file_path: P) -> ImportResult<ImportReport> {
        let path = file_path.as_ref().to_path_buf();
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string());
        info!(file_path = %path.display(), "打开导入文件");

        let source = tokio::task::spawn_blocking(move || open_source(&path)).await??;
        let handle = ImportHandle::new(file_name.clone());
        self.import_source(source, file_name, handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use crate::repository::CatalogRepositoryImpl;
    use rusqlite::Connection;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn importer(config: ImportConfig) -> (CatalogImporterImpl, Arc<CatalogRepositoryImpl>) {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let repo = Arc::new(CatalogRepositoryImpl::from_connection(Arc::new(Mutex::new(conn))));
        let importer = CatalogImporterImpl::new(repo.clone(), ImportSchema::catalog_default(), config);
        (importer, repo)
    }

    fn csv(text: &str) -> Cursor<Vec<u8>> {
        Cursor::new(text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_mixed_rows_produce_one_outcome_each() {
        let (importer, repo) = importer(ImportConfig::default());
        let report = importer
            .import_reader(
                csv("sku,name,price\nA1,Sock,5.00\nB2,Hat,abc\nA1,Sock2,6.00\n"),
                Some("items.csv".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(report.counts.total, 3);
        assert_eq!(report.counts.inserted, 1);
        assert_eq!(report.counts.failed, 2);
        assert_eq!(report.status_code(), 207);
        assert!(matches!(
            report.outcome(3).unwrap().errors(),
            [RowError::DuplicateKey { first_row: 1, .. }]
        ));
        assert_eq!(repo.count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_of_unmappable_row_still_conflicts() {
        let (importer, repo) = importer(ImportConfig::default());
        let report = importer
            .import_reader(
                csv("sku,name,price,category\nA1,Sock,5,Nope\nA1,Sock Deluxe,7,\n"),
                None,
            )
            .await
            .unwrap();

        assert!(matches!(
            report.outcome(1).unwrap().errors(),
            [RowError::Field(e)] if e.column == "category"
        ));
        assert!(matches!(
            report.outcome(2).unwrap().errors(),
            [RowError::DuplicateKey { first_row: 1, .. }]
        ));
        assert_eq!(repo.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let (importer, repo) = importer(ImportConfig::default());
        let handle = ImportHandle::new(None);
        handle.cancel();

        let report = importer
            .import_source(
                Box::new(CsvSource::new(csv("sku,name,price\nA1,Sock,5.00\nB2,Hat,6.00\n"))),
                None,
                handle,
            )
            .await
            .unwrap();

        assert_eq!(report.status, ImportStatus::Cancelled);
        assert_eq!(report.counts.skipped, 2);
        assert_eq!(repo.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_required_column_is_malformed() {
        let (importer, _) = importer(ImportConfig::default());
        let err = importer
            .import_reader(csv("sku,name\nA1,Sock\n"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
