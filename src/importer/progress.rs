// ==========================================
// 商品目录库存后端 - 导入进度与取消句柄
// ==========================================
// 职责: 运行中导入的共享状态（取消标志 + 报告构建器）
// 并发: 管道写、轮询方读；取消为协作式，批次之间检查
// ==========================================

use crate::domain::import::{ImportProgress, ImportReport, ImportStatus, RowOutcome};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::report_builder::ReportBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use uuid::Uuid;

/// 取消后未提交行的跳过原因
pub const REASON_CANCELLED: &str = "import cancelled";

pub struct ImportHandle {
    import_id: String,
    cancelled: AtomicBool,
    total_rows: OnceLock<usize>,
    builder: Mutex<ReportBuilder>,
}

impl ImportHandle {
    pub fn new(file_name: Option<String>) -> Arc<Self> {
        let import_id = Uuid::new_v4().to_string();
        Arc::new(Self {
            builder: Mutex::new(ReportBuilder::new(import_id.clone(), file_name)),
            import_id,
            cancelled: AtomicBool::new(false),
            total_rows: OnceLock::new(),
        })
    }

    pub fn import_id(&self) -> &str {
        &self.import_id
    }

    /// 请求取消（正在提交的批次会完成，之后不再开始新批次）
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn total_rows(&self) -> Option<usize> {
        self.total_rows.get().copied()
    }

    pub(crate) fn set_total_rows(&self, total: usize) {
        let _ = self.total_rows.set(total);
    }

    fn builder(&self) -> ImportResult<MutexGuard<'_, ReportBuilder>> {
        self.builder
            .lock()
            .map_err(|e| ImportError::InternalError(format!("报告构建器锁获取失败: {}", e)))
    }

    pub(crate) fn set_file_name(&self, file_name: Option<String>) -> ImportResult<()> {
        self.builder()?.set_file_name(file_name);
        Ok(())
    }

    pub(crate) fn record(&self, outcome: RowOutcome) -> ImportResult<()> {
        let row_index = outcome.row_index();
        if !self.builder()?.record(outcome) {
            tracing::warn!(import_id = %self.import_id, row_index, "行结果重复，已忽略");
        }
        Ok(())
    }

    pub(crate) fn fill_missing(&self, reason: &str) -> ImportResult<usize> {
        let total = self.total_rows().unwrap_or(0);
        Ok(self.builder()?.fill_missing(total, reason))
    }

    pub fn rows_processed(&self) -> usize {
        self.builder().map(|b| b.rows_processed()).unwrap_or(0)
    }

    /// 当前进度快照（已完成处理的行，按行号升序）
    pub fn progress(&self) -> ImportResult<ImportProgress> {
        Ok(self.builder()?.snapshot(self.total_rows()))
    }

    pub(crate) fn finish(&self, status: ImportStatus) -> ImportResult<ImportReport> {
        Ok(self.builder()?.build(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let handle = ImportHandle::new(Some("items.csv".to_string()));
        handle.set_total_rows(3);

        handle
            .record(RowOutcome::Inserted {
                row_index: 2,
                natural_key: "B2".to_string(),
            })
            .unwrap();
        let first = handle.progress().unwrap();

        handle
            .record(RowOutcome::Inserted {
                row_index: 1,
                natural_key: "A1".to_string(),
            })
            .unwrap();
        let second = handle.progress().unwrap();

        assert_eq!(first.rows_processed, 1);
        assert_eq!(second.rows_processed, 2);
        assert_eq!(second.total_rows, Some(3));
        assert_eq!(second.outcomes[0].row_index(), 1);
    }

    #[test]
    fn test_cancel_flag() {
        let handle = ImportHandle::new(None);
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
