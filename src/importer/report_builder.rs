// ==========================================
// 商品目录库存后端 - 导入报告构建器
// ==========================================
// 职责: 按行号累积 RowOutcome，汇总计数，产出最终报告
// 红线: 同一行号只记录一次
// ==========================================

use crate::domain::import::{
    ImportProgress, ImportReport, ImportStatus, OutcomeCounts, RowOutcome,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Instant;

pub struct ReportBuilder {
    import_id: String,
    file_name: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
    counts: OutcomeCounts,
    outcomes: BTreeMap<usize, RowOutcome>,
}

impl ReportBuilder {
    pub fn new(import_id: String, file_name: Option<String>) -> Self {
        Self {
            import_id,
            file_name,
            started_at: Utc::now(),
            started: Instant::now(),
            counts: OutcomeCounts::default(),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn set_file_name(&mut self, file_name: Option<String>) {
        self.file_name = file_name;
    }

    /// 记录一行结果
    ///
    /// # 返回
    /// - false: 该行号已有结果（忽略本次）
    pub fn record(&mut self, outcome: RowOutcome) -> bool {
        let row_index = outcome.row_index();
        if self.outcomes.contains_key(&row_index) {
            return false;
        }
        self.counts.record(outcome.kind());
        self.outcomes.insert(row_index, outcome);
        true
    }

    pub fn rows_processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    /// 为 1..=total_rows 中尚无结果的行补记 Skipped
    ///
    /// # 返回
    /// - 补记的行数
    pub fn fill_missing(&mut self, total_rows: usize, reason: &str) -> usize {
        let mut filled = 0;
        for row_index in 1..=total_rows {
            if !self.outcomes.contains_key(&row_index) {
                self.record(RowOutcome::Skipped {
                    row_index,
                    natural_key: None,
                    reason: reason.to_string(),
                });
                filled += 1;
            }
        }
        filled
    }

    pub fn snapshot(&self, total_rows: Option<usize>) -> ImportProgress {
        ImportProgress {
            import_id: self.import_id.clone(),
            rows_processed: self.rows_processed(),
            total_rows,
            counts: self.counts,
            outcomes: self.outcomes.values().cloned().collect(),
        }
    }

    /// 产出最终报告（结果按行号升序）
    pub fn build(&self, status: ImportStatus) -> ImportReport {
        ImportReport {
            import_id: self.import_id.clone(),
            file_name: self.file_name.clone(),
            status,
            counts: self.counts,
            outcomes: self.outcomes.values().cloned().collect(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inserted(row_index: usize) -> RowOutcome {
        RowOutcome::Inserted {
            row_index,
            natural_key: format!("K{}", row_index),
        }
    }

    #[test]
    fn test_outcomes_sorted_by_row_regardless_of_arrival() {
        let mut builder = ReportBuilder::new("imp".to_string(), None);
        builder.record(inserted(3));
        builder.record(inserted(1));
        builder.record(inserted(2));

        let report = builder.build(ImportStatus::Completed);
        let rows: Vec<usize> = report.outcomes.iter().map(RowOutcome::row_index).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert_eq!(report.counts.inserted, 3);
    }

    #[test]
    fn test_duplicate_row_index_ignored() {
        let mut builder = ReportBuilder::new("imp".to_string(), None);
        assert!(builder.record(inserted(1)));
        assert!(!builder.record(inserted(1)));
        assert_eq!(builder.counts().total, 1);
    }

    #[test]
    fn test_fill_missing_marks_skipped() {
        let mut builder = ReportBuilder::new("imp".to_string(), None);
        builder.record(inserted(2));

        assert_eq!(builder.fill_missing(4, "import cancelled"), 3);
        let report = builder.build(ImportStatus::Cancelled);
        assert_eq!(report.counts.total, 4);
        assert_eq!(report.counts.skipped, 3);
        assert_eq!(report.status_code(), 200);
    }
}
