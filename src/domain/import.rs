// ==========================================
// 商品目录库存后端 - 导入领域模型
// ==========================================
// 用途: 导入管道中间产物与最终报告
// 生命周期: 除 ImportReport 外，仅在单次导入调用内存在
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ==========================================
// RawRow - 原始行
// ==========================================
// 解析器产出，校验后即丢弃；构造后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    index: usize,       // 数据行序号（1 起，不含表头）
    line: u64,          // 源文件物理行号（诊断用）
    cells: Vec<String>, // 单元格原始值
}

impl RawRow {
    pub fn new(index: usize, line: u64, cells: Vec<String>) -> Self {
        Self { index, line, cells }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// 按位置取单元格（参差行：缺失的尾部单元格视为空）
    pub fn cell(&self, position: usize) -> &str {
        self.cells.get(position).map(String::as_str).unwrap_or("")
    }
}

// ==========================================
// ValidationRule - 违反的规则
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    Required,
    Type,
    Pattern,
    Range,
    AllowedValues,
    MaxLength,
    ReferenceNotFound,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationRule::Required => "required",
            ValidationRule::Type => "type",
            ValidationRule::Pattern => "pattern",
            ValidationRule::Range => "range",
            ValidationRule::AllowedValues => "allowed_values",
            ValidationRule::MaxLength => "max_length",
            ValidationRule::ReferenceNotFound => "reference_not_found",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// FieldError - 字段级错误
// ==========================================
// 只依附于某一行的结果，不单独存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub column: String,       // 列名
    pub raw_value: String,    // 原始值
    pub rule: ValidationRule, // 违反的规则
    pub message: String,      // 可读描述
}

impl FieldError {
    pub fn new(
        column: impl Into<String>,
        raw_value: impl Into<String>,
        rule: ValidationRule,
        message: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            raw_value: raw_value.into(),
            rule,
            message: message.into(),
        }
    }
}

// ==========================================
// RowError - 行失败原因
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowError {
    /// 字段校验失败 / 引用未找到
    Field(FieldError),
    /// 同一文件内业务主键重复
    DuplicateKey { natural_key: String, first_row: usize },
    /// 批次提交失败（存储层错误）
    Storage { message: String },
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::Field(e) => write!(f, "{} [{}]: {}", e.column, e.rule, e.message),
            RowError::DuplicateKey {
                natural_key,
                first_row,
            } => write!(f, "业务主键重复: {} (首次出现于第 {} 行)", natural_key, first_row),
            RowError::Storage { message } => write!(f, "存储失败: {}", message),
        }
    }
}

// ==========================================
// TypedValue - 类型化字段值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Enum(String),
}

// ==========================================
// NormalizedRecord - 规范化记录
// ==========================================
// 仅当原始行通过全部校验规则时产生；不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    row_index: usize,
    values: BTreeMap<String, TypedValue>,
}

impl NormalizedRecord {
    pub fn new(row_index: usize, values: BTreeMap<String, TypedValue>) -> Self {
        Self { row_index, values }
    }

    pub fn row_index(&self) -> usize {
        self.row_index
    }

    pub fn values(&self) -> &BTreeMap<String, TypedValue> {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&TypedValue> {
        self.values.get(field)
    }

    /// 文本/枚举字段的字符串表示
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.values.get(field)? {
            TypedValue::Text(s) | TypedValue::Enum(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        match self.values.get(field)? {
            TypedValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// 数值字段（整数按浮点读取）
    pub fn decimal(&self, field: &str) -> Option<f64> {
        match self.values.get(field)? {
            TypedValue::Decimal(v) => Some(*v),
            TypedValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        match self.values.get(field)? {
            TypedValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

// ==========================================
// RowOutcome - 行结果（闭集）
// ==========================================
// 红线: 每个输入数据行恰好产生一个结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Inserted {
        row_index: usize,
        natural_key: String,
    },
    Updated {
        row_index: usize,
        natural_key: String,
    },
    Skipped {
        row_index: usize,
        natural_key: Option<String>,
        reason: String,
    },
    Failed {
        row_index: usize,
        natural_key: Option<String>,
        errors: Vec<RowError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Inserted,
    Updated,
    Skipped,
    Failed,
}

impl RowOutcome {
    pub fn row_index(&self) -> usize {
        match self {
            RowOutcome::Inserted { row_index, .. }
            | RowOutcome::Updated { row_index, .. }
            | RowOutcome::Skipped { row_index, .. }
            | RowOutcome::Failed { row_index, .. } => *row_index,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            RowOutcome::Inserted { .. } => OutcomeKind::Inserted,
            RowOutcome::Updated { .. } => OutcomeKind::Updated,
            RowOutcome::Skipped { .. } => OutcomeKind::Skipped,
            RowOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn natural_key(&self) -> Option<&str> {
        match self {
            RowOutcome::Inserted { natural_key, .. } | RowOutcome::Updated { natural_key, .. } => {
                Some(natural_key.as_str())
            }
            RowOutcome::Skipped { natural_key, .. } | RowOutcome::Failed { natural_key, .. } => {
                natural_key.as_deref()
            }
        }
    }

    pub fn errors(&self) -> &[RowError] {
        match self {
            RowOutcome::Failed { errors, .. } => errors,
            _ => &[],
        }
    }
}

// ==========================================
// OutcomeCounts - 结果汇总
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, kind: OutcomeKind) {
        self.total += 1;
        match kind {
            OutcomeKind::Inserted => self.inserted += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.inserted + self.updated
    }
}

// ==========================================
// ImportStatus / ImportReport - 导入报告
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Completed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Completed => "COMPLETED",
            ImportStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "COMPLETED" => Some(ImportStatus::Completed),
            "CANCELLED" => Some(ImportStatus::Cancelled),
            _ => None,
        }
    }
}

/// 单次导入调用的最终报告；管道完成后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub import_id: String,
    pub file_name: Option<String>,
    pub status: ImportStatus,
    pub counts: OutcomeCounts,
    pub outcomes: Vec<RowOutcome>, // 按行号升序
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ImportReport {
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    /// HTTP 语义状态码: 无失败行 200，有失败行 207（Skipped 不算失败）
    pub fn status_code(&self) -> u16 {
        if self.has_failures() {
            207
        } else {
            200
        }
    }

    pub fn outcome(&self, row_index: usize) -> Option<&RowOutcome> {
        self.outcomes
            .binary_search_by_key(&row_index, RowOutcome::row_index)
            .ok()
            .map(|pos| &self.outcomes[pos])
    }
}

/// 导入审计记录（import_audit 表的摘要行，不含逐行结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportAuditRecord {
    pub import_id: String,
    pub file_name: Option<String>,
    pub status: ImportStatus,
    pub counts: OutcomeCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl From<&ImportReport> for ImportAuditRecord {
    fn from(report: &ImportReport) -> Self {
        Self {
            import_id: report.import_id.clone(),
            file_name: report.file_name.clone(),
            status: report.status,
            counts: report.counts,
            started_at: report.started_at,
            finished_at: report.finished_at,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

/// 运行中导入的进度快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub import_id: String,
    pub rows_processed: usize,
    pub total_rows: Option<usize>,
    pub counts: OutcomeCounts,
    pub outcomes: Vec<RowOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_record() {
        let mut counts = OutcomeCounts::default();
        counts.record(OutcomeKind::Inserted);
        counts.record(OutcomeKind::Failed);
        counts.record(OutcomeKind::Skipped);

        assert_eq!(counts.total, 3);
        assert_eq!(counts.succeeded(), 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_raw_row_ragged_cell_reads_empty() {
        let row = RawRow::new(1, 2, vec!["A1".to_string()]);
        assert_eq!(row.cell(0), "A1");
        assert_eq!(row.cell(5), "");
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let outcome = RowOutcome::Skipped {
            row_index: 4,
            natural_key: Some("A1".to_string()),
            reason: "exists, updates disabled".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["row_index"], 4);
    }
}
