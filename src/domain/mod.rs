// ==========================================
// 商品目录库存后端 - 领域模型层
// ==========================================
// 职责: 定义领域实体、导入中间产物、报告类型
// 红线: 不含数据访问逻辑,不含导入流程逻辑
// ==========================================

pub mod catalog;
pub mod import;
pub mod types;

// 重导出核心类型
pub use catalog::{Category, CatalogItem, ChangeKind, ItemChange, ItemQuery, NaturalKey};
pub use import::{
    FieldError, ImportAuditRecord, ImportProgress, ImportReport, ImportStatus, NormalizedRecord, OutcomeCounts,
    OutcomeKind, RawRow, RowError, RowOutcome, TypedValue, ValidationRule,
};
pub use types::{ItemColor, SortField, SortOrder};
