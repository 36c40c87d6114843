// ==========================================
// 商品目录库存后端 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批量 CSV/Excel 导入导出管道（逐行结果、事务化分批提交）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 外部数据
pub mod importer;

// 导出层 - 回导兼容的 CSV
pub mod exporter;

// 配置层 - 导入配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 共享状态
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ItemColor, SortField, SortOrder};

// 领域实体
pub use domain::{
    CatalogItem, Category, ImportAuditRecord, ImportProgress, ImportReport, ImportStatus,
    ItemQuery, NaturalKey, OutcomeCounts, RowError, RowOutcome,
};

// 导入 / 导出
pub use exporter::CsvExporter;
pub use importer::{CatalogImporter, CatalogImporterImpl, ImportHandle, ImportSchema};

// API
pub use api::{ImportApi, ImportResponse, ImportUpload, JobState, JobStatus};

// 配置
pub use config::{ImportConfig, UpdateStrategy};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "商品目录库存后端";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
