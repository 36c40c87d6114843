// ==========================================
// 商品目录库存后端 - 导入层
// ==========================================
// 职责: 外部文件批量导入商品目录
// 支持: CSV（流式）, Excel（首个工作表）
// ==========================================

// 模块声明
pub mod batch_committer;
pub mod catalog_importer_impl;
pub mod catalog_importer_trait;
pub mod conflict_handler;
pub mod data_cleaner;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod progress;
pub mod report_builder;
pub mod row_validator;
pub mod schema;

// 重导出核心类型
pub use batch_committer::BatchCommitter;
pub use catalog_importer_impl::CatalogImporterImpl;
pub use conflict_handler::{ClassifiedBatch, ConflictResolver};
pub use data_cleaner::DataCleaner as DataCleanerImpl;
pub use error::{ImportError, ImportResult, MalformedInputError};
pub use field_mapper::FieldMapper;
pub use file_parser::{open_source, source_from_bytes, CsvSource, ExcelSource, PreScan};
pub use progress::ImportHandle;
pub use report_builder::ReportBuilder;
pub use row_validator::RowValidator;
pub use schema::{ColumnSpec, CsvDialect, FieldKind, ImportSchema, NumericRange};

// 重导出 Trait 接口
pub use catalog_importer_trait::{CatalogImporter, DataCleaner, RowIter, RowSource};
