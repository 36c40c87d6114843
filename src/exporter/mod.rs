// ==========================================
// 商品目录库存后端 - 导出层
// ==========================================
// 职责: 按条件流式导出商品目录，格式与导入一致（可回导）
// ==========================================

pub mod csv_exporter;

pub use csv_exporter::{export_file_name, format_value, CsvExporter};

use crate::repository::RepositoryError;
use thiserror::Error;

/// 导出错误类型
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("读取商品失败: {0}")]
    Repository(#[from] RepositoryError),

    #[error("写入导出文件失败: {0}")]
    Write(#[from] csv::Error),

    #[error("导出文件 IO 失败: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;
