// ==========================================
// 商品目录库存后端 - CSV 导出器
// ==========================================
// 流程: SQLite 游标 → 逆向映射 → 按 schema 格式化 → csv::Writer
// 红线: 不整体加载；输出必须能被同一 schema 重新导入
// ==========================================

use crate::domain::catalog::{CatalogItem, ItemQuery};
use crate::domain::import::TypedValue;
use crate::exporter::{ExportError, ExportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::schema::{FieldKind, ImportSchema};
use crate::repository::{CatalogRepository, ItemVisitor, RepositoryError};
use chrono::{DateTime, Local};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, instrument};

/// 导出文件名提示: catalog-export-YYYYMMDD-HHMMSS.csv
pub fn export_file_name(now: DateTime<Local>) -> String {
    format!("catalog-export-{}.csv", now.format("%Y%m%d-%H%M%S"))
}

/// 按列类型把取值格式化为单元格文本
///
/// 小数使用最短往返表示（5.0 → "5"，5.25 → "5.25"）
pub fn format_value(kind: &FieldKind, value: &TypedValue) -> String {
    match (kind, value) {
        (FieldKind::Date { format }, TypedValue::Date(d)) => d.format(format).to_string(),
        (_, TypedValue::Text(s)) | (_, TypedValue::Enum(s)) => s.clone(),
        (_, TypedValue::Integer(v)) => v.to_string(),
        (_, TypedValue::Decimal(v)) => v.to_string(),
        (_, TypedValue::Date(d)) => d.format("%Y-%m-%d").to_string(),
    }
}

pub struct CsvExporter {
    repo: Arc<dyn CatalogRepository>,
    schema: ImportSchema,
}

impl CsvExporter {
    pub fn new(repo: Arc<dyn CatalogRepository>, schema: ImportSchema) -> Self {
        Self { repo, schema }
    }

    /// 导出匹配条件的商品
    ///
    /// # 参数
    /// - query: 过滤与排序条件
    /// - writer: 输出目标（文件、内存缓冲等）
    ///
    /// # 返回
    /// - Ok(usize): 导出的数据行数
    #[instrument(skip(self, query, writer))]
    pub async fn export<W: Write + Send>(&self, query: &ItemQuery, writer: W) -> ExportResult<usize> {
        let mut csv_writer = self.schema.dialect.csv_writer_builder().from_writer(writer);
        if self.schema.dialect.has_header {
            csv_writer.write_record(self.schema.header_names())?;
        }

        let mut write_error: Option<csv::Error> = None;
        let mut row_index = 0usize;
        let exported = {
            let schema = &self.schema;
            let csv_writer = &mut csv_writer;
            let write_error = &mut write_error;
            let visitor: &mut ItemVisitor<'_> = &mut |item: CatalogItem| {
                row_index += 1;
                let record = FieldMapper::to_record(&item, row_index);
                let cells: Vec<String> = schema
                    .columns
                    .iter()
                    .map(|column| {
                        record
                            .get(&column.name)
                            .map(|value| format_value(&column.kind, value))
                            .unwrap_or_default()
                    })
                    .collect();

                csv_writer.write_record(&cells).map_err(|e| {
                    let message = e.to_string();
                    *write_error = Some(e);
                    RepositoryError::InternalError(format!("导出写入中断: {}", message))
                })
            };
            self.repo.export_items(query, visitor).await
        };

        if let Some(e) = write_error {
            return Err(ExportError::Write(e));
        }
        let exported = exported?;
        csv_writer.flush()?;

        info!(exported, "导出完成");
        Ok(exported)
    }
}
