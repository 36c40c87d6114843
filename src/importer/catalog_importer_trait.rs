// ==========================================
// 商品目录库存后端 - 目录导入 Trait
// ==========================================
// 职责: 定义导入管道各阶段接口（不包含实现）
// 流程: 预检 → 解析 → 校验 → 映射 → 冲突判定 → 分批提交 → 报告
// ==========================================

use crate::domain::import::{ImportReport, RawRow};
use crate::importer::error::{ImportResult, MalformedInputError};
use crate::importer::file_parser::PreScan;
use crate::importer::progress::ImportHandle;
use crate::importer::schema::CsvDialect;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

/// 数据行的惰性序列
pub type RowIter = Box<dyn Iterator<Item = Result<RawRow, MalformedInputError>> + Send>;

// ==========================================
// CatalogImporter Trait
// ==========================================
// 用途: 目录导入主接口
// 实现者: CatalogImporterImpl
#[async_trait]
pub trait CatalogImporter: Send + Sync {
    /// 从输入源导入（管道核心入口）
    ///
    /// # 参数
    /// - source: 输入源（CSV / Excel）
    /// - file_name: 源文件名（写入报告与审计）
    /// - handle: 进度与取消句柄（调用方可共享以轮询/取消）
    ///
    /// # 返回
    /// - Ok(ImportReport): 每个数据行恰好一个结果
    /// - Err(MalformedInput): 文件级错误，未产生任何行结果、未写入任何数据
    /// - Err(其他): schema 无效、后台任务异常等
    ///
    /// # 导入流程
    /// 1. schema 校验 + 结构预检（表头绑定、数据行计数）
    /// 2. 流式解析（阻塞线程 → 有界通道）
    /// 3. 行校验（全部规则，不短路）
    /// 4. 实体映射（分类引用解析）
    /// 5. 冲突判定（文件内重复 / 已存在）
    /// 6. 分批事务提交（批次间检查取消）
    /// 7. 报告生成 + 审计落库
    async fn import_source(
        &self,
        source: Box<dyn RowSource>,
        file_name: Option<String>,
        handle: Arc<ImportHandle>,
    ) -> ImportResult<ImportReport>;

    /// 从可回绕的字节流导入 CSV
    async fn import_reader<R>(&self, reader: R, file_name: Option<String>) -> ImportResult<ImportReport>
    where
        R: Read + Seek + Send + 'static;

    /// 从文件导入（按扩展名选择 CSV / Excel）
    async fn import_file<P: AsRef<Path> + Send>(&self, file_path: P) -> ImportResult<ImportReport>;
}

// ==========================================
// RowSource Trait
// ==========================================
// 用途: 文件解析接口
// 实现者: CsvSource, ExcelSource
pub trait RowSource: Send {
    /// 结构预检（单遍、不产出行）
    ///
    /// # 返回
    /// - Ok(PreScan): 表头与数据行数
    /// - Err: 引号不配对、编码错误、空输入等文件级错误
    fn pre_scan(&mut self, dialect: &CsvDialect) -> Result<PreScan, MalformedInputError>;

    /// 从头开始产出数据行（表头与空白行不产出）
    fn into_rows(self: Box<Self>, dialect: &CsvDialect) -> Result<RowIter, MalformedInputError>;
}

// ==========================================
// DataCleaner Trait
// ==========================================
// 用途: 单元格清洗接口
// 实现者: DataCleaner
pub trait DataCleaner: Send + Sync {
    /// 清洗文本字段（TRIM，可选 UPPER）
    fn clean_text(&self, value: &str, uppercase: bool) -> String;

    /// 空白视为缺失
    ///
    /// # 返回
    /// - None: 空或全空白
    /// - Some: TRIM 后的值
    fn normalize_null(&self, value: &str) -> Option<String>;

    /// 整行是否空白
    fn is_blank_row(&self, cells: &[String]) -> bool;

    fn parse_integer(&self, value: &str) -> Option<i64>;

    /// 解析小数（拒绝 NaN / 无穷）
    fn parse_decimal(&self, value: &str) -> Option<f64>;

    fn parse_date(&self, value: &str, format: &str) -> Option<NaiveDate>;
}
