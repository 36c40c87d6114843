// ==========================================
// 商品目录库存后端 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分层: MalformedInputError（文件级，致命）⊂ ImportError（导入调用级）
// 行级错误不在此处: 见 domain::import::RowError
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 文件级输入错误：在产生任何行结果之前终止整个导入
#[derive(Error, Debug)]
pub enum MalformedInputError {
    #[error("引号不配对: 行 {line} 起的带引号字段直到文件末尾仍未闭合")]
    UnbalancedQuote { line: u64 },

    #[error("编码无法解析 (行 {line}): 非 UTF-8 字节")]
    Encoding { line: u64 },

    #[error("缺少必填列: {column}")]
    MissingColumn { column: String },

    #[error("输入为空: 没有表头也没有数据行")]
    EmptyInput,

    #[error("CSV 结构错误 (行 {line}): {message}")]
    Structure { line: u64, message: String },

    #[error("输入读取失败: {0}")]
    Read(String),

    #[error("Excel 解析失败: {0}")]
    Workbook(String),

    #[error("文件格式不支持: {0}（仅支持 .csv/.xlsx/.xls）")]
    UnsupportedFormat(String),
}

impl From<csv::Error> for MalformedInputError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(e) => MalformedInputError::Read(e.to_string()),
            csv::ErrorKind::Utf8 { .. } => MalformedInputError::Encoding { line },
            other => MalformedInputError::Structure {
                line,
                message: format!("{:?}", other),
            },
        }
    }
}

impl From<calamine::Error> for MalformedInputError {
    fn from(err: calamine::Error) -> Self {
        MalformedInputError::Workbook(err.to_string())
    }
}

impl From<std::io::Error> for MalformedInputError {
    fn from(err: std::io::Error) -> Self {
        MalformedInputError::Read(err.to_string())
    }
}

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("输入文件格式错误: {0}")]
    MalformedInput(#[from] MalformedInputError),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    // ===== 导入 schema 错误 =====
    #[error("导入 schema 无效: {0}")]
    InvalidSchema(String),

    // ===== 配置错误 =====
    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    // ===== 存储错误（非批次内，如审计写入）=====
    #[error("数据访问失败: {0}")]
    Repository(#[from] RepositoryError),

    // ===== 通用错误 =====
    #[error("后台任务异常退出: {0}")]
    TaskJoinError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 边界层状态码: 文件本身有误为 400，其余为 500
    pub fn status_code(&self) -> u16 {
        match self {
            ImportError::MalformedInput(_) => 400,
            _ => 500,
        }
    }

    pub fn is_malformed_input(&self) -> bool {
        matches!(self, ImportError::MalformedInput(_))
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ImportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ImportError::TaskJoinError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let malformed = ImportError::from(MalformedInputError::EmptyInput);
        assert_eq!(malformed.status_code(), 400);
        assert!(malformed.is_malformed_input());

        let schema = ImportError::InvalidSchema("identity key".to_string());
        assert_eq!(schema.status_code(), 500);
    }

    #[test]
    fn test_csv_utf8_error_maps_to_encoding() {
        let data: &[u8] = b"sku,name\nA1,\xff\xfe\n";
        let mut reader = csv::ReaderBuilder::new().from_reader(data);
        let err = reader
            .records()
            .find_map(|r| r.err())
            .expect("invalid UTF-8 must surface as an error");

        assert!(matches!(
            MalformedInputError::from(err),
            MalformedInputError::Encoding { .. }
        ));
    }
}
