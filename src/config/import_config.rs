// ==========================================
// 商品目录库存后端 - 导入配置值
// ==========================================
// 职责: 导入管道的全部可调选项，作为一个不可变值传入管道
// 序列化: camelCase（与边界层约定一致）
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 已存在记录的更新方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// 覆盖全部属性
    #[default]
    Replace,
    /// 覆盖属性，库存数量累加（入库合并）
    AccumulateQuantity,
}

impl UpdateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStrategy::Replace => "replace",
            UpdateStrategy::AccumulateQuantity => "accumulate_quantity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "replace" => Some(UpdateStrategy::Replace),
            "accumulate_quantity" | "accumulate" => Some(UpdateStrategy::AccumulateQuantity),
            _ => None,
        }
    }
}

pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_ASYNC_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_BATCH_COMMIT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PARSE_BUFFER_ROWS: usize = 1024;

// ==========================================
// ImportConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportConfig {
    /// 单个事务批次的最大行数
    pub max_batch_size: usize,
    /// 已存在记录是否允许更新（否则 Skipped）
    pub allow_updates: bool,
    /// 批次失败后是否逐行重试
    pub retry_individually_on_batch_failure: bool,
    /// 超过该字节数的上传走后台任务
    pub async_threshold_bytes: u64,
    /// 单批次提交时限
    pub batch_commit_timeout_ms: u64,
    /// 解析线程与管道之间的缓冲行数
    pub parse_buffer_rows: usize,
    /// 是否写入导入审计记录
    pub persist_audit: bool,
    pub update_strategy: UpdateStrategy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            allow_updates: true,
            retry_individually_on_batch_failure: false,
            async_threshold_bytes: DEFAULT_ASYNC_THRESHOLD_BYTES,
            batch_commit_timeout_ms: DEFAULT_BATCH_COMMIT_TIMEOUT_MS,
            parse_buffer_rows: DEFAULT_PARSE_BUFFER_ROWS,
            persist_audit: true,
            update_strategy: UpdateStrategy::Replace,
        }
    }
}

impl ImportConfig {
    /// 校验取值范围
    pub fn validate(&self) -> ImportResult<()> {
        if self.max_batch_size == 0 {
            return Err(ImportError::ConfigValueError {
                key: "maxBatchSize".to_string(),
                value: "0".to_string(),
                message: "批次大小必须大于 0".to_string(),
            });
        }
        if self.parse_buffer_rows == 0 {
            return Err(ImportError::ConfigValueError {
                key: "parseBufferRows".to_string(),
                value: "0".to_string(),
                message: "解析缓冲行数必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn batch_commit_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_commit_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.max_batch_size, 500);
        assert!(config.allow_updates);
        assert!(!config.retry_individually_on_batch_failure);
        assert_eq!(config.async_threshold_bytes, 5_242_880);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_camel_case_with_missing_fields_defaulted() {
        let config: ImportConfig =
            serde_json::from_str(r#"{"maxBatchSize": 2, "allowUpdates": false}"#).unwrap();
        assert_eq!(config.max_batch_size, 2);
        assert!(!config.allow_updates);
        assert_eq!(config.parse_buffer_rows, DEFAULT_PARSE_BUFFER_ROWS);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = ImportConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ImportError::ConfigValueError { .. })
        ));
    }
}
