// ==========================================
// 商品目录库存后端 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 缺省: 未配置的键回落到 ImportConfig::default()
// ==========================================

use crate::config::import_config::{ImportConfig, UpdateStrategy};
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;
        ensure_schema(&conn).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ImportError::InternalError(format!("锁获取失败: {}", e)))?;

        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 读取并解析配置值；不存在时返回默认值
    fn get_parsed_or_default<T: FromStr>(&self, key: &str, default: T) -> ImportResult<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.get_config_value(key)? {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ImportError::ConfigValueError {
                    key: key.to_string(),
                    value: raw.clone(),
                    message: e.to_string(),
                }),
            None => Ok(default),
        }
    }

    /// 写入 global scope 配置值（UPSERT）
    ///
    /// # 参数
    /// - key: 完整配置键（如 `import/maxBatchSize`）
    /// - value: 字符串值，写入前按键的类型校验
    pub fn set_value(&self, key: &str, value: &str) -> ImportResult<()> {
        config_keys::check_value(key, value)?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| ImportError::InternalError(format!("锁获取失败: {}", e)))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value.trim()],
        )
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    /// 获取 global scope 下全部配置（键有序）
    pub fn get_config_snapshot(&self) -> ImportResult<BTreeMap<String, String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ImportError::InternalError(format!("锁获取失败: {}", e)))?;

        let to_read_error = |e: rusqlite::Error| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        };

        let mut stmt = conn
            .prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")
            .map_err(to_read_error)?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(to_read_error)?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row.map_err(to_read_error)?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }
}

fn parse_bool(key: &str, raw: &str) -> ImportResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ImportError::ConfigValueError {
            key: key.to_string(),
            value: raw.to_string(),
            message: "期望布尔值 (true/false)".to_string(),
        }),
    }
}

fn parse_update_strategy(key: &str, raw: &str) -> ImportResult<UpdateStrategy> {
    UpdateStrategy::parse(raw).ok_or_else(|| ImportError::ConfigValueError {
        key: key.to_string(),
        value: raw.to_string(),
        message: "期望 replace 或 accumulate_quantity".to_string(),
    })
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    // ===== 批次与事务 =====

    async fn get_max_batch_size(&self) -> ImportResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_BATCH_SIZE, ImportConfig::default().max_batch_size)
    }

    async fn get_batch_commit_timeout_ms(&self) -> ImportResult<u64> {
        self.get_parsed_or_default(
            config_keys::BATCH_COMMIT_TIMEOUT_MS,
            ImportConfig::default().batch_commit_timeout_ms,
        )
    }

    async fn get_retry_individually_on_batch_failure(&self) -> ImportResult<bool> {
        match self.get_config_value(config_keys::RETRY_INDIVIDUALLY)? {
            Some(raw) => parse_bool(config_keys::RETRY_INDIVIDUALLY, &raw),
            None => Ok(false),
        }
    }

    // ===== 冲突处理 =====

    async fn get_allow_updates(&self) -> ImportResult<bool> {
        match self.get_config_value(config_keys::ALLOW_UPDATES)? {
            Some(raw) => parse_bool(config_keys::ALLOW_UPDATES, &raw),
            None => Ok(true),
        }
    }

    async fn get_update_strategy(&self) -> ImportResult<UpdateStrategy> {
        match self.get_config_value(config_keys::UPDATE_STRATEGY)? {
            Some(raw) => parse_update_strategy(config_keys::UPDATE_STRATEGY, &raw),
            None => Ok(UpdateStrategy::default()),
        }
    }

    // ===== 调用方式与资源 =====

    async fn get_async_threshold_bytes(&self) -> ImportResult<u64> {
        self.get_parsed_or_default(
            config_keys::ASYNC_THRESHOLD_BYTES,
            ImportConfig::default().async_threshold_bytes,
        )
    }

    async fn get_parse_buffer_rows(&self) -> ImportResult<usize> {
        self.get_parsed_or_default(
            config_keys::PARSE_BUFFER_ROWS,
            ImportConfig::default().parse_buffer_rows,
        )
    }

    async fn get_persist_audit(&self) -> ImportResult<bool> {
        match self.get_config_value(config_keys::PERSIST_AUDIT)? {
            Some(raw) => parse_bool(config_keys::PERSIST_AUDIT, &raw),
            None => Ok(true),
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    use super::{parse_bool, parse_update_strategy};
    use crate::importer::error::{ImportError, ImportResult};

    // 批次与事务
    pub const MAX_BATCH_SIZE: &str = "import/maxBatchSize";
    pub const BATCH_COMMIT_TIMEOUT_MS: &str = "import/batchCommitTimeoutMs";
    pub const RETRY_INDIVIDUALLY: &str = "import/retryIndividuallyOnBatchFailure";

    // 冲突处理
    pub const ALLOW_UPDATES: &str = "import/allowUpdates";
    pub const UPDATE_STRATEGY: &str = "import/updateStrategy";

    // 调用方式与资源
    pub const ASYNC_THRESHOLD_BYTES: &str = "import/asyncThresholdBytes";
    pub const PARSE_BUFFER_ROWS: &str = "import/parseBufferRows";
    pub const PERSIST_AUDIT: &str = "import/persistAudit";

    pub const ALL: [&str; 8] = [
        MAX_BATCH_SIZE,
        BATCH_COMMIT_TIMEOUT_MS,
        RETRY_INDIVIDUALLY,
        ALLOW_UPDATES,
        UPDATE_STRATEGY,
        ASYNC_THRESHOLD_BYTES,
        PARSE_BUFFER_ROWS,
        PERSIST_AUDIT,
    ];

    /// 写入前校验键名与取值类型
    pub(super) fn check_value(key: &str, value: &str) -> ImportResult<()> {
        let invalid_number = |message: &str| ImportError::ConfigValueError {
            key: key.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        };

        match key {
            MAX_BATCH_SIZE | PARSE_BUFFER_ROWS => match value.trim().parse::<usize>() {
                Ok(0) => Err(invalid_number("必须大于 0")),
                Ok(_) => Ok(()),
                Err(_) => Err(invalid_number("期望正整数")),
            },
            BATCH_COMMIT_TIMEOUT_MS | ASYNC_THRESHOLD_BYTES => value
                .trim()
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| invalid_number("期望非负整数")),
            RETRY_INDIVIDUALLY | ALLOW_UPDATES | PERSIST_AUDIT => parse_bool(key, value).map(|_| ()),
            UPDATE_STRATEGY => parse_update_strategy(key, value).map(|_| ()),
            _ => Err(ImportError::ConfigValueError {
                key: key.to_string(),
                value: value.to_string(),
                message: format!("未知配置键，可选: {}", ALL.join(", ")),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let manager = setup_manager();
        let config = manager.load_import_config().await.unwrap();
        assert_eq!(config, ImportConfig::default());
    }

    #[tokio::test]
    async fn test_set_value_overrides_default() {
        let manager = setup_manager();
        manager.set_value(config_keys::MAX_BATCH_SIZE, "2").unwrap();
        manager.set_value(config_keys::ALLOW_UPDATES, "false").unwrap();
        manager
            .set_value(config_keys::UPDATE_STRATEGY, "accumulate_quantity")
            .unwrap();

        let config = manager.load_import_config().await.unwrap();
        assert_eq!(config.max_batch_size, 2);
        assert!(!config.allow_updates);
        assert_eq!(config.update_strategy, UpdateStrategy::AccumulateQuantity);

        let snapshot = manager.get_config_snapshot().unwrap();
        assert_eq!(snapshot.get(config_keys::MAX_BATCH_SIZE).map(String::as_str), Some("2"));
    }

    #[test]
    fn test_set_value_rejects_unknown_key_and_bad_value() {
        let manager = setup_manager();
        assert!(matches!(
            manager.set_value("import/unknown", "1"),
            Err(ImportError::ConfigValueError { .. })
        ));
        assert!(matches!(
            manager.set_value(config_keys::MAX_BATCH_SIZE, "0"),
            Err(ImportError::ConfigValueError { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_stored_value_is_config_value_error() {
        let manager = setup_manager();
        {
            let conn = manager.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, 'lots')",
                params![config_keys::MAX_BATCH_SIZE],
            )
            .unwrap();
        }

        assert!(matches!(
            manager.load_import_config().await,
            Err(ImportError::ConfigValueError { .. })
        ));
    }
}
