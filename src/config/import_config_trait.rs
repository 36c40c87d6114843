// ==========================================
// 商品目录库存后端 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::import_config::{ImportConfig, UpdateStrategy};
use crate::importer::error::ImportResult;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 批次与事务 =====

    /// 获取单批次最大行数
    ///
    /// # 默认值
    /// - 500
    async fn get_max_batch_size(&self) -> ImportResult<usize>;

    /// 获取单批次提交时限（毫秒）
    ///
    /// # 默认值
    /// - 30000
    async fn get_batch_commit_timeout_ms(&self) -> ImportResult<u64>;

    /// 批次失败后是否逐行重试
    ///
    /// # 默认值
    /// - false
    async fn get_retry_individually_on_batch_failure(&self) -> ImportResult<bool>;

    // ===== 冲突处理 =====

    /// 已存在记录是否允许更新
    ///
    /// # 默认值
    /// - true
    async fn get_allow_updates(&self) -> ImportResult<bool>;

    /// 获取更新方式
    ///
    /// # 默认值
    /// - replace
    async fn get_update_strategy(&self) -> ImportResult<UpdateStrategy>;

    // ===== 调用方式与资源 =====

    /// 同步/后台任务切换阈值（字节）
    ///
    /// # 默认值
    /// - 5242880 (5 MiB)
    async fn get_async_threshold_bytes(&self) -> ImportResult<u64>;

    /// 解析缓冲行数
    ///
    /// # 默认值
    /// - 1024
    async fn get_parse_buffer_rows(&self) -> ImportResult<usize>;

    /// 是否写入导入审计记录
    ///
    /// # 默认值
    /// - true
    async fn get_persist_audit(&self) -> ImportResult<bool>;

    /// 一次读取全部选项并校验
    async fn load_import_config(&self) -> ImportResult<ImportConfig> {
        let config = ImportConfig {
            max_batch_size: self.get_max_batch_size().await?,
            allow_updates: self.get_allow_updates().await?,
            retry_individually_on_batch_failure: self
                .get_retry_individually_on_batch_failure()
                .await?,
            async_threshold_bytes: self.get_async_threshold_bytes().await?,
            batch_commit_timeout_ms: self.get_batch_commit_timeout_ms().await?,
            parse_buffer_rows: self.get_parse_buffer_rows().await?,
            persist_audit: self.get_persist_audit().await?,
            update_strategy: self.get_update_strategy().await?,
        };
        config.validate()?;
        Ok(config)
    }
}
