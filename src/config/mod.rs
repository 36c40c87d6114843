// ==========================================
// 商品目录库存后端 - 配置层
// ==========================================
// 职责: 导入管道配置的加载与覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_config::{ImportConfig, UpdateStrategy};
pub use import_config_trait::ImportConfigReader;
