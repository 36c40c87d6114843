// ==========================================
// 商品目录库存后端 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{ApiError, ApiResult, ImportApi};
use crate::config::ConfigManager;
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::importer::ImportSchema;
use crate::repository::{CatalogRepositoryImpl, ImportAuditRepositoryImpl};

/// 显式指定数据库路径的环境变量
pub const DB_PATH_ENV: &str = "CATALOG_INVENTORY_DB_PATH";

/// 应用状态
///
/// 所有组件共享同一个数据库连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 导入/导出API
    pub import_api: Arc<ImportApi>,

    /// 配置管理（CLI 的 config 子命令使用）
    pub config_manager: Arc<ConfigManager>,

    /// 目录仓储（分类维护）
    pub catalog_repo: Arc<CatalogRepositoryImpl>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并应用 schema（幂等）
    /// 2. 初始化所有Repository
    /// 3. 创建API实例
    pub fn new(db_path: String) -> ApiResult<Self> {
        tracing::info!(db_path = %db_path, "初始化AppState");

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(format!("无法打开数据库: {}", e)))?;
        ensure_schema(&conn)
            .map_err(|e| ApiError::DatabaseError(format!("数据库初始化失败: {}", e)))?;
        let conn = Arc::new(Mutex::new(conn));

        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let catalog_repo = Arc::new(CatalogRepositoryImpl::from_connection(conn.clone()));
        let import_api = Arc::new(ImportApi::from_parts(
            catalog_repo.clone(),
            Arc::new(ImportAuditRepositoryImpl::from_connection(conn)),
            config_manager.clone(),
            ImportSchema::catalog_default(),
        ));

        Ok(Self {
            db_path,
            import_api,
            config_manager,
            catalog_repo,
        })
    }
}

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 CATALOG_INVENTORY_DB_PATH（非空时）
/// - 否则: 用户数据目录/catalog-inventory/catalog_inventory.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./catalog_inventory.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("catalog-inventory");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("catalog_inventory.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
    }

    #[tokio::test]
    async fn test_app_state_shares_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("app.db").to_string_lossy().to_string();
        let state = AppState::new(db_path).unwrap();

        state
            .config_manager
            .set_value("import/maxBatchSize", "7")
            .unwrap();
        let config = state.import_api.import_config().await.unwrap();
        assert_eq!(config.max_batch_size, 7);
    }
}
