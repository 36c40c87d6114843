// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、导入器组装、CSV 样例、故障注入仓储
// ==========================================

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_inventory::config::ImportConfig;
use catalog_inventory::db::{ensure_schema, open_sqlite_connection};
use catalog_inventory::domain::{CatalogItem, Category, ItemChange, ItemQuery, NaturalKey};
use catalog_inventory::importer::{CatalogImporterImpl, ImportSchema};
use catalog_inventory::repository::{
    CatalogRepository, CatalogRepositoryImpl, ItemVisitor, RepositoryError, RepositoryResult,
};
use rusqlite::Connection;
use std::collections::HashSet;
use std::error::Error;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接（仓储之间共用）
pub fn open_shared(db_path: &str) -> Arc<Mutex<Connection>> {
    let conn = open_sqlite_connection(db_path).expect("Failed to open test db");
    Arc::new(Mutex::new(conn))
}

pub fn create_repo(db_path: &str) -> Arc<CatalogRepositoryImpl> {
    Arc::new(CatalogRepositoryImpl::new(db_path).expect("Failed to create CatalogRepository"))
}

/// 默认 schema 的导入器
pub fn create_importer(repo: Arc<dyn CatalogRepository>, config: ImportConfig) -> CatalogImporterImpl {
    CatalogImporterImpl::new(repo, ImportSchema::catalog_default(), config)
}

pub fn config_with_batch(max_batch_size: usize) -> ImportConfig {
    ImportConfig {
        max_batch_size,
        ..ImportConfig::default()
    }
}

pub fn csv_cursor(text: &str) -> Cursor<Vec<u8>> {
    Cursor::new(text.as_bytes().to_vec())
}

/// 生成 sku,name,price 三列的 CSV
pub fn simple_csv(rows: &[(&str, &str, &str)]) -> String {
    let mut text = String::from("sku,name,price\n");
    for (sku, name, price) in rows {
        text.push_str(&format!("{},{},{}\n", sku, name, price));
    }
    text
}

pub fn key(sku: &str) -> NaturalKey {
    NaturalKey::from_parts(&[sku]).unwrap()
}

// ==========================================
// ScriptedRepository - 故障注入仓储
// ==========================================
// 包装真实仓储，按脚本让 commit_batch 失败或变慢
pub struct ScriptedRepository {
    inner: Arc<CatalogRepositoryImpl>,
    fail_on_call: Option<usize>,
    poisoned_keys: HashSet<String>,
    commit_delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedRepository {
    pub fn new(inner: Arc<CatalogRepositoryImpl>) -> Self {
        Self {
            inner,
            fail_on_call: None,
            poisoned_keys: HashSet::new(),
            commit_delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// 第 n 次 commit_batch 调用失败（从 1 开始）
    pub fn fail_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// 包含该主键的任何批次都失败
    pub fn poison_key(mut self, natural_key: &str) -> Self {
        self.poisoned_keys.insert(natural_key.to_string());
        self
    }

    pub fn delay_commits(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    pub fn commit_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogRepository for ScriptedRepository {
    async fn find_category_by_name(&self, name: &str) -> RepositoryResult<Option<Category>> {
        self.inner.find_category_by_name(name).await
    }

    async fn create_category(&self, name: &str) -> RepositoryResult<Category> {
        self.inner.create_category(name).await
    }

    async fn existing_keys(&self, keys: &[NaturalKey]) -> RepositoryResult<HashSet<NaturalKey>> {
        self.inner.existing_keys(keys).await
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<Option<CatalogItem>> {
        self.inner.find_by_natural_key(key).await
    }

    async fn count_items(&self) -> RepositoryResult<usize> {
        self.inner.count_items().await
    }

    async fn commit_batch(
        &self,
        changes: Vec<ItemChange>,
        timeout: Duration,
    ) -> RepositoryResult<usize> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on_call == Some(call) {
            return Err(RepositoryError::DatabaseTransactionError(format!(
                "injected failure on commit #{}",
                call
            )));
        }
        if changes
            .iter()
            .any(|c| self.poisoned_keys.contains(c.item.natural_key.as_str()))
        {
            return Err(RepositoryError::CheckConstraintViolation(
                "injected poisoned row".to_string(),
            ));
        }

        self.inner.commit_batch(changes, timeout).await
    }

    async fn export_items(
        &self,
        query: &ItemQuery,
        visitor: &mut ItemVisitor<'_>,
    ) -> RepositoryResult<usize> {
        self.inner.export_items(query, visitor).await
    }
}
