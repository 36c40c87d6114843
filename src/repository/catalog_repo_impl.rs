// ==========================================
// 商品目录库存后端 - 目录 Repository 实现
// ==========================================
// 职责: 实现目录数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 事务: 每个批次一个事务，失败整体回滚
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::catalog::{
    CatalogItem, Category, ChangeKind, ItemChange, ItemQuery, NaturalKey,
};
use crate::domain::types::ItemColor;
use crate::repository::catalog_repo::{CatalogRepository, ItemVisitor};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// IN 子句单次绑定的最大参数个数
const IN_CLAUSE_CHUNK: usize = 500;

/// 进度回调触发间隔（SQLite 虚拟机指令数）
const PROGRESS_CHECK_OPS: i32 = 8;

const ITEM_COLUMNS: &str = r#"
    i.item_id, i.natural_key, i.sku, i.name, i.price,
    i.category_id, c.name, i.color, i.cotton_part, i.quantity
"#;

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogItem> {
    let category_id: Option<i64> = row.get(5)?;
    let category_name: Option<String> = row.get(6)?;
    let category = match (category_id, category_name) {
        (Some(id), Some(name)) => Some(Category { id, name }),
        _ => None,
    };

    let color = match row.get::<_, Option<String>>(7)? {
        Some(raw) => Some(ItemColor::parse(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("未知颜色: {}", raw).into(),
            )
        })?),
        None => None,
    };

    Ok(CatalogItem {
        id: row.get(0)?,
        natural_key: NaturalKey::from_stored(row.get(1)?),
        sku: row.get(2)?,
        name: row.get(3)?,
        price: row.get(4)?,
        category,
        color,
        cotton_part: row.get(8)?,
        quantity: row.get(9)?,
    })
}

// ==========================================
// CatalogRepositoryImpl
// ==========================================
pub struct CatalogRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepositoryImpl {
    /// 创建新的 Repository 实例（打开连接并确保建库脚本已执行）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 基于已有连接创建（与配置/审计仓储共享同一连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 在事务中应用一个批次的变更
    fn apply_changes_tx(tx: &Transaction, changes: &[ItemChange]) -> RepositoryResult<usize> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut insert_stmt = tx.prepare(
            r#"
            INSERT INTO catalog_item (
                natural_key, sku, name, price, category_id,
                color, cotton_part, quantity, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
        )?;
        let mut replace_stmt = tx.prepare(
            r#"
            UPDATE catalog_item
            SET sku = ?2, name = ?3, price = ?4, category_id = ?5,
                color = ?6, cotton_part = ?7, quantity = ?8, updated_at = ?9
            WHERE natural_key = ?1
            "#,
        )?;
        let mut accumulate_stmt = tx.prepare(
            r#"
            UPDATE catalog_item
            SET sku = ?2, name = ?3, price = ?4, category_id = ?5,
                color = ?6, cotton_part = ?7, quantity = quantity + ?8, updated_at = ?9
            WHERE natural_key = ?1
            "#,
        )?;

        let mut count = 0;
        for change in changes {
            let item = &change.item;
            let stmt = match change.kind {
                ChangeKind::Insert => &mut insert_stmt,
                ChangeKind::Replace => &mut replace_stmt,
                ChangeKind::AccumulateQuantity => &mut accumulate_stmt,
            };

            let affected = stmt.execute(params![
                item.natural_key.as_str(),
                item.sku,
                item.name,
                item.price,
                item.category.as_ref().map(|c| c.id),
                item.color.map(|c| c.as_str()),
                item.cotton_part,
                item.quantity,
                now,
            ])?;

            // 更新目标在分类后被并发删除
            if affected == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "CatalogItem".to_string(),
                    id: item.natural_key.to_string(),
                });
            }
            count += affected;
        }

        Ok(count)
    }

    /// 带时限的批次提交（在阻塞线程中执行）
    ///
    /// 时限从拿到连接锁后开始计算；超时由 SQLite 进度回调中断当前语句
    fn commit_batch_blocking(
        conn: &Mutex<Connection>,
        changes: &[ItemChange],
        timeout: Duration,
    ) -> RepositoryResult<usize> {
        let conn = conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        tx.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));

        let result = Self::apply_changes_tx(&tx, changes);

        // 连接为共享连接，回调必须在提交/回滚前清除
        tx.progress_handler(0, None::<fn() -> bool>);

        let count = match result {
            Ok(count) => count,
            Err(RepositoryError::Interrupted) => {
                return Err(RepositoryError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(e) => return Err(e),
        };

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    /// 组装导出查询（过滤条件 + 白名单排序）
    fn build_export_sql(query: &ItemQuery) -> (String, Vec<Value>) {
        let mut sql = format!(
            "SELECT {} FROM catalog_item i LEFT JOIN category c ON c.category_id = i.category_id WHERE 1 = 1",
            ITEM_COLUMNS
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = &query.category {
            sql.push_str(" AND c.name = ?");
            values.push(Value::Text(category.clone()));
        }
        if let Some(color) = query.color {
            sql.push_str(" AND i.color = ?");
            values.push(Value::Text(color.as_str().to_string()));
        }
        if let Some(min) = query.cotton_part_min {
            sql.push_str(" AND i.cotton_part >= ?");
            values.push(Value::Integer(min as i64));
        }
        if let Some(max) = query.cotton_part_max {
            sql.push_str(" AND i.cotton_part <= ?");
            values.push(Value::Integer(max as i64));
        }

        sql.push_str(&format!(
            " ORDER BY {} {}, i.natural_key ASC",
            query.sort_by.column(),
            query.sort_order.as_sql()
        ));

        (sql, values)
    }
}

#[async_trait]
impl CatalogRepository for CatalogRepositoryImpl {
    async fn find_category_by_name(&self, name: &str) -> RepositoryResult<Option<Category>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let category = conn
            .query_row(
                "SELECT category_id, name FROM category WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(category)
    }

    async fn create_category(&self, name: &str) -> RepositoryResult<Category> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        conn.execute(
            "INSERT OR IGNORE INTO category (name) VALUES (?1)",
            params![name],
        )?;

        let category = conn.query_row(
            "SELECT category_id, name FROM category WHERE name = ?1",
            params![name],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;

        Ok(category)
    }

    async fn existing_keys(&self, keys: &[NaturalKey]) -> RepositoryResult<HashSet<NaturalKey>> {
        let mut found = HashSet::new();
        if keys.is_empty() {
            return Ok(found);
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        for chunk in keys.chunks(IN_CLAUSE_CHUNK) {
            // 构建 IN 子句的占位符
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!(
                "SELECT natural_key FROM catalog_item WHERE natural_key IN ({})",
                placeholders
            );

            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|k| k.as_str())), |row| {
                row.get::<_, String>(0)
            })?;

            for key in rows {
                found.insert(NaturalKey::from_stored(key?));
            }
        }

        Ok(found)
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<Option<CatalogItem>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let sql = format!(
            "SELECT {} FROM catalog_item i LEFT JOIN category c ON c.category_id = i.category_id WHERE i.natural_key = ?1",
            ITEM_COLUMNS
        );
        let item = conn
            .query_row(&sql, params![key.as_str()], row_to_item)
            .optional()?;

        Ok(item)
    }

    async fn count_items(&self) -> RepositoryResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM catalog_item", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    async fn commit_batch(
        &self,
        changes: Vec<ItemChange>,
        timeout: Duration,
    ) -> RepositoryResult<usize> {
        let conn = Arc::clone(&self.conn);
        let batch_size = changes.len();

        let count = tokio::task::spawn_blocking(move || {
            Self::commit_batch_blocking(&conn, &changes, timeout)
        })
        .await
        .map_err(|e| RepositoryError::InternalError(format!("批次提交任务异常退出: {}", e)))??;

        debug!(batch_size, written = count, "批次事务已提交");
        Ok(count)
    }

    async fn export_items(
        &self,
        query: &ItemQuery,
        visitor: &mut ItemVisitor<'_>,
    ) -> RepositoryResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let (sql, values) = Self::build_export_sql(query);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut count = 0;
        while let Some(row) = rows.next()? {
            visitor(row_to_item(row)?)?;
            count += 1;
        }

        Ok(count)
    }
}

// ==========================================
// 测试
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{SortField, SortOrder};

    fn setup_repo() -> CatalogRepositoryImpl {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        CatalogRepositoryImpl::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn item(sku: &str, quantity: i64, category: Option<Category>) -> CatalogItem {
        CatalogItem {
            id: None,
            natural_key: NaturalKey::from_parts(&[sku]).unwrap(),
            sku: sku.to_string(),
            name: format!("商品 {}", sku),
            price: 10.5,
            category,
            color: Some(ItemColor::Black),
            cotton_part: Some(40),
            quantity,
        }
    }

    fn change(row_index: usize, kind: ChangeKind, item: CatalogItem) -> ItemChange {
        ItemChange {
            row_index,
            kind,
            item,
        }
    }

    #[tokio::test]
    async fn test_commit_insert_then_replace() {
        let repo = setup_repo();
        let shirts = repo.create_category("Shirts").await.unwrap();

        repo.commit_batch(
            vec![change(1, ChangeKind::Insert, item("A1", 5, Some(shirts.clone())))],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut updated = item("A1", 7, Some(shirts));
        updated.price = 12.0;
        repo.commit_batch(
            vec![change(1, ChangeKind::Replace, updated)],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let key = NaturalKey::from_parts(&["A1"]).unwrap();
        let stored = repo.find_by_natural_key(&key).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 7);
        assert_eq!(stored.price, 12.0);
        assert_eq!(stored.category.unwrap().name, "Shirts");
        assert_eq!(repo.count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_accumulate_quantity_adds_to_stored_value() {
        let repo = setup_repo();
        repo.commit_batch(
            vec![change(1, ChangeKind::Insert, item("A1", 5, None))],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        repo.commit_batch(
            vec![change(1, ChangeKind::AccumulateQuantity, item("A1", 3, None))],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let key = NaturalKey::from_parts(&["A1"]).unwrap();
        let stored = repo.find_by_natural_key(&key).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 8);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_entirely() {
        let repo = setup_repo();
        let mut bad = item("B2", 1, None);
        bad.price = -1.0; // CHECK 约束违反

        let result = repo
            .commit_batch(
                vec![
                    change(1, ChangeKind::Insert, item("A1", 1, None)),
                    change(2, ChangeKind::Insert, bad),
                ],
                Duration::from_secs(5),
            )
            .await;

        assert!(matches!(
            result,
            Err(RepositoryError::CheckConstraintViolation(_))
        ));
        assert_eq!(repo.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_interrupts_and_rolls_back() {
        let repo = setup_repo();

        let result = repo
            .commit_batch(
                vec![change(1, ChangeKind::Insert, item("A1", 1, None))],
                Duration::from_millis(0),
            )
            .await;

        assert!(matches!(result, Err(RepositoryError::Timeout { timeout_ms: 0 })));
        assert_eq!(repo.count_items().await.unwrap(), 0);

        // 回调已清除，连接仍可正常使用
        repo.commit_batch(
            vec![change(1, ChangeKind::Insert, item("A1", 1, None))],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(repo.count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_keys_spans_chunks() {
        let repo = setup_repo();
        let changes: Vec<ItemChange> = (0..600)
            .map(|i| change(i + 1, ChangeKind::Insert, item(&format!("K{:04}", i), 0, None)))
            .collect();
        repo.commit_batch(changes, Duration::from_secs(30))
            .await
            .unwrap();

        let mut lookup: Vec<NaturalKey> = (0..600)
            .step_by(3)
            .map(|i| NaturalKey::from_parts(&[format!("K{:04}", i)]).unwrap())
            .collect();
        lookup.push(NaturalKey::from_parts(&["MISSING"]).unwrap());

        let found = repo.existing_keys(&lookup).await.unwrap();
        assert_eq!(found.len(), 200);
        assert!(!found.contains(&NaturalKey::from_parts(&["MISSING"]).unwrap()));
    }

    #[tokio::test]
    async fn test_export_filters_and_sorts() {
        let repo = setup_repo();
        let shirts = repo.create_category("Shirts").await.unwrap();
        let mut cheap = item("A1", 1, Some(shirts.clone()));
        cheap.price = 1.0;
        let mut pricey = item("A2", 1, Some(shirts));
        pricey.price = 99.0;
        let other = item("A3", 1, None);

        repo.commit_batch(
            vec![
                change(1, ChangeKind::Insert, cheap),
                change(2, ChangeKind::Insert, pricey),
                change(3, ChangeKind::Insert, other),
            ],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let query = ItemQuery {
            category: Some("Shirts".to_string()),
            sort_by: SortField::Price,
            sort_order: SortOrder::Desc,
            ..Default::default()
        };

        let mut skus = Vec::new();
        let visited = repo
            .export_items(&query, &mut |item: CatalogItem| {
                skus.push(item.sku);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(visited, 2);
        assert_eq!(skus, vec!["A2".to_string(), "A1".to_string()]);
    }

    #[tokio::test]
    async fn test_create_category_is_idempotent() {
        let repo = setup_repo();
        let first = repo.create_category("Shirts").await.unwrap();
        let second = repo.create_category("Shirts").await.unwrap();
        assert_eq!(first, second);

        let missing = repo.find_category_by_name("Pants").await.unwrap();
        assert!(missing.is_none());
    }
}
