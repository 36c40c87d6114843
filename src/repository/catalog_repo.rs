// ==========================================
// 商品目录库存后端 - 目录 Repository Trait
// ==========================================
// 职责: 定义导入/导出管道所需的数据访问接口（不包含实现）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::catalog::{CatalogItem, Category, ItemChange, ItemQuery, NaturalKey};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

/// 导出时逐条接收商品的回调
pub type ItemVisitor<'a> = dyn FnMut(CatalogItem) -> RepositoryResult<()> + Send + 'a;

// ==========================================
// CatalogRepository Trait
// ==========================================
// 用途: 目录数据访问
// 实现者: CatalogRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    // ===== 引用解析 =====

    /// 按名称查询分类（精确匹配）
    ///
    /// # 返回
    /// - Ok(Some(category)): 找到
    /// - Ok(None): 不存在
    async fn find_category_by_name(&self, name: &str) -> RepositoryResult<Option<Category>>;

    /// 创建分类（名称已存在时返回已有记录）
    async fn create_category(&self, name: &str) -> RepositoryResult<Category>;

    // ===== 查询与校验 =====

    /// 批量检查业务主键是否已存在
    ///
    /// # 返回
    /// - Ok(HashSet): 已存在的业务主键集合
    async fn existing_keys(&self, keys: &[NaturalKey]) -> RepositoryResult<HashSet<NaturalKey>>;

    /// 按业务主键查询商品
    async fn find_by_natural_key(&self, key: &NaturalKey) -> RepositoryResult<Option<CatalogItem>>;

    /// 统计 catalog_item 表记录数
    async fn count_items(&self) -> RepositoryResult<usize>;

    // ===== 批量写入（事务化）=====

    /// 在单个事务中提交一个批次
    ///
    /// # 参数
    /// - changes: 批次内变更（按输入行顺序）
    /// - timeout: 本批次执行时限，超时则中断并整体回滚
    ///
    /// # 返回
    /// - Ok(usize): 写入的记录数
    /// - Err: 数据库错误（整个事务回滚，不留任何部分写入）
    async fn commit_batch(&self, changes: Vec<ItemChange>, timeout: Duration)
        -> RepositoryResult<usize>;

    // ===== 导出 =====

    /// 按条件流式读取商品，逐条交给 visitor（不整体加载到内存）
    ///
    /// # 返回
    /// - Ok(usize): 访问的记录数
    async fn export_items(
        &self,
        query: &ItemQuery,
        visitor: &mut ItemVisitor<'_>,
    ) -> RepositoryResult<usize>;
}
