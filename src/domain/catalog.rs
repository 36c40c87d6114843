// ==========================================
// 商品目录库存后端 - 目录领域模型
// ==========================================
// 用途: 导入管道的目标实体 + 导出查询条件
// 对齐: migrations/v0.1_catalog_schema.sql catalog_item / category 表
// ==========================================

use crate::domain::types::{ItemColor, SortField, SortOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 复合键分隔符（U+001F UNIT SEPARATOR，不会出现在已校验的单元格中）
pub const NATURAL_KEY_SEPARATOR: char = '\u{1f}';

// ==========================================
// NaturalKey - 业务主键
// ==========================================
// 区分大小写、精确匹配；由身份键各列的 TRIM 后取值拼接
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// 由身份键各列取值构造
    ///
    /// # 返回
    /// - None: 任一组成部分为空（业务主键不允许为空）
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Option<Self> {
        let trimmed: Vec<&str> = parts.iter().map(|p| p.as_ref().trim()).collect();
        if trimmed.is_empty() || trimmed.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self(trimmed.join(&NATURAL_KEY_SEPARATOR.to_string())))
    }

    /// 从数据库存储值恢复
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    /// 展示时用 `|` 替代不可见分隔符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.replace(NATURAL_KEY_SEPARATOR, "|"))
    }
}

// ==========================================
// Category - 商品分类（被引用实体）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

// ==========================================
// CatalogItem - 目录商品（导入目标实体）
// ==========================================
// 红线: natural_key 非空，且在单次导入内唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Option<i64>,               // 存储层代理键（提交前不存在）
    pub natural_key: NaturalKey,       // 业务主键
    pub sku: String,                   // 商品编码
    pub name: String,                  // 商品名称
    pub price: f64,                    // 单价（>= 0）
    pub category: Option<Category>,    // 分类（按名称解析）
    pub color: Option<ItemColor>,      // 颜色
    pub cotton_part: Option<i32>,      // 棉含量百分比（0-100）
    pub quantity: i64,                 // 库存数量（>= 0，默认 0）
}

impl CatalogItem {
    /// 比较业务属性（忽略存储层代理键）
    pub fn same_attributes(&self, other: &CatalogItem) -> bool {
        self.natural_key == other.natural_key
            && self.sku == other.sku
            && self.name == other.name
            && self.price == other.price
            && self.category.as_ref().map(|c| c.name.as_str())
                == other.category.as_ref().map(|c| c.name.as_str())
            && self.color == other.color
            && self.cotton_part == other.cotton_part
            && self.quantity == other.quantity
    }
}

// ==========================================
// ItemChange - 批次内的变更意图
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,             // 新增
    Replace,            // 覆盖更新
    AccumulateQuantity, // 更新属性并累加库存数量
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub row_index: usize, // 来源行号
    pub kind: ChangeKind,
    pub item: CatalogItem,
}

// ==========================================
// ItemQuery - 导出查询条件
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemQuery {
    pub category: Option<String>,
    pub color: Option<ItemColor>,
    pub cotton_part_min: Option<i32>,
    pub cotton_part_max: Option<i32>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}
