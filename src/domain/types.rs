// ==========================================
// 商品目录库存后端 - 领域类型定义
// ==========================================
// 职责: 闭集枚举（颜色 / 排序字段 / 排序方向）
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 商品颜色 (Item Color)
// ==========================================
// 解析不区分大小写，统一存储为大写
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemColor {
    Red,
    Pink,
    Green,
    Purple,
    Black,
    White,
}

impl ItemColor {
    pub const ALL: [ItemColor; 6] = [
        ItemColor::Red,
        ItemColor::Pink,
        ItemColor::Green,
        ItemColor::Purple,
        ItemColor::Black,
        ItemColor::White,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemColor::Red => "RED",
            ItemColor::Pink => "PINK",
            ItemColor::Green => "GREEN",
            ItemColor::Purple => "PURPLE",
            ItemColor::Black => "BLACK",
            ItemColor::White => "WHITE",
        }
    }

    /// 解析颜色（TRIM + 忽略大小写）
    pub fn parse(value: &str) -> Option<Self> {
        let upper = value.trim().to_uppercase();
        Self::ALL.into_iter().find(|c| c.as_str() == upper)
    }

    /// 允许值列表（用于导入 schema 的枚举规则）
    pub fn allowed_values() -> Vec<String> {
        Self::ALL.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl fmt::Display for ItemColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导出排序字段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Sku,
    Name,
    Price,
    CottonPart,
    Quantity,
}

impl SortField {
    /// 对应的数据库列（白名单，直接拼入 ORDER BY）
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Sku => "i.sku",
            SortField::Name => "i.name",
            SortField::Price => "i.price",
            SortField::CottonPart => "i.cotton_part",
            SortField::Quantity => "i.quantity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sku" => Some(SortField::Sku),
            "name" => Some(SortField::Name),
            "price" => Some(SortField::Price),
            "cotton_part" | "cottonpart" => Some(SortField::CottonPart),
            "quantity" => Some(SortField::Quantity),
            _ => None,
        }
    }
}

// ==========================================
// 排序方向
// ==========================================
// 非 desc 一律按升序处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}
