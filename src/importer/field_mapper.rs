// ==========================================
// 商品目录库存后端 - 字段（实体）映射器
// ==========================================
// 职责: NormalizedRecord ⇄ CatalogItem
// 正向: 应用默认值、按名称解析分类（单次导入内缓存）
// 逆向: 供导出使用，输出可被同一 schema 重新校验
// ==========================================

use crate::domain::catalog::{CatalogItem, Category, NaturalKey};
use crate::domain::import::{FieldError, NormalizedRecord, RowError, TypedValue, ValidationRule};
use crate::domain::types::ItemColor;
use crate::repository::CatalogRepository;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

pub const FIELD_SKU: &str = "sku";
pub const FIELD_NAME: &str = "name";
pub const FIELD_PRICE: &str = "price";
pub const FIELD_CATEGORY: &str = "category";
pub const FIELD_COLOR: &str = "color";
pub const FIELD_COTTON_PART: &str = "cotton_part";
pub const FIELD_QUANTITY: &str = "quantity";

/// 默认库存数量
pub const DEFAULT_QUANTITY: i64 = 0;

/// 身份键取值的文本形式
fn key_part(value: &TypedValue) -> String {
    match value {
        TypedValue::Text(s) | TypedValue::Enum(s) => s.clone(),
        TypedValue::Integer(v) => v.to_string(),
        TypedValue::Decimal(v) => v.to_string(),
        TypedValue::Date(d) => d.format("%Y-%m-%d").to_string(),
    }
}

pub struct FieldMapper {
    repo: Arc<dyn CatalogRepository>,
    identity_key: Vec<String>,
    // 分类名 → 解析结果（None 表示不存在）
    categories: HashMap<String, Option<Category>>,
}

impl FieldMapper {
    pub fn new(repo: Arc<dyn CatalogRepository>, identity_key: Vec<String>) -> Self {
        Self {
            repo,
            identity_key,
            categories: HashMap::new(),
        }
    }

    /// 由规范化记录计算业务主键
    pub fn natural_key(&self, record: &NormalizedRecord) -> Option<NaturalKey> {
        let parts: Option<Vec<String>> = self
            .identity_key
            .iter()
            .map(|column| record.get(column).map(key_part))
            .collect();
        NaturalKey::from_parts(&parts?)
    }

    /// 正向映射
    ///
    /// # 返回
    /// - Ok(CatalogItem): 映射成功（id 为空）
    /// - Err(Vec<RowError>): 引用未找到 / 映射所需字段缺失 / 引用查询失败
    pub async fn to_entity(&mut self, record: &NormalizedRecord) -> Result<CatalogItem, Vec<RowError>> {
        let mut errors = Vec::new();

        let natural_key = self.natural_key(record);
        if natural_key.is_none() {
            errors.push(RowError::Field(FieldError::new(
                self.identity_key.join(","),
                "",
                ValidationRule::Required,
                "业务主键为空",
            )));
        }

        let sku = Self::required_text(record, FIELD_SKU, &mut errors);
        let name = Self::required_text(record, FIELD_NAME, &mut errors);
        let price = match record.decimal(FIELD_PRICE) {
            Some(p) => Some(p),
            None => {
                errors.push(Self::missing(FIELD_PRICE));
                None
            }
        };

        let color = match record.text(FIELD_COLOR) {
            Some(raw) => match ItemColor::parse(raw) {
                Some(c) => Some(c),
                None => {
                    errors.push(RowError::Field(FieldError::new(
                        FIELD_COLOR,
                        raw,
                        ValidationRule::AllowedValues,
                        "未知颜色",
                    )));
                    None
                }
            },
            None => None,
        };

        let cotton_part = match record.integer(FIELD_COTTON_PART) {
            Some(v) => match i32::try_from(v) {
                Ok(v) => Some(v),
                Err(_) => {
                    errors.push(RowError::Field(FieldError::new(
                        FIELD_COTTON_PART,
                        v.to_string(),
                        ValidationRule::Range,
                        "超出整数范围",
                    )));
                    None
                }
            },
            None => None,
        };

        let quantity = record.integer(FIELD_QUANTITY).unwrap_or(DEFAULT_QUANTITY);

        let category = match record.text(FIELD_CATEGORY) {
            Some(name) => match self.resolve_category(name).await {
                Ok(Some(category)) => Some(category),
                Ok(None) => {
                    errors.push(RowError::Field(FieldError::new(
                        FIELD_CATEGORY,
                        name,
                        ValidationRule::ReferenceNotFound,
                        format!("分类不存在: {}", name),
                    )));
                    None
                }
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => None,
        };

        match (natural_key, sku, name, price) {
            (Some(natural_key), Some(sku), Some(name), Some(price)) if errors.is_empty() => {
                Ok(CatalogItem {
                    id: None,
                    natural_key,
                    sku,
                    name,
                    price,
                    category,
                    color,
                    cotton_part,
                    quantity,
                })
            }
            _ => Err(errors),
        }
    }

    /// 按名称解析分类（缓存命中与否的结果一致）
    async fn resolve_category(&mut self, name: &str) -> Result<Option<Category>, RowError> {
        if let Some(cached) = self.categories.get(name) {
            return Ok(cached.clone());
        }

        match self.repo.find_category_by_name(name).await {
            Ok(found) => {
                self.categories.insert(name.to_string(), found.clone());
                Ok(found)
            }
            Err(e) => {
                warn!(category = name, error = %e, "分类查询失败");
                Err(RowError::Storage {
                    message: format!("分类查询失败: {}", e),
                })
            }
        }
    }

    fn required_text(
        record: &NormalizedRecord,
        field: &str,
        errors: &mut Vec<RowError>,
    ) -> Option<String> {
        match record.text(field) {
            Some(v) => Some(v.to_string()),
            None => {
                errors.push(Self::missing(field));
                None
            }
        }
    }

    fn missing(field: &str) -> RowError {
        RowError::Field(FieldError::new(
            field,
            "",
            ValidationRule::Required,
            "实体映射需要该字段",
        ))
    }

    /// 逆向映射（导出用）
    pub fn to_record(item: &CatalogItem, row_index: usize) -> NormalizedRecord {
        let mut values = BTreeMap::new();
        values.insert(FIELD_SKU.to_string(), TypedValue::Text(item.sku.clone()));
        values.insert(FIELD_NAME.to_string(), TypedValue::Text(item.name.clone()));
        values.insert(FIELD_PRICE.to_string(), TypedValue::Decimal(item.price));
        if let Some(category) = &item.category {
            values.insert(
                FIELD_CATEGORY.to_string(),
                TypedValue::Text(category.name.clone()),
            );
        }
        if let Some(color) = item.color {
            values.insert(
                FIELD_COLOR.to_string(),
                TypedValue::Enum(color.as_str().to_string()),
            );
        }
        if let Some(cotton_part) = item.cotton_part {
            values.insert(
                FIELD_COTTON_PART.to_string(),
                TypedValue::Integer(cotton_part as i64),
            );
        }
        values.insert(FIELD_QUANTITY.to_string(), TypedValue::Integer(item.quantity));

        NormalizedRecord::new(row_index, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use crate::repository::CatalogRepositoryImpl;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn setup_repo() -> Arc<CatalogRepositoryImpl> {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        Arc::new(CatalogRepositoryImpl::from_connection(Arc::new(Mutex::new(conn))))
    }

    fn record(values: &[(&str, TypedValue)]) -> NormalizedRecord {
        NormalizedRecord::new(
            1,
            values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let mut mapper = FieldMapper::new(setup_repo(), vec!["sku".to_string()]);
        let item = mapper
            .to_entity(&record(&[
                ("sku", TypedValue::Text("A1".into())),
                ("name", TypedValue::Text("Sock".into())),
                ("price", TypedValue::Decimal(5.0)),
            ]))
            .await
            .unwrap();

        assert_eq!(item.quantity, DEFAULT_QUANTITY);
        assert!(item.category.is_none());
        assert!(item.id.is_none());
        assert_eq!(item.natural_key.as_str(), "A1");
    }

    #[tokio::test]
    async fn test_unknown_category_is_reference_not_found() {
        let mut mapper = FieldMapper::new(setup_repo(), vec!["sku".to_string()]);
        let errors = mapper
            .to_entity(&record(&[
                ("sku", TypedValue::Text("A1".into())),
                ("name", TypedValue::Text("Sock".into())),
                ("price", TypedValue::Decimal(5.0)),
                ("category", TypedValue::Text("Nope".into())),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(
            &errors[0],
            RowError::Field(e) if e.rule == ValidationRule::ReferenceNotFound && e.column == "category"
        ));
    }

    #[tokio::test]
    async fn test_composite_natural_key() {
        let mapper = FieldMapper::new(
            setup_repo(),
            vec!["color".to_string(), "cotton_part".to_string()],
        );
        let key = mapper
            .natural_key(&record(&[
                ("color", TypedValue::Enum("BLACK".into())),
                ("cotton_part", TypedValue::Integer(30)),
            ]))
            .unwrap();
        assert_eq!(key.to_string(), "BLACK|30");
    }

    #[tokio::test]
    async fn test_forward_then_inverse_is_stable() {
        let repo = setup_repo();
        repo.create_category("Socks").await.unwrap();
        let mut mapper = FieldMapper::new(repo, vec!["sku".to_string()]);

        let original = record(&[
            ("sku", TypedValue::Text("A1".into())),
            ("name", TypedValue::Text("Sock".into())),
            ("price", TypedValue::Decimal(5.25)),
            ("category", TypedValue::Text("Socks".into())),
            ("color", TypedValue::Enum("PINK".into())),
            ("cotton_part", TypedValue::Integer(80)),
            ("quantity", TypedValue::Integer(4)),
        ]);

        let item = mapper.to_entity(&original).await.unwrap();
        assert_eq!(FieldMapper::to_record(&item, 1), original);
    }
}
