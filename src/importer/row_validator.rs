// ==========================================
// 商品目录库存后端 - 行校验器
// ==========================================
// 职责: RawRow + schema → NormalizedRecord 或完整的 FieldError 列表
// 红线: 纯函数，不访问数据库；全部规则都执行，不短路
// ==========================================

use crate::domain::import::{FieldError, NormalizedRecord, RawRow, TypedValue, ValidationRule};
use crate::importer::catalog_importer_trait::DataCleaner as DataCleanerTrait;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::schema::{ColumnBinding, ColumnSpec, FieldKind, ImportSchema};
use regex::Regex;
use std::collections::BTreeMap;

pub struct RowValidator {
    columns: Vec<ColumnSpec>,
    patterns: Vec<Option<Regex>>, // 与 columns 一一对应
    binding: ColumnBinding,
    cleaner: Box<dyn DataCleanerTrait>,
}

impl RowValidator {
    /// 创建校验器（编译 pattern）
    ///
    /// # 参数
    /// - schema: 导入 schema
    /// - binding: 表头绑定结果
    pub fn new(schema: &ImportSchema, binding: ColumnBinding) -> ImportResult<Self> {
        let patterns = schema
            .columns
            .iter()
            .map(|column| {
                column
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| {
                        ImportError::InvalidSchema(format!(
                            "列 {} 的 pattern 无效: {}",
                            column.name, e
                        ))
                    })
            })
            .collect::<ImportResult<Vec<_>>>()?;

        Ok(Self {
            columns: schema.columns.clone(),
            patterns,
            binding,
            cleaner: Box::new(DataCleaner),
        })
    }

    /// 校验一行
    ///
    /// # 返回
    /// - Ok(NormalizedRecord): 全部规则通过
    /// - Err(Vec<FieldError>): 该行全部违规（非空）
    pub fn validate(&self, row: &RawRow) -> Result<NormalizedRecord, Vec<FieldError>> {
        let mut values = BTreeMap::new();
        let mut errors = Vec::new();

        for (i, column) in self.columns.iter().enumerate() {
            let raw = self
                .binding
                .position(i)
                .map(|pos| row.cell(pos))
                .unwrap_or("");

            let value = match self.cleaner.normalize_null(raw) {
                Some(v) => v,
                None => {
                    if column.required {
                        errors.push(FieldError::new(
                            &column.name,
                            raw,
                            ValidationRule::Required,
                            "必填字段为空",
                        ));
                    }
                    continue;
                }
            };

            let before = errors.len();
            self.check_text_rules(column, self.patterns[i].as_ref(), &value, &mut errors);
            let typed = self.coerce(column, &value, &mut errors);

            if errors.len() == before {
                if let Some(typed) = typed {
                    values.insert(column.name.clone(), typed);
                }
            }
        }

        if errors.is_empty() {
            Ok(NormalizedRecord::new(row.index(), values))
        } else {
            Err(errors)
        }
    }

    /// 长度与格式规则（作用于 TRIM 后的原文）
    fn check_text_rules(
        &self,
        column: &ColumnSpec,
        pattern: Option<&Regex>,
        value: &str,
        errors: &mut Vec<FieldError>,
    ) {
        if let Some(max) = column.max_length {
            let len = value.chars().count();
            if len > max {
                errors.push(FieldError::new(
                    &column.name,
                    value,
                    ValidationRule::MaxLength,
                    format!("长度 {} 超过上限 {}", len, max),
                ));
            }
        }

        if let Some(re) = pattern {
            if !re.is_match(value) {
                errors.push(FieldError::new(
                    &column.name,
                    value,
                    ValidationRule::Pattern,
                    format!("不符合格式 {}", re.as_str()),
                ));
            }
        }
    }

    /// 类型转换 + 范围/枚举规则
    fn coerce(
        &self,
        column: &ColumnSpec,
        value: &str,
        errors: &mut Vec<FieldError>,
    ) -> Option<TypedValue> {
        let type_error = |expected: &str| {
            FieldError::new(
                &column.name,
                value,
                ValidationRule::Type,
                format!("无法转换为{}: {}", expected, value),
            )
        };

        let typed = match &column.kind {
            FieldKind::Text => TypedValue::Text(self.cleaner.clean_text(value, false)),
            FieldKind::Integer => match self.cleaner.parse_integer(value) {
                Some(v) => TypedValue::Integer(v),
                None => {
                    errors.push(type_error("整数"));
                    return None;
                }
            },
            FieldKind::Decimal => match self.cleaner.parse_decimal(value) {
                Some(v) => TypedValue::Decimal(v),
                None => {
                    errors.push(type_error("小数"));
                    return None;
                }
            },
            FieldKind::Date { format } => match self.cleaner.parse_date(value, format) {
                Some(d) => TypedValue::Date(d),
                None => {
                    errors.push(type_error(&format!("日期 ({})", format)));
                    return None;
                }
            },
            FieldKind::Enum { allowed } => {
                let upper = self.cleaner.clean_text(value, true);
                if !allowed.contains(&upper) {
                    errors.push(FieldError::new(
                        &column.name,
                        value,
                        ValidationRule::AllowedValues,
                        format!("取值不在允许范围 [{}]", allowed.join(", ")),
                    ));
                    return None;
                }
                TypedValue::Enum(upper)
            }
        };

        let numeric = match typed {
            TypedValue::Integer(v) => Some(v as f64),
            TypedValue::Decimal(v) => Some(v),
            _ => None,
        };
        if let (Some(range), Some(n)) = (column.range, numeric) {
            if !range.contains(n) {
                errors.push(FieldError::new(
                    &column.name,
                    value,
                    ValidationRule::Range,
                    format!(
                        "超出范围 [{}, {}]",
                        range.min.map_or("-∞".to_string(), |v| v.to_string()),
                        range.max.map_or("+∞".to_string(), |v| v.to_string())
                    ),
                ));
                return None;
            }
        }

        Some(typed)
    }
}
