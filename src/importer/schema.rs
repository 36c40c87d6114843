// ==========================================
// 商品目录库存后端 - 导入 Schema
// ==========================================
// 职责: 声明列、校验规则、身份键、分隔符/引号约定
// 红线: schema 无效时在读取输入之前失败（InvalidSchema）
// ==========================================

use crate::domain::types::ItemColor;
use crate::importer::error::{ImportError, ImportResult, MalformedInputError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 实体映射依赖的列（schema 必须声明）
pub const MAPPER_COLUMNS: [&str; 3] = ["sku", "name", "price"];

// ==========================================
// FieldKind - 列类型
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    /// chrono 格式串，如 `%Y-%m-%d`
    Date { format: String },
    /// 允许值（大写）
    Enum { allowed: Vec<String> },
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Date { .. } => "date",
            FieldKind::Enum { .. } => "enum",
        }
    }
}

/// 数值闭区间（任一端可缺省）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

// ==========================================
// ColumnSpec - 列声明
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
    pub kind: FieldKind,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub range: Option<NumericRange>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            required: false,
            kind,
            pattern: None,
            range: None,
            max_length: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub fn date(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Date {
                format: format.into(),
            },
        )
    }

    pub fn enumeration(name: impl Into<String>, allowed: Vec<String>) -> Self {
        let allowed = allowed.into_iter().map(|v| v.to_uppercase()).collect();
        Self::new(name, FieldKind::Enum { allowed })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.range = Some(NumericRange { min, max });
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// 表头名是否匹配本列（TRIM + 忽略大小写，含别名）
    pub fn matches_header(&self, header: &str) -> bool {
        let header = header.trim();
        self.name.eq_ignore_ascii_case(header)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(header))
    }
}

// ==========================================
// CsvDialect - 分隔符 / 引号约定
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvDialect {
    pub delimiter: u8,
    /// None 表示不识别引号
    pub quote: Option<u8>,
    pub has_header: bool,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: Some(b'"'),
            has_header: true,
        }
    }
}

impl CsvDialect {
    pub fn csv_reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(false) // 表头由管道自行识别（需跳过空白行）
            .flexible(true); // 允许行长度不一致
        match self.quote {
            Some(q) => builder.quote(q).quoting(true),
            None => builder.quoting(false),
        };
        builder
    }

    pub fn csv_writer_builder(&self) -> csv::WriterBuilder {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(self.delimiter).has_headers(false);
        match self.quote {
            Some(q) => builder.quote(q).quote_style(csv::QuoteStyle::Necessary),
            None => builder.quote_style(csv::QuoteStyle::Never),
        };
        builder
    }
}

// ==========================================
// ColumnBinding - schema 列 → 源文件位置
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    positions: Vec<Option<usize>>, // 与 schema.columns 一一对应
}

impl ColumnBinding {
    pub fn position(&self, column_index: usize) -> Option<usize> {
        self.positions.get(column_index).copied().flatten()
    }
}

// ==========================================
// ImportSchema
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSchema {
    pub columns: Vec<ColumnSpec>,
    /// 身份键列名（一个或多个）
    pub identity_key: Vec<String>,
    #[serde(default)]
    pub dialect: CsvDialect,
}

impl ImportSchema {
    /// 商品目录默认 schema: 仅 sku/name/price 必填，身份键为 sku
    pub fn catalog_default() -> Self {
        Self {
            columns: vec![
                ColumnSpec::text("sku")
                    .required()
                    .pattern(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$")
                    .max_length(64),
                ColumnSpec::text("name").required().max_length(255),
                ColumnSpec::decimal("price")
                    .required()
                    .range(Some(0.0), None),
                ColumnSpec::text("category").max_length(100),
                ColumnSpec::enumeration("color", ItemColor::allowed_values()),
                ColumnSpec::integer("cotton_part")
                    .alias("cottonPart")
                    .alias("cotton part")
                    .range(Some(0.0), Some(100.0)),
                ColumnSpec::integer("quantity")
                    .alias("qty")
                    .range(Some(0.0), None),
            ],
            identity_key: vec!["sku".to_string()],
            dialect: CsvDialect::default(),
        }
    }

    pub fn with_identity_key<S: Into<String>>(mut self, columns: Vec<S>) -> Self {
        self.identity_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dialect(mut self, dialect: CsvDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// 校验 schema 自身
    ///
    /// # 规则
    /// - 列名不可重复
    /// - 身份键非空，且每个身份键列存在并为必填
    /// - 必须声明实体映射依赖的列
    /// - pattern 必须能编译
    pub fn validate(&self) -> ImportResult<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.to_lowercase()) {
                return Err(ImportError::InvalidSchema(format!("列名重复: {}", column.name)));
            }
            if let Some(pattern) = &column.pattern {
                Regex::new(pattern).map_err(|e| {
                    ImportError::InvalidSchema(format!("列 {} 的 pattern 无效: {}", column.name, e))
                })?;
            }
        }

        if self.identity_key.is_empty() {
            return Err(ImportError::InvalidSchema("身份键为空".to_string()));
        }
        for key in &self.identity_key {
            match self.columns.iter().find(|c| &c.name == key) {
                None => {
                    return Err(ImportError::InvalidSchema(format!("身份键列不存在: {}", key)))
                }
                Some(column) if !column.required => {
                    return Err(ImportError::InvalidSchema(format!(
                        "身份键列必须为必填: {}",
                        key
                    )))
                }
                Some(_) => {}
            }
        }

        for name in MAPPER_COLUMNS {
            if self.column_index(name).is_none() {
                return Err(ImportError::InvalidSchema(format!("缺少实体映射所需列: {}", name)));
            }
        }

        Ok(())
    }

    /// 按表头建立列绑定
    ///
    /// # 返回
    /// - Err(MissingColumn): 表头缺少必填列
    pub fn bind_header(&self, header: &[String]) -> Result<ColumnBinding, MalformedInputError> {
        let mut positions = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let position = header.iter().position(|h| column.matches_header(h));
            if position.is_none() && column.required {
                return Err(MalformedInputError::MissingColumn {
                    column: column.name.clone(),
                });
            }
            positions.push(position);
        }
        Ok(ColumnBinding { positions })
    }

    /// 无表头时按 schema 顺序位置绑定
    pub fn bind_positional(&self) -> ColumnBinding {
        ColumnBinding {
            positions: (0..self.columns.len()).map(Some).collect(),
        }
    }
}
