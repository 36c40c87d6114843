// ==========================================
// 商品目录库存后端 - 数据清洗器实现
// ==========================================
// 职责: TRIM / UPPER / NULL 标准化 / 基础类型转换
// 红线: 只做单元格级转换，不判定规则是否违反
// ==========================================

use crate::importer::catalog_importer_trait::DataCleaner as DataCleanerTrait;
use chrono::NaiveDate;

pub struct DataCleaner;

impl DataCleanerTrait for DataCleaner {
    fn clean_text(&self, value: &str, uppercase: bool) -> String {
        let trimmed = value.trim();
        if uppercase {
            trimmed.to_uppercase()
        } else {
            trimmed.to_string()
        }
    }

    fn normalize_null(&self, value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn is_blank_row(&self, cells: &[String]) -> bool {
        cells.iter().all(|c| c.trim().is_empty())
    }

    fn parse_integer(&self, value: &str) -> Option<i64> {
        value.trim().parse::<i64>().ok()
    }

    fn parse_decimal(&self, value: &str) -> Option<f64> {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }

    fn parse_date(&self, value: &str, format: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(value.trim(), format).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_basic() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.clean_text("  hello  ", false), "hello");
        assert_eq!(cleaner.clean_text("  hello  ", true), "HELLO");
    }

    #[test]
    fn test_normalize_null() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.normalize_null("   "), None);
        assert_eq!(cleaner.normalize_null(" A1 "), Some("A1".to_string()));
    }

    #[test]
    fn test_parse_decimal_rejects_non_finite() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_decimal("5.00"), Some(5.0));
        assert_eq!(cleaner.parse_decimal("abc"), None);
        assert_eq!(cleaner.parse_decimal("NaN"), None);
        assert_eq!(cleaner.parse_decimal("inf"), None);
    }

    #[test]
    fn test_parse_date_with_format() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.parse_date("2024-03-01", "%Y-%m-%d"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(cleaner.parse_date("20240301", "%Y-%m-%d"), None);
    }

    #[test]
    fn test_blank_row() {
        let cleaner = DataCleaner;
        assert!(cleaner.is_blank_row(&[" ".to_string(), String::new()]));
        assert!(!cleaner.is_blank_row(&["A1".to_string()]));
    }
}
