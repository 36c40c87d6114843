// ==========================================
// 导出集成测试
// ==========================================
// 测试目标: 导出 → 重新导入无变化、过滤与排序
// ==========================================

mod test_helpers;

use catalog_inventory::config::ImportConfig;
use catalog_inventory::domain::{ItemColor, ItemQuery, RowOutcome, SortField, SortOrder};
use catalog_inventory::exporter::CsvExporter;
use catalog_inventory::importer::{CatalogImporter, ImportSchema};
use catalog_inventory::repository::{CatalogRepository, CatalogRepositoryImpl};
use std::sync::Arc;
use test_helpers::{create_importer, create_repo, create_test_db, csv_cursor, key};

const SEED: &str = "sku,name,price,category,color,cotton_part,quantity\n\
A1,Sock,5.5,Socks,BLACK,80,10\n\
B2,\"Hat, wool\",12,Hats,RED,,3\n\
C3,Scarf,7.25,,WHITE,30,0\n\
D4,Plain Tee,9,,,,\n";

async fn seeded_repo(db_path: &str) -> Arc<CatalogRepositoryImpl> {
    let repo = create_repo(db_path);
    repo.create_category("Socks").await.unwrap();
    repo.create_category("Hats").await.unwrap();

    let report = create_importer(repo.clone(), ImportConfig::default())
        .import_reader(csv_cursor(SEED), None)
        .await
        .unwrap();
    assert_eq!(report.counts.inserted, 4, "seed failed: {:?}", report.outcomes);
    repo
}

async fn export_text(repo: Arc<CatalogRepositoryImpl>, query: &ItemQuery) -> (usize, String) {
    let exporter = CsvExporter::new(repo, ImportSchema::catalog_default());
    let mut buffer: Vec<u8> = Vec::new();
    let exported = exporter.export(query, &mut buffer).await.unwrap();
    (exported, String::from_utf8(buffer).unwrap())
}

#[tokio::test]
async fn test_export_then_reimport_changes_nothing() {
    let (_temp, db_path) = create_test_db().unwrap();
    let repo = seeded_repo(&db_path).await;

    let mut before = Vec::new();
    for sku in ["A1", "B2", "C3", "D4"] {
        before.push(repo.find_by_natural_key(&key(sku)).await.unwrap().unwrap());
    }

    let (exported, text) = export_text(repo.clone(), &ItemQuery::default()).await;
    assert_eq!(exported, 4);

    let report = create_importer(repo.clone(), ImportConfig::default())
        .import_reader(csv_cursor(&text), Some("export.csv".to_string()))
        .await
        .unwrap();

    assert_eq!(report.counts.total, 4);
    assert_eq!(report.counts.updated, 4);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o, RowOutcome::Updated { .. })));

    for item in before {
        let after = repo.find_by_natural_key(&item.natural_key).await.unwrap().unwrap();
        assert!(item.same_attributes(&after), "{:?} != {:?}", item, after);
    }
    assert_eq!(repo.count_items().await.unwrap(), 4);
}

#[tokio::test]
async fn test_export_header_and_quoting() {
    let (_temp, db_path) = create_test_db().unwrap();
    let repo = seeded_repo(&db_path).await;

    let (_, text) = export_text(repo, &ItemQuery::default()).await;
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("sku,name,price,category,color,cotton_part,quantity")
    );
    assert_eq!(lines.next(), Some("A1,Sock,5.5,Socks,BLACK,80,10"));
    assert_eq!(lines.next(), Some("B2,\"Hat, wool\",12,Hats,RED,,3"));
}

#[tokio::test]
async fn test_export_filters() {
    let (_temp, db_path) = create_test_db().unwrap();
    let repo = seeded_repo(&db_path).await;

    let by_category = ItemQuery {
        category: Some("Hats".to_string()),
        ..ItemQuery::default()
    };
    let (count, text) = export_text(repo.clone(), &by_category).await;
    assert_eq!(count, 1);
    assert!(text.contains("B2,"));

    let by_color = ItemQuery {
        color: Some(ItemColor::White),
        ..ItemQuery::default()
    };
    assert_eq!(export_text(repo.clone(), &by_color).await.0, 1);

    let by_cotton = ItemQuery {
        cotton_part_min: Some(50),
        cotton_part_max: Some(100),
        ..ItemQuery::default()
    };
    let (count, text) = export_text(repo, &by_cotton).await;
    assert_eq!(count, 1);
    assert!(text.contains("A1,"));
}

#[tokio::test]
async fn test_export_sorting() {
    let (_temp, db_path) = create_test_db().unwrap();
    let repo = seeded_repo(&db_path).await;

    let query = ItemQuery {
        sort_by: SortField::Price,
        sort_order: SortOrder::Desc,
        ..ItemQuery::default()
    };
    let (_, text) = export_text(repo, &query).await;
    let skus: Vec<&str> = text
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(skus, vec!["B2", "D4", "C3", "A1"]);
}

#[tokio::test]
async fn test_export_empty_catalog_writes_header_only() {
    let (_temp, db_path) = create_test_db().unwrap();
    let repo = create_repo(&db_path);

    let (count, text) = export_text(repo, &ItemQuery::default()).await;
    assert_eq!(count, 0);
    assert_eq!(text.trim_end(), "sku,name,price,category,color,cotton_part,quantity");
}
