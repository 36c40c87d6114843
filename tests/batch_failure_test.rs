// ==========================================
// 批次失败集成测试
// ==========================================
// 测试目标: 批次原子性、失败批次不影响其他批次、逐行重试降级
// ==========================================

mod test_helpers;

use catalog_inventory::config::ImportConfig;
use catalog_inventory::domain::{RowError, RowOutcome};
use catalog_inventory::importer::CatalogImporter;
use catalog_inventory::repository::CatalogRepository;
use std::sync::Arc;
use test_helpers::{
    config_with_batch, create_importer, create_repo, create_test_db, csv_cursor, key, simple_csv,
    ScriptedRepository,
};

fn five_rows() -> String {
    simple_csv(&[
        ("A1", "Sock", "1"),
        ("B2", "Hat", "2"),
        ("C3", "Scarf", "3"),
        ("D4", "Glove", "4"),
        ("E5", "Belt", "5"),
    ])
}

#[tokio::test]
async fn test_failed_batch_rolls_back_only_its_rows() {
    let (_temp, db_path) = create_test_db().unwrap();
    let real = create_repo(&db_path);
    let scripted = Arc::new(ScriptedRepository::new(real.clone()).fail_call(2));
    let importer = create_importer(scripted.clone(), config_with_batch(2));

    let report = importer
        .import_reader(csv_cursor(&five_rows()), None)
        .await
        .unwrap();

    assert_eq!(scripted.commit_calls(), 3);
    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.counts.failed, 2);
    assert_eq!(report.status_code(), 207);

    for row in [1, 2, 5] {
        assert!(matches!(report.outcome(row), Some(RowOutcome::Inserted { .. })));
    }
    for row in [3, 4] {
        match report.outcome(row).unwrap() {
            RowOutcome::Failed { errors, .. } => {
                assert!(matches!(&errors[0], RowError::Storage { .. }))
            }
            other => panic!("row {} unexpected outcome: {:?}", row, other),
        }
    }

    // 失败批次无任何持久化残留
    assert_eq!(real.count_items().await.unwrap(), 3);
    assert!(real.find_by_natural_key(&key("C3")).await.unwrap().is_none());
    assert!(real.find_by_natural_key(&key("D4")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_individual_retry_isolates_bad_row() {
    let (_temp, db_path) = create_test_db().unwrap();
    let real = create_repo(&db_path);
    let scripted = Arc::new(ScriptedRepository::new(real.clone()).poison_key("D4"));
    let config = ImportConfig {
        retry_individually_on_batch_failure: true,
        ..config_with_batch(2)
    };
    let importer = create_importer(scripted.clone(), config);

    let report = importer
        .import_reader(csv_cursor(&five_rows()), None)
        .await
        .unwrap();

    // 3 个批次 + 第二批失败后的 2 次逐行提交
    assert_eq!(scripted.commit_calls(), 5);
    assert_eq!(report.counts.inserted, 4);
    assert_eq!(report.counts.failed, 1);
    assert!(matches!(
        report.outcome(4),
        Some(RowOutcome::Failed { natural_key: Some(k), .. }) if k == "D4"
    ));
    assert_eq!(real.count_items().await.unwrap(), 4);
}

#[tokio::test]
async fn test_without_retry_whole_batch_fails() {
    let (_temp, db_path) = create_test_db().unwrap();
    let real = create_repo(&db_path);
    let scripted = Arc::new(ScriptedRepository::new(real.clone()).poison_key("D4"));
    let importer = create_importer(scripted, config_with_batch(2));

    let report = importer
        .import_reader(csv_cursor(&five_rows()), None)
        .await
        .unwrap();

    assert_eq!(report.counts.failed, 2);
    assert!(matches!(report.outcome(3), Some(RowOutcome::Failed { .. })));
    assert_eq!(real.count_items().await.unwrap(), 3);
}

#[tokio::test]
async fn test_outcomes_sorted_across_batches() {
    let (_temp, db_path) = create_test_db().unwrap();
    let importer = create_importer(create_repo(&db_path), config_with_batch(2));

    // 第 2 行校验失败，不进入批次，但结果仍按行号排列
    let text = simple_csv(&[
        ("A1", "Sock", "1"),
        ("B2", "Hat", "x"),
        ("C3", "Scarf", "3"),
        ("D4", "Glove", "4"),
    ]);
    let report = importer.import_reader(csv_cursor(&text), None).await.unwrap();

    let rows: Vec<usize> = report.outcomes.iter().map(RowOutcome::row_index).collect();
    assert_eq!(rows, vec![1, 2, 3, 4]);
    assert_eq!(report.counts.total, 4);
}
