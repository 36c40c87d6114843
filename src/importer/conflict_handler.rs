// ==========================================
// 商品目录库存后端 - 冲突判定
// ==========================================
// 职责: 文件内重复检测 + 已存在判定（Insert / Update / Skipped）
// 红线: 严格按输入顺序执行；已见主键在提交批次之前同步登记
// ==========================================

use crate::config::import_config::UpdateStrategy;
use crate::domain::catalog::{CatalogItem, ChangeKind, ItemChange, NaturalKey};
use crate::domain::import::{RowError, RowOutcome};
use crate::repository::CatalogRepository;
use std::collections::HashMap;
use tracing::warn;

/// 已存在且不允许更新时的跳过原因
pub const REASON_UPDATES_DISABLED: &str = "exists, updates disabled";

/// 一个待提交批次的判定结果
#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    /// 进入事务批次的变更（按行号升序）
    pub changes: Vec<ItemChange>,
    /// 已确定结果、不进入批次的行（Skipped，或存在性查询失败时的 Failed）
    pub settled: Vec<RowOutcome>,
}

pub struct ConflictResolver {
    allow_updates: bool,
    update_strategy: UpdateStrategy,
    // 业务主键 → 首次出现的行号
    seen: HashMap<NaturalKey, usize>,
    pending: Vec<(usize, CatalogItem)>,
}

impl ConflictResolver {
    pub fn new(allow_updates: bool, update_strategy: UpdateStrategy) -> Self {
        Self {
            allow_updates,
            update_strategy,
            seen: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// 登记本行的业务主键（映射之前调用，映射失败的行同样占用主键）
    ///
    /// # 返回
    /// - Ok(()): 主键首次出现
    /// - Err(RowOutcome::Failed): 文件内重复，引用首次出现的行号
    pub fn claim(&mut self, row_index: usize, natural_key: &NaturalKey) -> Result<(), RowOutcome> {
        match self.seen.get(natural_key) {
            Some(&first_row) if first_row != row_index => Err(RowOutcome::Failed {
                row_index,
                natural_key: Some(natural_key.to_string()),
                errors: vec![RowError::DuplicateKey {
                    natural_key: natural_key.to_string(),
                    first_row,
                }],
            }),
            Some(_) => Ok(()),
            None => {
                self.seen.insert(natural_key.clone(), row_index);
                Ok(())
            }
        }
    }

    /// 登记一个候选实体（未 claim 的主键在此一并登记）
    ///
    /// # 返回
    /// - Ok(()): 进入待判定缓冲
    /// - Err(RowOutcome::Failed): 文件内重复，引用首次出现的行号
    pub fn admit(&mut self, row_index: usize, item: CatalogItem) -> Result<(), RowOutcome> {
        self.claim(row_index, &item.natural_key)?;
        self.pending.push((row_index, item));
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 取出全部待判定候选（取消时使用）
    pub fn take_pending(&mut self) -> Vec<(usize, CatalogItem)> {
        std::mem::take(&mut self.pending)
    }

    /// 对缓冲中的候选做存在性判定（一次 IN 查询）
    ///
    /// 查询失败时整批候选记为 Failed（批次级错误）
    pub async fn resolve_pending(&mut self, repo: &dyn CatalogRepository) -> ClassifiedBatch {
        let pending = self.take_pending();
        if pending.is_empty() {
            return ClassifiedBatch::default();
        }

        let keys: Vec<NaturalKey> = pending.iter().map(|(_, item)| item.natural_key.clone()).collect();
        let existing = match repo.existing_keys(&keys).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(rows = pending.len(), error = %e, "存在性查询失败，整批记为失败");
                let message = e.to_string();
                return ClassifiedBatch {
                    changes: Vec::new(),
                    settled: pending
                        .into_iter()
                        .map(|(row_index, item)| RowOutcome::Failed {
                            row_index,
                            natural_key: Some(item.natural_key.to_string()),
                            errors: vec![RowError::Storage {
                                message: message.clone(),
                            }],
                        })
                        .collect(),
                };
            }
        };

        let mut batch = ClassifiedBatch::default();
        for (row_index, item) in pending {
            if !existing.contains(&item.natural_key) {
                batch.changes.push(ItemChange {
                    row_index,
                    kind: ChangeKind::Insert,
                    item,
                });
            } else if self.allow_updates {
                let kind = match self.update_strategy {
                    UpdateStrategy::Replace => ChangeKind::Replace,
                    UpdateStrategy::AccumulateQuantity => ChangeKind::AccumulateQuantity,
                };
                batch.changes.push(ItemChange {
                    row_index,
                    kind,
                    item,
                });
            } else {
                batch.settled.push(RowOutcome::Skipped {
                    row_index,
                    natural_key: Some(item.natural_key.to_string()),
                    reason: REASON_UPDATES_DISABLED.to_string(),
                });
            }
        }

        batch
    }
}
