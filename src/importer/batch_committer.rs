// ==========================================
// 商品目录库存后端 - 批次提交器
// ==========================================
// 职责: 每批一个事务提交，产出逐行结果
// 失败: 整批回滚，批内每行 Failed（可选逐行重试降级）
// ==========================================

use crate::domain::catalog::{ChangeKind, ItemChange};
use crate::domain::import::{RowError, RowOutcome};
use crate::repository::CatalogRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct BatchCommitter {
    repo: Arc<dyn CatalogRepository>,
    timeout: Duration,
    retry_individually: bool,
    batches_committed: usize,
}

/// 提交成功时的行结果
fn committed_outcome(change: &ItemChange) -> RowOutcome {
    let natural_key = change.item.natural_key.to_string();
    match change.kind {
        ChangeKind::Insert => RowOutcome::Inserted {
            row_index: change.row_index,
            natural_key,
        },
        ChangeKind::Replace | ChangeKind::AccumulateQuantity => RowOutcome::Updated {
            row_index: change.row_index,
            natural_key,
        },
    }
}

fn failed_outcome(change: &ItemChange, message: &str) -> RowOutcome {
    RowOutcome::Failed {
        row_index: change.row_index,
        natural_key: Some(change.item.natural_key.to_string()),
        errors: vec![RowError::Storage {
            message: message.to_string(),
        }],
    }
}

impl BatchCommitter {
    /// # 参数
    /// - timeout: 单批次提交时限
    /// - retry_individually: 批次失败后是否逐行重试
    pub fn new(repo: Arc<dyn CatalogRepository>, timeout: Duration, retry_individually: bool) -> Self {
        Self {
            repo,
            timeout,
            retry_individually,
            batches_committed: 0,
        }
    }

    /// 已提交的批次数（含失败批次）
    pub fn batches_committed(&self) -> usize {
        self.batches_committed
    }

    /// 提交一个批次
    ///
    /// # 返回
    /// - 批内每行恰好一个结果（与 changes 顺序一致）
    pub async fn commit(&mut self, changes: Vec<ItemChange>) -> Vec<RowOutcome> {
        if changes.is_empty() {
            return Vec::new();
        }
        self.batches_committed += 1;
        let batch_no = self.batches_committed;
        let first_row = changes.first().map(|c| c.row_index);
        let last_row = changes.last().map(|c| c.row_index);

        match self.repo.commit_batch(changes.clone(), self.timeout).await {
            Ok(_) => {
                debug!(batch_no, rows = changes.len(), ?first_row, ?last_row, "批次提交成功");
                changes.iter().map(committed_outcome).collect()
            }
            Err(e) => {
                warn!(
                    batch_no,
                    rows = changes.len(),
                    ?first_row,
                    ?last_row,
                    error = %e,
                    "批次提交失败，事务已回滚"
                );
                if self.retry_individually {
                    self.retry_each(batch_no, changes).await
                } else {
                    let message = e.to_string();
                    changes.iter().map(|c| failed_outcome(c, &message)).collect()
                }
            }
        }
    }

    /// 降级: 批内每行单独一个事务
    async fn retry_each(&self, batch_no: usize, changes: Vec<ItemChange>) -> Vec<RowOutcome> {
        let mut outcomes = Vec::with_capacity(changes.len());
        let mut recovered = 0usize;

        for change in changes {
            match self.repo.commit_batch(vec![change.clone()], self.timeout).await {
                Ok(_) => {
                    recovered += 1;
                    outcomes.push(committed_outcome(&change));
                }
                Err(e) => {
                    debug!(batch_no, row_index = change.row_index, error = %e, "逐行重试失败");
                    outcomes.push(failed_outcome(&change, &e.to_string()));
                }
            }
        }

        info!(batch_no, recovered, total = outcomes.len(), "逐行重试完成");
        outcomes
    }
}
