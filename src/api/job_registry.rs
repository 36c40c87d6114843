// ==========================================
// 商品目录库存后端 - 后台导入任务登记表
// ==========================================
// 职责: 保存大文件后台导入的句柄与最终结果，供轮询/取消
// 保留: 已结束任务超过保留时长或数量上限即淘汰（完整报告仍可从导入审计取回）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::import::{ImportProgress, ImportReport, ImportStatus};
use crate::importer::ImportHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// 已结束任务的默认保留时长
pub const DEFAULT_FINISHED_RETENTION: Duration = Duration::from_secs(15 * 60);

/// 同时保留的已结束任务上限
pub const DEFAULT_MAX_FINISHED_JOBS: usize = 64;

/// 后台任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// 轮询结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    /// 运行中的进度快照
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ImportProgress>,
    /// 结束后的完整报告
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ImportReport>,
    /// 失败原因（文件级错误等）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 失败时对应的状态码
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status: Option<u16>,
}

/// 任务失败摘要
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub message: String,
    pub status_code: u16,
}

struct JobEntry {
    handle: Arc<ImportHandle>,
    result: Option<Result<ImportReport, JobFailure>>,
    finished_at: Option<Instant>,
}

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    retention: Duration,
    max_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION, DEFAULT_MAX_FINISHED_JOBS)
    }
}

/// 淘汰过期的已结束任务，并把已结束任务数压到上限以内（先淘汰最早结束的）
fn prune_finished(
    jobs: &mut HashMap<String, JobEntry>,
    now: Instant,
    retention: Duration,
    max_finished: usize,
) {
    let before = jobs.len();
    jobs.retain(|_, entry| match entry.finished_at {
        Some(finished_at) => now.duration_since(finished_at) < retention,
        None => true,
    });

    let mut finished: Vec<(Instant, String)> = jobs
        .iter()
        .filter_map(|(id, entry)| entry.finished_at.map(|t| (t, id.clone())))
        .collect();
    if finished.len() > max_finished {
        finished.sort();
        let excess = finished.len() - max_finished;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }

    let evicted = before - jobs.len();
    if evicted > 0 {
        debug!(evicted, remaining = jobs.len(), "淘汰已结束的后台任务");
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # 参数
    /// - retention: 已结束任务的保留时长
    /// - max_finished: 已结束任务的保留个数上限
    pub fn with_retention(retention: Duration, max_finished: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            retention,
            max_finished,
        }
    }

    /// 当前登记的任务数（含已结束未淘汰的）
    pub fn len(&self) -> ApiResult<usize> {
        Ok(self.jobs()?.len())
    }

    fn jobs(&self) -> ApiResult<MutexGuard<'_, HashMap<String, JobEntry>>> {
        self.jobs
            .lock()
            .map_err(|e| ApiError::InternalError(format!("任务登记表锁获取失败: {}", e)))
    }

    /// 登记任务（任务 ID 即导入 ID）
    pub fn register(&self, handle: Arc<ImportHandle>) -> ApiResult<String> {
        let job_id = handle.import_id().to_string();
        let mut jobs = self.jobs()?;
        prune_finished(&mut jobs, Instant::now(), self.retention, self.max_finished);
        jobs.insert(
            job_id.clone(),
            JobEntry {
                handle,
                result: None,
                finished_at: None,
            },
        );
        Ok(job_id)
    }

    /// 记录任务结束（本任务至少保留到下一次登记/结束）
    pub fn finish(&self, job_id: &str, result: Result<ImportReport, JobFailure>) -> ApiResult<()> {
        let mut jobs = self.jobs()?;
        let now = Instant::now();
        prune_finished(&mut jobs, now, self.retention, self.max_finished);
        match jobs.get_mut(job_id) {
            Some(entry) => {
                entry.result = Some(result);
                entry.finished_at = Some(now);
                Ok(())
            }
            None => Err(ApiError::NotFound(format!("导入任务(id={})不存在", job_id))),
        }
    }

    /// 请求取消（已结束的任务不受影响）
    pub fn cancel(&self, job_id: &str) -> ApiResult<()> {
        let jobs = self.jobs()?;
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| ApiError::NotFound(format!("导入任务(id={})不存在", job_id)))?;
        entry.handle.cancel();
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> ApiResult<JobStatus> {
        let jobs = self.jobs()?;
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| ApiError::NotFound(format!("导入任务(id={})不存在", job_id)))?;

        let status = match &entry.result {
            None => JobStatus {
                job_id: job_id.to_string(),
                state: JobState::Running,
                progress: Some(entry.handle.progress()?),
                report: None,
                error: None,
                error_status: None,
            },
            Some(Ok(report)) => JobStatus {
                job_id: job_id.to_string(),
                state: match report.status {
                    ImportStatus::Completed => JobState::Completed,
                    ImportStatus::Cancelled => JobState::Cancelled,
                },
                progress: None,
                report: Some(report.clone()),
                error: None,
                error_status: None,
            },
            Some(Err(failure)) => JobStatus {
                job_id: job_id.to_string(),
                state: JobState::Failed,
                progress: None,
                report: None,
                error: Some(failure.message.clone()),
                error_status: Some(failure.status_code),
            },
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        assert_eq!(registry.status("nope").unwrap_err().status_code(), 404);
        assert_eq!(registry.cancel("nope").unwrap_err().status_code(), 404);
    }

    #[test]
    fn test_running_then_failed() {
        let registry = JobRegistry::new();
        let job_id = registry.register(ImportHandle::new(None)).unwrap();
        assert_eq!(registry.status(&job_id).unwrap().state, JobState::Running);

        registry
            .finish(
                &job_id,
                Err(JobFailure {
                    message: "空文件".to_string(),
                    status_code: 400,
                }),
            )
            .unwrap();
        let status = registry.status(&job_id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error_status, Some(400));
    }

    fn failure() -> Result<ImportReport, JobFailure> {
        Err(JobFailure {
            message: "空文件".to_string(),
            status_code: 400,
        })
    }

    #[test]
    fn test_finished_jobs_expire_after_retention() {
        let registry = JobRegistry::with_retention(Duration::ZERO, 10);
        let first = registry.register(ImportHandle::new(None)).unwrap();
        registry.finish(&first, failure()).unwrap();
        assert_eq!(registry.status(&first).unwrap().state, JobState::Failed);

        // 下一次登记时淘汰已过期的任务，运行中的任务不受影响
        let running = registry.register(ImportHandle::new(None)).unwrap();
        assert_eq!(registry.status(&first).unwrap_err().status_code(), 404);
        assert_eq!(registry.status(&running).unwrap().state, JobState::Running);
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_finished_jobs_capped_oldest_first() {
        let registry = JobRegistry::with_retention(Duration::from_secs(3600), 2);
        let running = registry.register(ImportHandle::new(None)).unwrap();

        let mut finished = Vec::new();
        for _ in 0..4 {
            let job_id = registry.register(ImportHandle::new(None)).unwrap();
            registry.finish(&job_id, failure()).unwrap();
            finished.push(job_id);
        }
        registry.register(ImportHandle::new(None)).unwrap();

        assert_eq!(registry.status(&finished[0]).unwrap_err().status_code(), 404);
        assert_eq!(registry.status(&finished[1]).unwrap_err().status_code(), 404);
        assert_eq!(registry.status(&finished[2]).unwrap().state, JobState::Failed);
        assert_eq!(registry.status(&finished[3]).unwrap().state, JobState::Failed);
        assert_eq!(registry.status(&running).unwrap().state, JobState::Running);
        assert_eq!(registry.len().unwrap(), 4);
    }
}
