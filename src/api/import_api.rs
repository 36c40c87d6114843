// ==========================================
// 商品目录库存后端 - 导入/导出 API
// ==========================================
// 职责: 封装批量导入、后台任务、导出与审计查询
// 模式: 小文件同步返回报告；超过阈值的上传转后台任务，可轮询/取消
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::job_registry::{JobFailure, JobRegistry, JobStatus};
use crate::config::{ConfigManager, ImportConfig, ImportConfigReader};
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::catalog::ItemQuery;
use crate::domain::import::{ImportAuditRecord, ImportReport};
use crate::exporter::{export_file_name, CsvExporter};
use crate::importer::{
    source_from_bytes, CatalogImporter, CatalogImporterImpl, ImportHandle, ImportSchema,
};
use crate::repository::{
    CatalogRepository, CatalogRepositoryImpl, ImportAuditRepository, ImportAuditRepositoryImpl,
};
use chrono::Local;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

/// 一次上传（文件名用于识别格式与写入报告）
#[derive(Debug, Clone)]
pub struct ImportUpload {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImportUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            bytes,
        }
    }
}

/// 后台任务凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
    pub file_name: Option<String>,
    pub size_bytes: u64,
}

/// 提交结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportResponse {
    /// 同步完成（200 / 207）
    Completed(ImportReport),
    /// 已转后台任务（202）
    Accepted(JobTicket),
}

impl ImportResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            ImportResponse::Completed(report) => report.status_code(),
            ImportResponse::Accepted(_) => 202,
        }
    }
}

/// 导入API
pub struct ImportApi {
    repo: Arc<dyn CatalogRepository>,
    audit_repo: Arc<dyn ImportAuditRepository>,
    config_reader: Arc<dyn ImportConfigReader>,
    schema: ImportSchema,
    jobs: JobRegistry,
}

impl ImportApi {
    /// 创建新的ImportApi实例（共享一个数据库连接）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(format!("无法打开数据库: {}", e)))?;
        ensure_schema(&conn)
            .map_err(|e| ApiError::DatabaseError(format!("数据库初始化失败: {}", e)))?;
        let conn = Arc::new(Mutex::new(conn));

        Ok(Self::from_parts(
            Arc::new(CatalogRepositoryImpl::from_connection(conn.clone())),
            Arc::new(ImportAuditRepositoryImpl::from_connection(conn.clone())),
            Arc::new(ConfigManager::from_connection(conn)),
            ImportSchema::catalog_default(),
        ))
    }

    /// 由已构造的组件组装（测试中可注入故障仓储）
    pub fn from_parts(
        repo: Arc<dyn CatalogRepository>,
        audit_repo: Arc<dyn ImportAuditRepository>,
        config_reader: Arc<dyn ImportConfigReader>,
        schema: ImportSchema,
    ) -> Self {
        Self {
            repo,
            audit_repo,
            config_reader,
            schema,
            jobs: JobRegistry::new(),
        }
    }

    pub fn schema(&self) -> &ImportSchema {
        &self.schema
    }

    /// 读取当前导入配置
    pub async fn import_config(&self) -> ApiResult<ImportConfig> {
        Ok(self.config_reader.load_import_config().await?)
    }

    fn create_importer(&self, config: ImportConfig) -> CatalogImporterImpl {
        CatalogImporterImpl::new(self.repo.clone(), self.schema.clone(), config)
            .with_audit_repo(self.audit_repo.clone())
    }

    /// 提交一次上传
    ///
    /// # 返回
    /// - Ok(Completed): 小于 async_threshold_bytes，同步完成
    /// - Ok(Accepted): 已转后台任务，用 poll 查询
    /// - Err(MalformedInput): 文件级错误（同步模式）
    #[instrument(skip(self, upload), fields(file_name = ?upload.file_name, size = upload.bytes.len()))]
    pub async fn submit(&self, upload: ImportUpload) -> ApiResult<ImportResponse> {
        let config = self.import_config().await?;
        let size_bytes = upload.bytes.len() as u64;

        if size_bytes < config.async_threshold_bytes {
            let report = self.run_import(config, upload).await?;
            return Ok(ImportResponse::Completed(report));
        }

        let file_name = upload.file_name.clone();
        let handle = ImportHandle::new(file_name.clone());
        let job_id = self.jobs.register(handle.clone())?;
        let importer = self.create_importer(config);
        let jobs = self.jobs.clone();
        let task_job_id = job_id.clone();

        tokio::spawn(async move {
            let result = async {
                let file_name = upload.file_name.clone();
                let source = tokio::task::spawn_blocking(move || {
                    source_from_bytes(upload.file_name.as_deref(), upload.bytes)
                })
                .await
                .map_err(|e| ApiError::InternalError(e.to_string()))?
                .map_err(|e| ApiError::MalformedInput(e.to_string()))?;
                Ok::<_, ApiError>(importer.import_source(source, file_name, handle).await?)
            }
            .await
            .map_err(|e| JobFailure {
                message: e.to_string(),
                status_code: e.status_code(),
            });

            if let Err(failure) = &result {
                warn!(job_id = %task_job_id, error = %failure.message, "后台导入失败");
            }
            if let Err(e) = jobs.finish(&task_job_id, result) {
                warn!(job_id = %task_job_id, error = %e, "后台导入结果登记失败");
            }
        });

        info!(job_id = %job_id, size_bytes, "大文件导入已转后台任务");
        Ok(ImportResponse::Accepted(JobTicket {
            job_id,
            file_name,
            size_bytes,
        }))
    }

    /// 同步执行一次导入
    async fn run_import(&self, config: ImportConfig, upload: ImportUpload) -> ApiResult<ImportReport> {
        let file_name = upload.file_name.clone();
        let source = tokio::task::spawn_blocking(move || {
            source_from_bytes(upload.file_name.as_deref(), upload.bytes)
        })
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .map_err(|e| ApiError::MalformedInput(e.to_string()))?;

        let importer = self.create_importer(config);
        let handle = ImportHandle::new(file_name.clone());
        Ok(importer.import_source(source, file_name, handle).await?)
    }

    /// 并发导入多个独立文件（各自独立的结果）
    pub async fn import_many(&self, uploads: Vec<ImportUpload>) -> Vec<ApiResult<ImportReport>> {
        info!(count = uploads.len(), "开始批量导入文件");
        let config = match self.import_config().await {
            Ok(config) => config,
            Err(e) => {
                let message = e.to_string();
                return uploads
                    .iter()
                    .map(|_| Err(ApiError::ConfigError(message.clone())))
                    .collect();
            }
        };

        join_all(
            uploads
                .into_iter()
                .map(|upload| self.run_import(config.clone(), upload)),
        )
        .await
    }

    /// 查询后台任务
    pub fn poll(&self, job_id: &str) -> ApiResult<JobStatus> {
        self.jobs.status(job_id)
    }

    /// 取消后台任务（正在提交的批次会完成）
    pub fn cancel(&self, job_id: &str) -> ApiResult<()> {
        info!(job_id, "请求取消导入任务");
        self.jobs.cancel(job_id)
    }

    /// 导出匹配条件的商品
    ///
    /// # 返回
    /// - Ok(usize): 导出的数据行数
    pub async fn export<W: Write + Send>(&self, query: &ItemQuery, writer: W) -> ApiResult<usize> {
        let exporter = CsvExporter::new(self.repo.clone(), self.schema.clone());
        Ok(exporter.export(query, writer).await?)
    }

    /// 导出文件名提示
    pub fn export_file_name(&self) -> String {
        export_file_name(Local::now())
    }

    /// 最近的导入审计记录
    pub async fn recent_audits(&self, limit: usize) -> ApiResult<Vec<ImportAuditRecord>> {
        Ok(self.audit_repo.recent_audits(limit.clamp(1, 100)).await?)
    }

    /// 按导入 ID 取回完整报告
    pub async fn audit_report(&self, import_id: &str) -> ApiResult<ImportReport> {
        self.audit_repo
            .get_audit_report(import_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("导入记录(id={})不存在", import_id)))
    }
}
