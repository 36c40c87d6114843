// ==========================================
// 商品目录库存后端 - API 层
// ==========================================
// 职责: 提供导入/导出业务接口，供外部 Web 层或 CLI 调用
// ==========================================

pub mod error;
pub mod import_api;
pub mod job_registry;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::{ImportApi, ImportResponse, ImportUpload, JobTicket};
pub use job_registry::{JobRegistry, JobState, JobStatus};
