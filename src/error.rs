use thiserror::Error;

use crate::models::asset::AssetState;

/// 应用程序错误类型
///
/// 错误按"能在哪一层被恢复"划分：
/// - `GenerationFailed` / `UnrecoverableFormat`：单次尝试失败，由累加器吸收
/// - `AssetRejected`：单个章节失败，跳过该章节
/// - `PoolExhausted`：所有密钥不可用，整个运行停止调度
#[derive(Debug, Error)]
pub enum AppError {
    /// 密钥池中已没有可用密钥
    #[error("密钥池已耗尽: 没有可用的 API 密钥")]
    PoolExhausted,

    /// 远程文件处理失败
    #[error("远程文件不可用 (状态: {state})")]
    AssetRejected { state: AssetState },

    /// 重试预算用尽后的生成失败
    #[error("生成调用失败: {cause}")]
    GenerationFailed { cause: String },

    /// 响应中完全找不到数组结构
    #[error("无法识别的响应格式: {excerpt}")]
    UnrecoverableFormat { excerpt: String },

    /// 外部服务错误（尚未经过重试升级）
    #[error("服务调用错误: {0}")]
    Service(#[from] ServiceError),

    /// PDF 处理错误
    #[error("PDF 处理失败 ({path}): {message}")]
    Document { path: String, message: String },

    /// 文件操作错误
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

/// 外部生成服务返回的错误
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// 服务过载（500/502/503/504 或超时），可以退避后重试
    #[error("服务过载 (状态码: {status:?}): {message}")]
    Overloaded { status: Option<u16>, message: String },

    /// 当前密钥配额耗尽（429）
    #[error("密钥配额耗尽: {message}")]
    QuotaExceeded { message: String },

    /// 请求被拒绝（4xx）
    #[error("请求被拒绝 (状态码: {status}): {message}")]
    Rejected { status: u16, message: String },

    /// 网络层错误
    #[error("网络请求失败: {message}")]
    Transport { message: String },

    /// 返回内容结构不符合预期
    #[error("响应结构无效: {message}")]
    InvalidResponse { message: String },
}

impl ServiceError {
    /// 是否为可退避重试的过载信号
    pub fn is_overload(&self) -> bool {
        matches!(self, ServiceError::Overloaded { .. })
    }

    /// 是否为配额耗尽
    pub fn is_quota(&self) -> bool {
        matches!(self, ServiceError::QuotaExceeded { .. })
    }

    /// 根据 HTTP 状态码分类
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => ServiceError::QuotaExceeded { message },
            500 | 502 | 503 | 504 => ServiceError::Overloaded {
                status: Some(status),
                message,
            },
            _ => ServiceError::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Overloaded {
                status: None,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            ServiceError::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            ServiceError::InvalidResponse {
                message: err.to_string(),
            }
        } else {
            ServiceError::Transport {
                message: err.to_string(),
            }
        }
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件操作错误
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// 创建 PDF 处理错误
    pub fn document(path: impl AsRef<std::path::Path>, message: impl std::fmt::Display) -> Self {
        AppError::Document {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// 创建生成失败错误
    pub fn generation_failed(cause: impl std::fmt::Display) -> Self {
        AppError::GenerationFailed {
            cause: cause.to_string(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ServiceError::from_status(503, "busy").is_overload());
        assert!(ServiceError::from_status(500, "internal").is_overload());
        assert!(ServiceError::from_status(429, "quota").is_quota());
        assert!(matches!(
            ServiceError::from_status(403, "denied"),
            ServiceError::Rejected { status: 403, .. }
        ));
    }

    #[test]
    fn test_service_error_converts_into_app_error() {
        let err: AppError = ServiceError::from_status(503, "busy").into();
        assert!(matches!(err, AppError::Service(ServiceError::Overloaded { .. })));
    }
}
