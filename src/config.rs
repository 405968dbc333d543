use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// 程序配置文件
///
/// 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 输入输出 ---
    /// 教材根目录（每个科目一个子目录）
    pub books_dir: PathBuf,
    /// 科目目录后缀过滤（为空则接受所有子目录）
    pub subject_dir_suffix: String,
    /// MCQ 输出目录
    pub output_dir: PathBuf,
    /// 压缩/拆分后的中间文件目录
    pub work_dir: PathBuf,
    /// 是否保留中间文件
    pub keep_intermediate: bool,
    /// 原始响应调试目录（解析失败时写入）
    pub debug_dir: Option<PathBuf>,
    /// 需要跳过的文件（科目 → 文件名列表）
    pub skip_files: HashMap<String, Vec<String>>,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,

    // --- 密钥池 ---
    /// API 密钥文件（每行一个）
    pub api_keys_file: PathBuf,
    /// 合法密钥前缀
    pub key_prefix: String,
    /// 单个密钥的调用次数上限
    pub key_quota: u32,
    /// 科目 → 密钥索引的固定映射
    pub subject_key_mapping: HashMap<String, usize>,

    // --- 生成服务 ---
    pub api_base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    /// 单次 HTTP 请求超时（秒）
    pub request_timeout_secs: u64,

    // --- 批量生成 ---
    /// 每个章节的目标题目数
    pub target_per_unit: usize,
    /// 单次调用最多请求的题目数
    pub max_per_call: usize,
    /// 每个章节的最大调用次数
    pub max_attempts: usize,
    /// 上传文件大小上限（字节）
    pub max_upload_bytes: u64,
    /// 两次生成调用之间的间隔（毫秒）
    pub inter_call_delay_ms: u64,
    /// 过载退避步长（毫秒），第 n 次重试等待 n × 步长
    pub backoff_step_ms: u64,
    /// 过载重试上限
    pub overload_retries: u32,
    /// 文件状态轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 文件状态轮询超时（秒）
    pub poll_timeout_secs: u64,

    // --- 并发与汇总 ---
    /// 同时处理的章节数量上限
    pub max_workers: usize,
    /// 每记录 N 个章节写一次科目合集
    pub snapshot_every: usize,
    /// 每个科目的默认目标题目数
    pub subject_target: usize,
    /// 按科目覆盖目标题目数
    pub subject_targets: HashMap<String, usize>,
    /// 科目达到目标后是否跳过剩余章节
    pub stop_at_subject_target: bool,

    // --- 题目元数据默认值 ---
    pub quality_score: f32,
    pub reviewed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            books_dir: PathBuf::from("books"),
            subject_dir_suffix: "_chapters".to_string(),
            output_dir: PathBuf::from("mcq_output"),
            work_dir: PathBuf::from("mcq_work"),
            keep_intermediate: false,
            debug_dir: None,
            skip_files: HashMap::new(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
            api_keys_file: PathBuf::from("apikeys"),
            key_prefix: "AIzaSy".to_string(),
            key_quota: 1500,
            subject_key_mapping: HashMap::new(),
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            model_name: "gemini-1.5-flash".to_string(),
            temperature: 0.7,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 8192,
            request_timeout_secs: 300,
            target_per_unit: 50,
            max_per_call: 5,
            max_attempts: 10,
            max_upload_bytes: 19 * 1024 * 1024,
            inter_call_delay_ms: 3000,
            backoff_step_ms: 30_000,
            overload_retries: 3,
            poll_interval_ms: 2000,
            poll_timeout_secs: 600,
            max_workers: 8,
            snapshot_every: 3,
            subject_target: 500,
            subject_targets: HashMap::new(),
            stop_at_subject_target: true,
            quality_score: 0.9,
            reviewed: false,
        }
    }
}

impl Config {
    /// 加载配置：可选的 TOML 文件叠加环境变量
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取配置，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(e.to_string()))
    }

    /// 只使用默认值和环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> Self {
        let d = self;
        Self {
            books_dir: env_parse("MCQ_BOOKS_DIR").unwrap_or(d.books_dir),
            output_dir: env_parse("MCQ_OUTPUT_DIR").unwrap_or(d.output_dir),
            work_dir: env_parse("MCQ_WORK_DIR").unwrap_or(d.work_dir),
            debug_dir: env_parse("MCQ_DEBUG_DIR").or(d.debug_dir),
            output_log_file: env_parse("MCQ_OUTPUT_LOG_FILE").unwrap_or(d.output_log_file),
            verbose_logging: env_parse("MCQ_VERBOSE_LOGGING").unwrap_or(d.verbose_logging),
            api_keys_file: env_parse("MCQ_API_KEYS_FILE").unwrap_or(d.api_keys_file),
            key_quota: env_parse("MCQ_KEY_QUOTA").unwrap_or(d.key_quota),
            api_base_url: env_parse("MCQ_API_BASE_URL").unwrap_or(d.api_base_url),
            model_name: env_parse("MCQ_MODEL_NAME").unwrap_or(d.model_name),
            target_per_unit: env_parse("MCQ_TARGET_PER_UNIT").unwrap_or(d.target_per_unit),
            max_per_call: env_parse("MCQ_MAX_PER_CALL").unwrap_or(d.max_per_call),
            max_attempts: env_parse("MCQ_MAX_ATTEMPTS").unwrap_or(d.max_attempts),
            max_upload_bytes: env_parse("MCQ_MAX_UPLOAD_BYTES").unwrap_or(d.max_upload_bytes),
            inter_call_delay_ms: env_parse("MCQ_INTER_CALL_DELAY_MS")
                .unwrap_or(d.inter_call_delay_ms),
            backoff_step_ms: env_parse("MCQ_BACKOFF_STEP_MS").unwrap_or(d.backoff_step_ms),
            max_workers: env_parse("MCQ_MAX_WORKERS").unwrap_or(d.max_workers),
            subject_target: env_parse("MCQ_SUBJECT_TARGET").unwrap_or(d.subject_target),
            ..d
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.max_per_call == 0 {
            return Err(AppError::Config("max_per_call 必须大于 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts 必须大于 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.quality_score) {
            return Err(AppError::Config(format!(
                "quality_score 必须在 [0, 1] 之间: {}",
                self.quality_score
            )));
        }
        Ok(())
    }

    /// 科目目标题目数（有覆盖值时优先）
    pub fn target_for_subject(&self, subject: &str) -> usize {
        self.subject_targets
            .get(subject)
            .copied()
            .unwrap_or(self.subject_target)
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_overlay_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            target_per_unit = 12
            max_per_call = 4
            books_dir = "/data/books"

            [subject_key_mapping]
            chemistry_chapters = 1

            [subject_targets]
            physics_chapters = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.target_per_unit, 12);
        assert_eq!(config.max_per_call, 4);
        assert_eq!(config.books_dir, PathBuf::from("/data/books"));
        assert_eq!(config.subject_key_mapping.get("chemistry_chapters"), Some(&1));
        // 未配置的字段保持默认值
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.key_prefix, "AIzaSy");
        assert_eq!(config.target_for_subject("physics_chapters"), 300);
        assert_eq!(config.target_for_subject("biology_chapters"), 500);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("target_per_unit = \"many\"").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config {
            max_per_call: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
