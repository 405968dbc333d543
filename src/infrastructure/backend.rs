//! 生成服务抽象
//!
//! 上层（上传闸门、重试、累加器）只依赖这个 trait，
//! 生产环境使用 [`GeminiClient`](super::GeminiClient)，测试使用脚本化的内存实现。

use async_trait::async_trait;

use crate::config::Config;
use crate::error::ServiceError;
use crate::infrastructure::key_pool::Credential;
use crate::models::asset::RemoteAsset;

/// 采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl SamplingParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一次生成调用的请求
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// 指令文本
    pub instruction: String,
    /// 引用的已上传文件
    pub asset: Option<RemoteAsset>,
    pub sampling: SamplingParams,
}

/// 生成服务
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// 上传文件内容，返回服务端句柄（状态可能仍为 PENDING）
    async fn upload(
        &self,
        credential: &Credential,
        display_name: &str,
        data: Vec<u8>,
    ) -> Result<RemoteAsset, ServiceError>;

    /// 查询文件最新状态
    async fn refresh(
        &self,
        credential: &Credential,
        asset: &RemoteAsset,
    ) -> Result<RemoteAsset, ServiceError>;

    /// 删除远程文件
    async fn delete(&self, credential: &Credential, asset: &RemoteAsset)
        -> Result<(), ServiceError>;

    /// 发起生成调用，返回拼接后的回复文本
    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<String, ServiceError>;
}
