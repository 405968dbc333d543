//! Gemini REST 客户端
//!
//! ## 技术栈
//! - 使用 `reqwest` 直接调用 Gemini v1beta 接口
//! - 文件上传走 resumable 两步协议（start → upload, finalize）
//! - 密钥通过 `x-goog-api-key` 请求头传递

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::error::ServiceError;
use crate::infrastructure::backend::{GenerationRequest, GenerativeBackend};
use crate::infrastructure::key_pool::Credential;
use crate::models::asset::{AssetState, RemoteAsset};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const PDF_MIME: &str = "application/pdf";

/// Gemini 客户端
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model_name: String,
}

impl GeminiClient {
    /// 创建新的客户端
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model_name: config.model_name.clone(),
        })
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, name)
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model_name
        )
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn upload(
        &self,
        credential: &Credential,
        display_name: &str,
        data: Vec<u8>,
    ) -> Result<RemoteAsset, ServiceError> {
        let size = data.len();
        debug!("上传文件 {} ({} 字节)", display_name, size);

        // 第一步：申请上传地址
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &credential.token)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", PDF_MIME)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = check_status(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::InvalidResponse {
                message: "上传响应缺少 x-goog-upload-url".to_string(),
            })?;

        // 第二步：上传内容并结束会话
        let finish = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header(reqwest::header::CONTENT_LENGTH, size.to_string())
            .body(data)
            .send()
            .await?;
        let finish = check_status(finish).await?;

        let body: UploadResponse = finish.json().await?;
        Ok(body.file.into_asset(credential.id))
    }

    async fn refresh(
        &self,
        credential: &Credential,
        asset: &RemoteAsset,
    ) -> Result<RemoteAsset, ServiceError> {
        let response = self
            .http
            .get(self.file_url(&asset.name))
            .header(API_KEY_HEADER, &credential.token)
            .send()
            .await?;
        let response = check_status(response).await?;

        let file: FileResource = response.json().await?;
        Ok(file.into_asset(asset.owner))
    }

    async fn delete(
        &self,
        credential: &Credential,
        asset: &RemoteAsset,
    ) -> Result<(), ServiceError> {
        let response = self
            .http
            .delete(self.file_url(&asset.name))
            .header(API_KEY_HEADER, &credential.token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<String, ServiceError> {
        let body = GenerateBody::from_request(request);
        debug!(
            "调用生成接口，模型: {}，指令长度: {} 字符",
            self.model_name,
            request.instruction.len()
        );

        let response = self
            .http
            .post(self.generate_url())
            .header(API_KEY_HEADER, &credential.token)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let reply: GenerateResponse = response.json().await?;
        reply.into_text()
    }
}

/// 非 2xx 响应转换为 [`ServiceError`]
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&text)
        .map(|e| e.error.message)
        .unwrap_or(text);
    Err(ServiceError::from_status(status.as_u16(), message))
}

// ========== 请求/响应结构 ==========

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
    /// int64 以字符串形式返回
    #[serde(default)]
    size_bytes: Option<String>,
}

impl FileResource {
    fn into_asset(self, owner: usize) -> RemoteAsset {
        RemoteAsset {
            state: AssetState::from_service(self.state.as_deref().unwrap_or_default()),
            size_bytes: self
                .size_bytes
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            mime_type: self.mime_type.unwrap_or_else(|| PDF_MIME.to_string()),
            name: self.name,
            uri: self.uri,
            owner,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    File { file_data: FileData },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl GenerateBody {
    fn from_request(request: &GenerationRequest) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(asset) = &request.asset {
            parts.push(Part::File {
                file_data: FileData {
                    mime_type: asset.mime_type.clone(),
                    file_uri: asset.uri.clone(),
                },
            });
        }
        parts.push(Part::Text {
            text: request.instruction.clone(),
        });

        let s = request.sampling;
        Self {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: s.temperature,
                top_p: s.top_p,
                top_k: s.top_k,
                max_output_tokens: s.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// 拼接所有候选内容中的文本片段
    fn into_text(self) -> Result<String, ServiceError> {
        let text: String = self
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            let detail = self
                .prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "无候选内容".to_string());
            return Err(ServiceError::InvalidResponse {
                message: format!("生成结果为空: {}", detail),
            });
        }
        Ok(text)
    }
}
